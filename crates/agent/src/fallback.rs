//! Last tier of the cascade. Keyword and referential-pronoun analysis that
//! always produces a usable, deliberately modest result.

use aisle_core::domain::classification::{
    ClassificationResult, ClassificationTier, Entity, EntityKind, Intent,
};
use aisle_core::domain::session::SessionContext;
use aisle_core::text::tokenize;

use crate::alpha::estimate_alpha;
use crate::heuristics::{extract_quantity, find_ordinal};

const BLANK_CONFIDENCE: f64 = 0.1;
const KEYWORD_CONFIDENCE: f64 = 0.55;
const REFERENTIAL_CONFIDENCE: f64 = 0.6;
const SEARCH_CONFIDENCE: f64 = 0.45;

const QUESTION_WORDS: &[&str] = &[
    "how", "what", "does", "is", "are", "which", "ingredients", "calories", "vegan", "gluten",
    "allergens", "price", "cost", "organic", "contain", "contains",
];
const CART_WORDS: &[&str] = &["cart", "basket", "trolley"];
const ADD_WORDS: &[&str] = &["add", "buy", "want", "get", "grab", "take"];
const REMOVE_WORDS: &[&str] = &["remove", "delete", "drop", "without"];
const PRONOUNS: &[&str] = &["it", "that", "this", "these", "those", "them", "one"];

#[derive(Clone, Debug, Default)]
pub struct ContextualFallbackAnalyzer;

impl ContextualFallbackAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Never fails. Blank input yields a low-confidence `unknown`.
    pub fn analyze(&self, normalized: &str, context: &SessionContext) -> ClassificationResult {
        let tokens = tokenize(normalized);
        if tokens.is_empty() {
            return ClassificationResult::new(
                Intent::Unknown,
                BLANK_CONFIDENCE,
                estimate_alpha(normalized),
                Vec::new(),
                ClassificationTier::Fallback,
            );
        }

        let mentions_cart = has_any(&tokens, CART_WORDS);
        let asks_question = has_any(&tokens, QUESTION_WORDS) || normalized.ends_with('?');
        let wants_add = has_any(&tokens, ADD_WORDS);
        let wants_remove = has_any(&tokens, REMOVE_WORDS);

        let mut entities = Vec::new();
        let referenced = self.resolve_reference(&tokens, context);
        if let Some(item_id) = &referenced {
            entities.push(Entity::new(EntityKind::ItemRef, item_id.clone()));
        }
        if let Some(quantity) = extract_quantity(&tokens) {
            entities.push(Entity::new(EntityKind::Quantity, quantity.to_string()));
        }

        let (intent, confidence) = match (referenced.is_some(), mentions_cart) {
            (true, _) if wants_remove => (Intent::RemoveFromCart, REFERENTIAL_CONFIDENCE),
            (true, _) if wants_add => (Intent::AddToCart, REFERENTIAL_CONFIDENCE),
            (true, _) if asks_question => (Intent::ProductQuestion, REFERENTIAL_CONFIDENCE),
            (_, true) if wants_remove => (Intent::RemoveFromCart, KEYWORD_CONFIDENCE),
            (_, true) if wants_add => (Intent::AddToCart, KEYWORD_CONFIDENCE),
            (_, true) => (Intent::ViewCart, KEYWORD_CONFIDENCE),
            _ if asks_question => (Intent::ProductQuestion, KEYWORD_CONFIDENCE),
            _ => {
                entities.push(Entity::new(EntityKind::Product, tokens.join(" ")));
                (Intent::Search, SEARCH_CONFIDENCE)
            }
        };

        ClassificationResult::new(
            intent,
            confidence,
            estimate_alpha(normalized),
            entities,
            ClassificationTier::Fallback,
        )
    }

    /// Ordinals and pronouns point into the last result batch. Without
    /// session results nothing is resolved.
    fn resolve_reference(&self, tokens: &[String], context: &SessionContext) -> Option<String> {
        if !context.has_recent_results() {
            return None;
        }
        let batch = context.last_result_batch();
        if let Some(position) = find_ordinal(tokens, batch.len()) {
            return batch.get(position).map(|item| item.id.clone());
        }
        if tokens.iter().any(|token| PRONOUNS.contains(&token.as_str())) {
            let remembered = context
                .classifier_context()
                .recent_entities
                .into_iter()
                .rev()
                .find(|entity| entity.kind == EntityKind::ItemRef)
                .map(|entity| entity.value);
            return remembered.or_else(|| batch.first().map(|item| item.id.clone()));
        }
        None
    }
}

fn has_any(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|token| words.contains(&token.as_str()))
}

#[cfg(test)]
mod tests {
    use aisle_core::domain::classification::{ClassificationTier, Entity, EntityKind, Intent};
    use aisle_core::domain::search::SearchItem;
    use aisle_core::domain::session::{SessionContext, SessionLimits};
    use aisle_core::domain::utterance::SessionId;

    use super::ContextualFallbackAnalyzer;

    fn context(results: usize) -> SessionContext {
        let mut context = SessionContext::new(SessionId("s-1".to_string()), SessionLimits::default());
        context.push_search_results(
            (0..results).map(|index| SearchItem::new(format!("sku-{index}"), "Item")).collect(),
        );
        context
    }

    #[test]
    fn blank_input_is_low_confidence_unknown() {
        let result = ContextualFallbackAnalyzer::new().analyze("", &context(0));
        assert_eq!(result.intent(), Intent::Unknown);
        assert_eq!(result.tier(), ClassificationTier::Fallback);
        assert!(result.confidence() <= 0.2);
        assert!(result.entities().is_empty());
    }

    #[test]
    fn plain_text_defaults_to_search() {
        let result = ContextualFallbackAnalyzer::new().analyze("oatly barista", &context(0));
        assert_eq!(result.intent(), Intent::Search);
        assert!(result.entities().contains(&Entity::new(EntityKind::Product, "oatly barista")));
        assert!(result.confidence() < 0.9);
    }

    #[test]
    fn pronoun_question_resolves_against_results() {
        let result = ContextualFallbackAnalyzer::new().analyze("is it vegan?", &context(3));
        assert_eq!(result.intent(), Intent::ProductQuestion);
        assert!(result.is_context_dependent());
        assert!(result.entities().contains(&Entity::new(EntityKind::ItemRef, "sku-0")));
    }

    #[test]
    fn pronouns_without_context_never_resolve() {
        let result = ContextualFallbackAnalyzer::new().analyze("i want that one", &context(0));
        assert!(!result.is_context_dependent());
        assert_eq!(result.intent(), Intent::Search);
    }

    #[test]
    fn referential_add_is_preferred_over_search() {
        let result = ContextualFallbackAnalyzer::new().analyze("i'll take the second", &context(3));
        assert_eq!(result.intent(), Intent::AddToCart);
        assert!(result.entities().contains(&Entity::new(EntityKind::ItemRef, "sku-1")));
    }
}
