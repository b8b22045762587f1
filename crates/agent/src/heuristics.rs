//! High-precision rules for the cart and checkout vocabulary.
//!
//! A rule only fires on explicit phrasing: a cart verb together with a cart
//! mention or a reference that resolves against the shopper's last results.
//! Anything looser is left to the classifier.

use aisle_core::domain::classification::{
    ClassificationResult, ClassificationTier, Entity, EntityKind, Intent,
};
use aisle_core::domain::search::SearchItem;
use aisle_core::domain::session::SessionContext;
use aisle_core::text::{contains_phrase, tokenize};

use crate::alpha::estimate_alpha;

const CHECKOUT_PHRASES: &[&str] = &[
    "checkout",
    "check out",
    "place my order",
    "place the order",
    "place order",
    "proceed to payment",
    "pay now",
    "i'm ready to pay",
    "ready to pay",
];

const VIEW_CART_PHRASES: &[&str] = &[
    "what's in my cart",
    "what is in my cart",
    "what's in my basket",
    "show my cart",
    "show me my cart",
    "show cart",
    "view cart",
    "view my cart",
    "open my cart",
    "my cart please",
];

const GREETINGS: &[&str] =
    &["hi", "hello", "hey", "hi there", "hello there", "hey there", "good morning", "good evening"];

const ADD_VERBS: &[&str] = &["add", "put", "throw", "include"];
const REMOVE_VERBS: &[&str] = &["remove", "delete", "drop"];
const UPDATE_VERBS: &[&str] = &["change", "update", "set", "make"];
const CART_WORDS: &[&str] = &["cart", "basket", "trolley"];
const QUESTION_OPENERS: &[&str] =
    &["what", "which", "how", "why", "should", "does", "do", "is", "are", "when", "where"];
const PRONOUNS: &[&str] = &["it", "that", "this", "these", "those", "them"];
const FILLER: &[&str] = &["a", "an", "the", "some", "of", "please", "me", "my", "more"];

/// The verb window: a cart verb counts only within the first few tokens
/// ("can you please add ...").
const VERB_WINDOW: usize = 4;

#[derive(Clone, Debug)]
pub struct HeuristicRules {
    confidence: f64,
}

impl Default for HeuristicRules {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl HeuristicRules {
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Returns a heuristic-tier result when a rule matches. `normalized` is
    /// the normalized utterance text.
    pub fn evaluate(&self, normalized: &str, context: &SessionContext) -> Option<ClassificationResult> {
        let tokens = tokenize(normalized);
        if tokens.is_empty() {
            return None;
        }

        let matched = if matches_any(normalized, CHECKOUT_PHRASES) {
            Some((Intent::Checkout, Vec::new()))
        } else if matches_any(normalized, VIEW_CART_PHRASES) {
            Some((Intent::ViewCart, Vec::new()))
        } else if GREETINGS.contains(&tokens.join(" ").as_str()) {
            Some((Intent::Greeting, Vec::new()))
        } else {
            match_cart_mutation(&tokens, context)
        };

        matched.map(|(intent, entities)| {
            ClassificationResult::new(
                intent,
                self.confidence,
                estimate_alpha(normalized),
                entities,
                ClassificationTier::Heuristic,
            )
        })
    }
}

fn matches_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| contains_phrase(normalized, phrase))
}

fn match_cart_mutation(tokens: &[String], context: &SessionContext) -> Option<(Intent, Vec<Entity>)> {
    if QUESTION_OPENERS.contains(&tokens[0].as_str()) {
        return None;
    }

    let (verb_index, intent) = find_cart_verb(tokens)?;
    let mentions_cart = tokens.iter().any(|token| CART_WORDS.contains(&token.as_str()));
    let reference = resolve_reference(tokens, context);

    let mut entities = Vec::new();
    if let Some(quantity) = extract_quantity(tokens) {
        entities.push(Entity::new(EntityKind::Quantity, quantity.to_string()));
    }

    match intent {
        Intent::UpdateQuantity => {
            let mentions_quantity = tokens.iter().any(|token| token == "quantity" || token == "qty");
            let make_it = tokens.windows(2).any(|pair| pair[0] == "make" && pair[1] == "it");
            let has_number = entities.iter().any(|entity| entity.kind == EntityKind::Quantity);
            if !(mentions_quantity || (make_it && has_number)) {
                return None;
            }
        }
        _ if !mentions_cart && reference.is_none() => return None,
        _ => {}
    }

    match reference {
        Some(Reference { ordinal, item }) => {
            if let Some(ordinal) = ordinal {
                entities.push(Entity::new(EntityKind::Ordinal, (ordinal + 1).to_string()));
            }
            entities.push(Entity::new(EntityKind::ItemRef, item.id.clone()));
        }
        None => {
            if let Some(product) = extract_product_phrase(tokens, verb_index) {
                entities.push(Entity::new(EntityKind::Product, product));
            }
        }
    }

    Some((intent, entities))
}

fn find_cart_verb(tokens: &[String]) -> Option<(usize, Intent)> {
    tokens.iter().take(VERB_WINDOW).enumerate().find_map(|(index, token)| {
        let token = token.as_str();
        if ADD_VERBS.contains(&token) {
            Some((index, Intent::AddToCart))
        } else if REMOVE_VERBS.contains(&token)
            || (token == "take" && tokens.get(index + 1).map(String::as_str) == Some("out"))
        {
            Some((index, Intent::RemoveFromCart))
        } else if UPDATE_VERBS.contains(&token) {
            Some((index, Intent::UpdateQuantity))
        } else {
            None
        }
    })
}

struct Reference<'a> {
    ordinal: Option<usize>,
    item: &'a SearchItem,
}

/// Resolves "the second one", "number 3", "the last one", "it" or "that"
/// against the last batch of results. Without results nothing resolves.
fn resolve_reference<'a>(tokens: &[String], context: &'a SessionContext) -> Option<Reference<'a>> {
    if !context.has_recent_results() {
        return None;
    }
    let batch = context.last_result_batch();

    if let Some(position) = find_ordinal(tokens, batch.len()) {
        return batch.get(position).map(|item| Reference { ordinal: Some(position), item: *item });
    }

    if tokens.iter().any(|token| PRONOUNS.contains(&token.as_str())) {
        let remembered = context
            .classifier_context()
            .recent_entities
            .into_iter()
            .rev()
            .find(|entity| entity.kind == EntityKind::ItemRef);
        if let Some(entity) = remembered {
            if let Some(item) = context.recent_search_results().find(|item| item.id == entity.value) {
                return Some(Reference { ordinal: None, item });
            }
        }
        if batch.len() == 1 {
            return Some(Reference { ordinal: None, item: batch[0] });
        }
    }

    None
}

/// Zero-based position named by an ordinal phrase, if any.
pub fn find_ordinal(tokens: &[String], batch_len: usize) -> Option<usize> {
    for (index, token) in tokens.iter().enumerate() {
        if let Some(position) = ordinal_word(token) {
            return Some(position);
        }
        if token == "last" && batch_len > 0 {
            return Some(batch_len - 1);
        }
        if matches!(token.as_str(), "number" | "item" | "option" | "no") {
            if let Some(position) = tokens.get(index + 1).and_then(|next| next.parse::<usize>().ok()) {
                if position > 0 {
                    return Some(position - 1);
                }
            }
        }
    }
    None
}

fn ordinal_word(token: &str) -> Option<usize> {
    let position = match token {
        "first" | "1st" | "top" => 0,
        "second" | "2nd" => 1,
        "third" | "3rd" => 2,
        "fourth" | "4th" => 3,
        "fifth" | "5th" => 4,
        "sixth" | "6th" => 5,
        "seventh" | "7th" => 6,
        "eighth" | "8th" => 7,
        "ninth" | "9th" => 8,
        "tenth" | "10th" => 9,
        _ => return None,
    };
    Some(position)
}

fn number_word(token: &str) -> Option<u32> {
    let value = match token {
        "two" | "couple" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" | "half-dozen" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "dozen" => 12,
        _ => return None,
    };
    Some(value)
}

pub fn extract_quantity(tokens: &[String]) -> Option<u32> {
    tokens.iter().enumerate().find_map(|(index, token)| {
        if index > 0 && matches!(tokens[index - 1].as_str(), "number" | "item" | "option" | "no") {
            return None;
        }
        if token.len() <= 3 {
            if let Ok(value) = token.parse::<u32>() {
                return (value > 0).then_some(value);
            }
        }
        number_word(token)
    })
}

/// The words between the cart verb and the cart mention, minus fillers and
/// quantities: "add two oat milks to my cart" gives "oat milks".
fn extract_product_phrase(tokens: &[String], verb_index: usize) -> Option<String> {
    let start = verb_index + 1;
    let end = tokens
        .iter()
        .enumerate()
        .skip(start)
        .find(|(index, token)| {
            matches!(token.as_str(), "to" | "in" | "into" | "from" | "on" | "out")
                && tokens
                    .iter()
                    .skip(index + 1)
                    .take(2)
                    .any(|next| CART_WORDS.contains(&next.as_str()))
        })
        .map(|(index, _)| index)
        .unwrap_or(tokens.len());

    let words = tokens
        .get(start..end)?
        .iter()
        .filter(|token| !FILLER.contains(&token.as_str()))
        .filter(|token| token.parse::<u32>().is_err() && number_word(token).is_none())
        .filter(|token| !CART_WORDS.contains(&token.as_str()) && !PRONOUNS.contains(&token.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();

    (!words.is_empty()).then(|| words.join(" "))
}

#[cfg(test)]
mod tests {
    use aisle_core::domain::classification::{ClassificationTier, Entity, EntityKind, Intent};
    use aisle_core::domain::search::SearchItem;
    use aisle_core::domain::session::{SessionContext, SessionLimits};
    use aisle_core::domain::utterance::SessionId;
    use aisle_core::text::normalize_text;

    use super::HeuristicRules;

    fn empty_context() -> SessionContext {
        SessionContext::new(SessionId("s-1".to_string()), SessionLimits::default())
    }

    fn context_with_results(count: usize) -> SessionContext {
        let mut context = empty_context();
        context.push_search_results(
            (0..count).map(|index| SearchItem::new(format!("sku-{index}"), format!("Item {index}"))).collect(),
        );
        context
    }

    fn evaluate(text: &str, context: &SessionContext) -> Option<(Intent, Vec<Entity>)> {
        HeuristicRules::default()
            .evaluate(&normalize_text(text), context)
            .map(|result| (result.intent(), result.entities().to_vec()))
    }

    #[test]
    fn ordinal_reference_resolves_against_last_results() {
        let context = context_with_results(3);
        let result = HeuristicRules::default()
            .evaluate("add the first one to my cart", &context)
            .expect("rule should match");

        assert_eq!(result.intent(), Intent::AddToCart);
        assert_eq!(result.tier(), ClassificationTier::Heuristic);
        assert!(result.confidence() >= 0.8);
        assert!(result.entities().contains(&Entity::new(EntityKind::ItemRef, "sku-0")));
        assert!(result.entities().contains(&Entity::new(EntityKind::Ordinal, "1")));
    }

    #[test]
    fn reference_without_results_does_not_resolve() {
        let (intent, entities) =
            evaluate("add the first one to my cart", &empty_context()).expect("cart mention still matches");
        assert_eq!(intent, Intent::AddToCart);
        assert!(entities.iter().all(|entity| entity.kind != EntityKind::ItemRef));

        assert!(evaluate("add the first one", &empty_context()).is_none());
    }

    #[test]
    fn ordinal_past_the_batch_does_not_resolve() {
        assert!(evaluate("add the fifth one", &context_with_results(3)).is_none());
        let (_, entities) = evaluate("remove the last one", &context_with_results(3)).expect("matches");
        assert!(entities.contains(&Entity::new(EntityKind::ItemRef, "sku-2")));
    }

    #[test]
    fn table_of_phrases() {
        struct Case {
            text: &'static str,
            expected: Option<Intent>,
        }

        let cases = vec![
            Case { text: "checkout", expected: Some(Intent::Checkout) },
            Case { text: "ok let's check out", expected: Some(Intent::Checkout) },
            Case { text: "I'm ready to pay", expected: Some(Intent::Checkout) },
            Case { text: "what's in my cart?", expected: Some(Intent::ViewCart) },
            Case { text: "show me my cart", expected: Some(Intent::ViewCart) },
            Case { text: "hello", expected: Some(Intent::Greeting) },
            Case { text: "add oat milk to my cart", expected: Some(Intent::AddToCart) },
            Case { text: "can you put 2 avocados in my basket", expected: Some(Intent::AddToCart) },
            Case { text: "remove the bread from my cart", expected: Some(Intent::RemoveFromCart) },
            Case { text: "take out the eggs from the cart", expected: Some(Intent::RemoveFromCart) },
            Case { text: "change the quantity to 3", expected: Some(Intent::UpdateQuantity) },
            Case { text: "make it 4", expected: Some(Intent::UpdateQuantity) },
            Case { text: "what should I add to my cart", expected: None },
            Case { text: "oatly", expected: None },
            Case { text: "gluten free pasta", expected: None },
            Case { text: "add some spice to my life", expected: None },
            Case { text: "hello, do you sell kimchi", expected: None },
        ];

        for case in cases {
            let actual = evaluate(case.text, &empty_context()).map(|(intent, _)| intent);
            assert_eq!(actual, case.expected, "{}", case.text);
        }
    }

    #[test]
    fn product_and_quantity_entities_are_extracted() {
        let (_, entities) =
            evaluate("please add two oat milks to my cart", &empty_context()).expect("matches");
        assert!(entities.contains(&Entity::new(EntityKind::Quantity, "2")));
        assert!(entities.contains(&Entity::new(EntityKind::Product, "oat milks")));
    }

    #[test]
    fn pronoun_uses_single_result_or_remembered_item() {
        let single = context_with_results(1);
        let (_, entities) = evaluate("add it", &single).expect("sole result resolves");
        assert!(entities.contains(&Entity::new(EntityKind::ItemRef, "sku-0")));

        let mut many = context_with_results(4);
        assert!(evaluate("add it", &many).is_none());
        many.remember_entities(vec![Entity::new(EntityKind::ItemRef, "sku-2")]);
        let (_, entities) = evaluate("add that", &many).expect("remembered item resolves");
        assert!(entities.contains(&Entity::new(EntityKind::ItemRef, "sku-2")));
    }
}
