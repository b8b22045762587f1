use std::fmt;

use serde::{Deserialize, Serialize};

/// Clamps a score into `[0, 1]`, mapping NaN to zero.
pub fn unit_interval(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Search,
    AddToCart,
    RemoveFromCart,
    UpdateQuantity,
    ViewCart,
    Checkout,
    ProductQuestion,
    Greeting,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::AddToCart => "add_to_cart",
            Self::RemoveFromCart => "remove_from_cart",
            Self::UpdateQuantity => "update_quantity",
            Self::ViewCart => "view_cart",
            Self::Checkout => "checkout",
            Self::ProductQuestion => "product_question",
            Self::Greeting => "greeting",
            Self::Unknown => "unknown",
        }
    }

    /// Add, remove and quantity changes all mutate the cart.
    pub fn is_cart_mutation(&self) -> bool {
        matches!(self, Self::AddToCart | Self::RemoveFromCart | Self::UpdateQuantity)
    }

    /// Whether the downstream answer is built from a ranked result set.
    pub fn uses_search_results(&self) -> bool {
        matches!(self, Self::Search | Self::ProductQuestion | Self::Unknown)
    }

    /// Maps a classifier label onto an intent. Unrecognised labels become
    /// `Unknown` rather than an error.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "search" | "product_search" | "find" | "browse" => Self::Search,
            "add_to_cart" | "add" | "add_item" | "buy" | "cart_add" => Self::AddToCart,
            "remove_from_cart" | "remove" | "remove_item" | "cart_remove" | "delete_item" => {
                Self::RemoveFromCart
            }
            "update_quantity" | "change_quantity" | "set_quantity" | "cart_update" => {
                Self::UpdateQuantity
            }
            "view_cart" | "show_cart" | "cart" | "cart_view" => Self::ViewCart,
            "checkout" | "check_out" | "place_order" | "purchase" => Self::Checkout,
            "product_question" | "question" | "product_info" | "product_details" => {
                Self::ProductQuestion
            }
            "greeting" | "hello" | "smalltalk" | "small_talk" => Self::Greeting,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cascade stage that produced a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationTier {
    ExactCache,
    Heuristic,
    Classifier,
    Fallback,
}

impl ClassificationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactCache => "exact_cache",
            Self::Heuristic => "heuristic",
            Self::Classifier => "classifier",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Brand,
    Category,
    Quantity,
    Ordinal,
    /// An item from the session's recent results that a referential phrase
    /// ("the first one", "that") resolved to.
    ItemRef,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Brand => "brand",
            Self::Category => "category",
            Self::Quantity => "quantity",
            Self::Ordinal => "ordinal",
            Self::ItemRef => "item_ref",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "product" | "item" => Some(Self::Product),
            "brand" => Some(Self::Brand),
            "category" => Some(Self::Category),
            "quantity" | "qty" => Some(Self::Quantity),
            "ordinal" | "position" => Some(Self::Ordinal),
            "item_ref" | "reference" => Some(Self::ItemRef),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// Outcome of classifying one utterance.
///
/// Built once and replaced wholesale; there are no setters. Confidence and
/// alpha are clamped into `[0, 1]` at construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationResult {
    intent: Intent,
    confidence: f64,
    alpha: f64,
    entities: Vec<Entity>,
    tier: ClassificationTier,
    answered_by: ClassificationTier,
    latency_ms: u64,
}

impl ClassificationResult {
    pub fn new(
        intent: Intent,
        confidence: f64,
        alpha: f64,
        entities: Vec<Entity>,
        tier: ClassificationTier,
    ) -> Self {
        Self {
            intent,
            confidence: unit_interval(confidence),
            alpha: unit_interval(alpha),
            entities,
            tier,
            answered_by: tier,
            latency_ms: 0,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Same decision re-tagged as served by another tier (used for cache
    /// hits). `answered_by` keeps the tier that produced it.
    pub fn retagged(&self, tier: ClassificationTier, latency_ms: u64) -> Self {
        Self { tier, latency_ms, ..self.clone() }
    }

    /// Overrides both the serving and the producing tier.
    pub fn attributed_to(self, tier: ClassificationTier) -> Self {
        Self { tier, answered_by: tier, ..self }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn tier(&self) -> ClassificationTier {
        self.tier
    }

    /// Tier that produced the decision. Differs from `tier` on cache hits.
    pub fn answered_by(&self) -> ClassificationTier {
        self.answered_by
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// True when any entity was resolved against session state.
    pub fn is_context_dependent(&self) -> bool {
        self.entities.iter().any(|entity| entity.kind == EntityKind::ItemRef)
    }

    /// Compares the routing decision, ignoring tier and latency.
    pub fn same_decision(&self, other: &Self) -> bool {
        self.intent == other.intent
            && self.confidence == other.confidence
            && self.alpha == other.alpha
            && self.entities == other.entities
    }
}

#[cfg(test)]
mod tests {
    use super::{
        unit_interval, ClassificationResult, ClassificationTier, Entity, EntityKind, Intent,
    };

    #[test]
    fn construction_clamps_scores_into_unit_interval() {
        let result = ClassificationResult::new(
            Intent::Search,
            1.7,
            -0.4,
            Vec::new(),
            ClassificationTier::Classifier,
        );
        assert_eq!(result.confidence(), 1.0);
        assert_eq!(result.alpha(), 0.0);

        assert_eq!(unit_interval(f64::NAN), 0.0);
        assert_eq!(unit_interval(f64::INFINITY), 1.0);
    }

    #[test]
    fn labels_map_with_aliases_and_unknown_default() {
        assert_eq!(Intent::from_label("ADD_TO_CART"), Intent::AddToCart);
        assert_eq!(Intent::from_label("add-item"), Intent::AddToCart);
        assert_eq!(Intent::from_label("check out"), Intent::Checkout);
        assert_eq!(Intent::from_label("weather"), Intent::Unknown);
    }

    #[test]
    fn cart_mutation_family() {
        assert!(Intent::AddToCart.is_cart_mutation());
        assert!(Intent::RemoveFromCart.is_cart_mutation());
        assert!(Intent::UpdateQuantity.is_cart_mutation());
        assert!(!Intent::ViewCart.is_cart_mutation());
        assert!(!Intent::Search.is_cart_mutation());
    }

    #[test]
    fn retagging_keeps_decision() {
        let original = ClassificationResult::new(
            Intent::AddToCart,
            0.9,
            0.4,
            vec![Entity::new(EntityKind::ItemRef, "sku-1")],
            ClassificationTier::Heuristic,
        )
        .with_latency(12);
        let cached = original.retagged(ClassificationTier::ExactCache, 0);

        assert!(cached.same_decision(&original));
        assert_eq!(cached.tier(), ClassificationTier::ExactCache);
        assert_eq!(cached.answered_by(), ClassificationTier::Heuristic);
        assert!(cached.is_context_dependent());
    }

    #[test]
    fn attribution_overrides_both_tiers() {
        let claimed = ClassificationResult::new(
            Intent::Search,
            0.7,
            0.5,
            Vec::new(),
            ClassificationTier::Fallback,
        )
        .attributed_to(ClassificationTier::Classifier);

        assert_eq!(claimed.tier(), ClassificationTier::Classifier);
        assert_eq!(claimed.answered_by(), ClassificationTier::Classifier);
    }
}
