use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub score: f64,
}

impl SearchItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            brand: None,
            category: None,
            price_cents: None,
            score: 0.0,
        }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}

/// Where a result set came from. Anything other than `Live` is a degraded answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Live,
    Cached,
    StaticFallback,
}

impl ResultOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Cached => "cached",
            Self::StaticFallback => "static_fallback",
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Live)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub items: Vec<SearchItem>,
    pub origin: ResultOrigin,
}

impl SearchResultSet {
    pub fn new(items: Vec<SearchItem>, origin: ResultOrigin) -> Self {
        Self { items, origin }
    }

    pub fn live(items: Vec<SearchItem>) -> Self {
        Self::new(items, ResultOrigin::Live)
    }

    pub fn is_degraded(&self) -> bool {
        self.origin.is_degraded()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of this set truncated to `limit` items and re-tagged with `origin`.
    pub fn truncated(&self, limit: usize, origin: ResultOrigin) -> Self {
        Self { items: self.items.iter().take(limit).cloned().collect(), origin }
    }
}

/// A request to the search backend.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchQuery {
    pub text: String,
    pub alpha: f64,
    pub limit: usize,
}
