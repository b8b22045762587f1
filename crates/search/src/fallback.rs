use aisle_core::domain::search::{ResultOrigin, SearchItem, SearchResultSet};

/// Built-in answer of last resort when neither the backend nor the cache
/// can serve a query.
#[derive(Clone, Debug)]
pub struct StaticFallbackSet {
    items: Vec<SearchItem>,
}

impl Default for StaticFallbackSet {
    fn default() -> Self {
        Self::new(vec![
            SearchItem::new("staple-bananas", "Bananas").with_category("produce"),
            SearchItem::new("staple-whole-milk", "Whole Milk").with_category("dairy"),
            SearchItem::new("staple-eggs", "Free Range Eggs, 12 pack").with_category("dairy"),
            SearchItem::new("staple-bread", "Sourdough Loaf").with_category("bakery"),
            SearchItem::new("staple-coffee", "Ground Coffee").with_category("pantry"),
        ])
    }
}

impl StaticFallbackSet {
    pub fn new(items: Vec<SearchItem>) -> Self {
        Self { items }
    }

    pub fn results(&self, limit: usize) -> SearchResultSet {
        SearchResultSet::new(
            self.items.iter().take(limit).cloned().collect(),
            ResultOrigin::StaticFallback,
        )
    }
}
