use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::classification::{Entity, Intent};
use crate::domain::search::SearchItem;
use crate::domain::utterance::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    pub max_recent_results: usize,
    pub max_history: usize,
    pub max_preferences: usize,
    pub max_recent_entities: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self { max_recent_results: 20, max_history: 12, max_preferences: 16, max_recent_entities: 8 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: String,
    pub name: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn item_count(&self) -> usize {
        self.lines.iter().map(|line| line.quantity as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Shopper,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub intent: Option<Intent>,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn shopper(text: impl Into<String>, intent: Option<Intent>) -> Self {
        Self { speaker: Speaker::Shopper, text: text.into(), intent, at: Utc::now() }
    }
}

/// The minimal context handed to an external classifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassifierContext {
    pub last_intent: Option<Intent>,
    pub recent_entities: Vec<Entity>,
    pub has_recent_results: bool,
    pub cart_item_count: usize,
}

/// A single field-level write. Each variant touches exactly one field so
/// concurrent writers of different fields never overwrite each other.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    AppendSearchResults(Vec<SearchItem>),
    SetCart(Cart),
    AddPreference(String),
    RecordTurn(Turn),
    RememberEntities(Vec<Entity>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    recent_search_results: VecDeque<SearchItem>,
    last_batch_len: usize,
    current_cart: Cart,
    conversation_history: VecDeque<Turn>,
    preferences: VecDeque<String>,
    recent_entities: VecDeque<Entity>,
    last_intent: Option<Intent>,
    limits: SessionLimits,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: SessionId, limits: SessionLimits) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            recent_search_results: VecDeque::new(),
            last_batch_len: 0,
            current_cart: Cart::default(),
            conversation_history: VecDeque::new(),
            preferences: VecDeque::new(),
            recent_entities: VecDeque::new(),
            last_intent: None,
            limits,
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::AppendSearchResults(items) => self.push_search_results(items),
            SessionUpdate::SetCart(cart) => self.current_cart = cart,
            SessionUpdate::AddPreference(preference) => self.add_preference(preference),
            SessionUpdate::RecordTurn(turn) => self.record_turn(turn),
            SessionUpdate::RememberEntities(entities) => self.remember_entities(entities),
        }
    }

    /// Appends one ranked batch. The ring never exceeds the configured size;
    /// the oldest items are evicted first.
    pub fn push_search_results(&mut self, items: Vec<SearchItem>) {
        let capacity = self.limits.max_recent_results;
        if capacity == 0 || items.is_empty() {
            return;
        }
        self.last_batch_len = items.len().min(capacity);
        for item in items {
            self.recent_search_results.push_back(item);
            while self.recent_search_results.len() > capacity {
                self.recent_search_results.pop_front();
            }
        }
    }

    pub fn recent_search_results(&self) -> impl Iterator<Item = &SearchItem> {
        self.recent_search_results.iter()
    }

    pub fn recent_result_count(&self) -> usize {
        self.recent_search_results.len()
    }

    /// The most recently appended batch, in ranked order.
    pub fn last_result_batch(&self) -> Vec<&SearchItem> {
        let batch_len = self.last_batch_len.min(self.recent_search_results.len());
        let skip = self.recent_search_results.len() - batch_len;
        self.recent_search_results.iter().skip(skip).collect()
    }

    pub fn has_recent_results(&self) -> bool {
        !self.recent_search_results.is_empty()
    }

    pub fn current_cart(&self) -> &Cart {
        &self.current_cart
    }

    pub fn add_preference(&mut self, preference: String) {
        let preference = preference.trim().to_lowercase();
        if preference.is_empty() || self.limits.max_preferences == 0 {
            return;
        }
        self.preferences.retain(|existing| existing != &preference);
        self.preferences.push_back(preference);
        while self.preferences.len() > self.limits.max_preferences {
            self.preferences.pop_front();
        }
    }

    pub fn preferences(&self) -> impl Iterator<Item = &str> {
        self.preferences.iter().map(String::as_str)
    }

    pub fn record_turn(&mut self, turn: Turn) {
        if turn.speaker == Speaker::Shopper && turn.intent.is_some() {
            self.last_intent = turn.intent;
        }
        if self.limits.max_history == 0 {
            return;
        }
        self.conversation_history.push_back(turn);
        while self.conversation_history.len() > self.limits.max_history {
            self.conversation_history.pop_front();
        }
    }

    pub fn conversation_history(&self) -> impl Iterator<Item = &Turn> {
        self.conversation_history.iter()
    }

    pub fn remember_entities(&mut self, entities: Vec<Entity>) {
        for entity in entities {
            self.recent_entities.retain(|existing| existing != &entity);
            self.recent_entities.push_back(entity);
        }
        while self.recent_entities.len() > self.limits.max_recent_entities {
            self.recent_entities.pop_front();
        }
    }

    pub fn last_intent(&self) -> Option<Intent> {
        self.last_intent
    }

    pub fn classifier_context(&self) -> ClassifierContext {
        ClassifierContext {
            last_intent: self.last_intent,
            recent_entities: self.recent_entities.iter().cloned().collect(),
            has_recent_results: self.has_recent_results(),
            cart_item_count: self.current_cart.item_count(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen_at = now;
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_ttl: Duration) -> bool {
        now - self.last_seen_at > idle_ttl
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::classification::{Entity, EntityKind, Intent};
    use crate::domain::search::SearchItem;
    use crate::domain::utterance::SessionId;

    use super::{Cart, CartLine, SessionContext, SessionLimits, SessionUpdate, Turn};

    fn context_with_limit(max_recent_results: usize) -> SessionContext {
        SessionContext::new(
            SessionId("s-1".to_string()),
            SessionLimits { max_recent_results, ..SessionLimits::default() },
        )
    }

    fn items(range: std::ops::Range<usize>) -> Vec<SearchItem> {
        range.map(|index| SearchItem::new(format!("sku-{index}"), format!("Item {index}"))).collect()
    }

    #[test]
    fn ring_retains_only_most_recent_results() {
        let mut context = context_with_limit(5);
        context.push_search_results(items(0..6));

        let ids = context.recent_search_results().map(|item| item.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["sku-1", "sku-2", "sku-3", "sku-4", "sku-5"]);
    }

    #[test]
    fn ring_evicts_oldest_across_batches() {
        let mut context = context_with_limit(4);
        context.push_search_results(items(0..3));
        context.push_search_results(items(10..12));

        assert_eq!(context.recent_result_count(), 4);
        let batch = context.last_result_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "sku-10");
        assert_eq!(context.recent_search_results().next().map(|item| item.id.as_str()), Some("sku-1"));
    }

    #[test]
    fn field_updates_are_independent() {
        let mut context = context_with_limit(4);
        context.apply(SessionUpdate::SetCart(Cart {
            lines: vec![CartLine { item_id: "sku-1".to_string(), name: "Oat".to_string(), quantity: 2 }],
        }));
        context.apply(SessionUpdate::AddPreference(" Vegan ".to_string()));
        context.apply(SessionUpdate::RecordTurn(Turn::shopper("add oat milk", Some(Intent::AddToCart))));
        context.apply(SessionUpdate::RememberEntities(vec![Entity::new(EntityKind::Brand, "oatly")]));

        let classifier_context = context.classifier_context();
        assert_eq!(classifier_context.cart_item_count, 2);
        assert_eq!(classifier_context.last_intent, Some(Intent::AddToCart));
        assert_eq!(classifier_context.recent_entities.len(), 1);
        assert!(!classifier_context.has_recent_results);
        assert_eq!(context.preferences().collect::<Vec<_>>(), vec!["vegan"]);
    }

    #[test]
    fn history_and_preferences_are_bounded() {
        let mut context = SessionContext::new(
            SessionId("s-2".to_string()),
            SessionLimits { max_history: 2, max_preferences: 2, ..SessionLimits::default() },
        );
        for index in 0..5 {
            context.record_turn(Turn::shopper(format!("turn {index}"), None));
            context.add_preference(format!("pref-{index}"));
        }

        assert_eq!(context.conversation_history().count(), 2);
        assert_eq!(context.preferences().collect::<Vec<_>>(), vec!["pref-3", "pref-4"]);
    }

    #[test]
    fn idle_detection_uses_last_seen() {
        let mut context = context_with_limit(4);
        let now = Utc::now();
        context.touch(now - Duration::seconds(120));

        assert!(context.is_idle(now, Duration::seconds(60)));
        assert!(!context.is_idle(now, Duration::seconds(300)));
    }
}
