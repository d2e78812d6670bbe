//! # Message Store
//!
//! The bounded, most-recent-first window of feed messages.
//!
//! ## Invariants:
//! - At most one entry per `id`. Inserting a known id is a silent no-op.
//! - Never more than `capacity` entries; the oldest are evicted first.
//! - A pushed message carries `is_new = true` until `new_until` has passed and
//!   a sweep clears it. Sweeps run on their own timer, so a burst of arrivals
//!   never delays expiry of earlier markers, and a cleared marker is never set
//!   again.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Default window size.
pub const DEFAULT_CAPACITY: usize = 1_000;

/// One broadcast message from the game feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identity; numeric ids on the wire are kept as their decimal text.
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    /// Message body.
    pub content: String,
    /// Broadcast category, e.g. `guild` or `system`.
    pub category: String,
    /// Server-side creation time. Accepts RFC 3339, an offset-less ISO time
    /// (read as UTC) or epoch seconds/milliseconds.
    #[serde(deserialize_with = "timestamp_lenient")]
    pub timestamp: DateTime<Utc>,
    /// Presentation marker for freshly pushed messages.
    #[serde(default)]
    pub is_new: bool,
    /// When `is_new` may be cleared.
    #[serde(default)]
    pub new_until: Option<DateTime<Utc>>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    })
}

/// Epoch values above this are milliseconds; as seconds they would land
/// past the year 5000.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn timestamp_lenient<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Epoch(i64),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Text(text) => parse_timestamp(&text)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {:?}", text))),
        RawTimestamp::Epoch(n) => {
            let parsed = if n.abs() > EPOCH_MILLIS_THRESHOLD {
                DateTime::from_timestamp_millis(n)
            } else {
                DateTime::from_timestamp(n, 0)
            };
            parsed.ok_or_else(|| D::Error::custom(format!("epoch timestamp {} out of range", n)))
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Deduplicating, bounded message window.
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: VecDeque<Message>,
    ids: HashSet<String>,
    capacity: usize,
    new_marker_ttl: Duration,
    revision: u64,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_millis(5_000))
    }
}

impl MessageStore {
    /// Creates an empty window.
    pub fn new(capacity: usize, new_marker_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
            new_marker_ttl,
            revision: 0,
        }
    }

    /// Inserts a pushed message at the front, marked new.
    ///
    /// Returns `false` (and changes nothing) when the id is already stored.
    pub fn insert(&mut self, message: Message) -> bool {
        self.insert_at(message, Utc::now())
    }

    /// [`insert`](Self::insert) with an explicit clock.
    pub fn insert_at(&mut self, mut message: Message, now: DateTime<Utc>) -> bool {
        if self.ids.contains(&message.id) {
            log::trace!("Duplicate message {} ignored", message.id);
            return false;
        }

        message.is_new = true;
        message.new_until = Some(now + self.new_marker_ttl_chrono());

        self.ids.insert(message.id.clone());
        self.messages.push_front(message);
        self.evict_overflow();
        self.revision += 1;
        true
    }

    /// Replaces the window with a `latest_data` batch (most recent first).
    ///
    /// Duplicates inside the batch keep their first occurrence; nothing is
    /// marked new. Returns the number of messages kept.
    pub fn replace_latest(&mut self, batch: Vec<Message>) -> usize {
        self.messages.clear();
        self.ids.clear();

        for mut message in batch {
            if self.messages.len() >= self.capacity {
                break;
            }
            if !self.ids.insert(message.id.clone()) {
                continue;
            }
            message.is_new = false;
            message.new_until = None;
            self.messages.push_back(message);
        }

        self.revision += 1;
        self.messages.len()
    }

    /// Appends a `history_data` batch after the oldest entry.
    ///
    /// Known ids are skipped and the window never grows past capacity.
    /// Returns the number of messages appended.
    pub fn append_older(&mut self, batch: Vec<Message>) -> usize {
        let mut appended = 0;
        for mut message in batch {
            if self.messages.len() >= self.capacity {
                break;
            }
            if !self.ids.insert(message.id.clone()) {
                continue;
            }
            message.is_new = false;
            message.new_until = None;
            self.messages.push_back(message);
            appended += 1;
        }

        if appended > 0 {
            self.revision += 1;
        }
        appended
    }

    /// Clears every `is_new` marker whose `new_until` has passed.
    pub fn sweep_new_markers(&mut self) -> usize {
        self.sweep_new_markers_at(Utc::now())
    }

    /// [`sweep_new_markers`](Self::sweep_new_markers) with an explicit clock.
    pub fn sweep_new_markers_at(&mut self, now: DateTime<Utc>) -> usize {
        let mut cleared = 0;
        for message in self.messages.iter_mut().filter(|m| m.is_new) {
            if message.new_until.map_or(true, |until| until <= now) {
                message.is_new = false;
                message.new_until = None;
                cleared += 1;
            }
        }

        if cleared > 0 {
            self.revision += 1;
        }
        cleared
    }

    /// Empties the window unconditionally.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.revision += 1;
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum window size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `id` is currently stored.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Front of the window.
    pub fn newest(&self) -> Option<&Message> {
        self.messages.front()
    }

    /// Back of the window.
    pub fn oldest(&self) -> Option<&Message> {
        self.messages.back()
    }

    /// Messages still carrying the new marker.
    pub fn new_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_new).count()
    }

    /// Copy of the window, most recent first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Bumped on every mutation; lets readers skip rebuilding unchanged snapshots.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn evict_overflow(&mut self) {
        while self.messages.len() > self.capacity {
            if let Some(evicted) = self.messages.pop_back() {
                self.ids.remove(&evicted.id);
            }
        }
    }

    fn new_marker_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.new_marker_ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> Message {
        Message {
            id: id.to_string(),
            content: format!("content {}", id),
            category: "guild".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc),
            is_new: false,
            new_until: None,
        }
    }

    #[test]
    fn test_timestamp_formats_accepted() {
        let expected = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let decode = |timestamp: serde_json::Value| {
            serde_json::from_value::<Message>(serde_json::json!({
                "id": 7,
                "content": "Dragon slain",
                "category": "system",
                "timestamp": timestamp,
            }))
        };

        assert_eq!(decode("2024-05-01T14:00:00+02:00".into()).unwrap().timestamp, expected);
        assert_eq!(decode("2024-05-01T12:00:00".into()).unwrap().timestamp, expected);
        assert_eq!(decode("2024-05-01 12:00:00.000".into()).unwrap().timestamp, expected);
        assert_eq!(decode(1_714_564_800_i64.into()).unwrap().timestamp, expected);
        assert_eq!(decode(1_714_564_800_000_i64.into()).unwrap().timestamp, expected);

        assert!(decode("yesterday".into()).is_err());
        assert!(decode(serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_duplicates_are_silently_rejected() {
        let mut store = MessageStore::default();
        assert!(store.insert(msg("a")));
        assert!(!store.insert(msg("a")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_prepends_and_marks_new() {
        let now = Utc::now();
        let mut store = MessageStore::new(10, Duration::from_millis(5_000));
        store.insert_at(msg("a"), now);
        store.insert_at(msg("b"), now);

        let ids: Vec<&str> = store.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let newest = store.newest().unwrap();
        assert!(newest.is_new);
        assert_eq!(newest.new_until, Some(now + chrono::Duration::milliseconds(5_000)));
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut store = MessageStore::new(1_000, Duration::from_millis(5_000));
        for i in 0..1_050 {
            store.insert(msg(&i.to_string()));
            assert!(store.len() <= 1_000);
        }

        assert_eq!(store.len(), 1_000);
        assert_eq!(store.newest().unwrap().id, "1049");
        assert_eq!(store.oldest().unwrap().id, "50");
        assert!(!store.contains("49"));

        // An evicted id may come back.
        assert!(store.insert(msg("0")));
        assert_eq!(store.oldest().unwrap().id, "51");
    }

    #[test]
    fn test_sweep_clears_only_expired_markers() {
        let t0 = Utc::now();
        let mut store = MessageStore::new(10, Duration::from_millis(5_000));
        store.insert_at(msg("a"), t0);
        store.insert_at(msg("b"), t0 + chrono::Duration::milliseconds(3_000));

        assert_eq!(store.sweep_new_markers_at(t0 + chrono::Duration::milliseconds(4_000)), 0);
        assert_eq!(store.new_count(), 2);

        assert_eq!(store.sweep_new_markers_at(t0 + chrono::Duration::milliseconds(6_000)), 1);
        assert!(!store.iter().find(|m| m.id == "a").unwrap().is_new);
        assert!(store.iter().find(|m| m.id == "b").unwrap().is_new);

        assert_eq!(store.sweep_new_markers_at(t0 + chrono::Duration::milliseconds(8_000)), 1);
        assert_eq!(store.new_count(), 0);

        // Re-inserting a stored id never re-arms the marker.
        assert!(!store.insert_at(msg("a"), t0 + chrono::Duration::milliseconds(9_000)));
        assert_eq!(store.new_count(), 0);
    }

    #[test]
    fn test_replace_latest_dedupes_and_caps() {
        let mut store = MessageStore::new(3, Duration::from_millis(5_000));
        store.insert(msg("old"));

        let kept = store.replace_latest(vec![msg("a"), msg("b"), msg("a"), msg("c"), msg("d")]);
        assert_eq!(kept, 3);
        let ids: Vec<&str> = store.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!store.contains("old"));
        assert_eq!(store.new_count(), 0);
    }

    #[test]
    fn test_append_older_skips_known_and_respects_capacity() {
        let mut store = MessageStore::new(4, Duration::from_millis(5_000));
        store.replace_latest(vec![msg("c"), msg("b")]);

        let appended = store.append_older(vec![msg("b"), msg("a"), msg("z"), msg("y")]);
        assert_eq!(appended, 2);
        let ids: Vec<&str> = store.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a", "z"]);
    }

    #[test]
    fn test_clear_and_revision() {
        let mut store = MessageStore::default();
        let r0 = store.revision();
        store.insert(msg("a"));
        assert!(store.revision() > r0);

        let r1 = store.revision();
        store.insert(msg("a"));
        assert_eq!(store.revision(), r1);

        store.clear();
        assert!(store.is_empty());
        assert!(!store.contains("a"));
    }
}
