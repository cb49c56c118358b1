//! Tag Index
//!
//! Reverse index from tag to the keys carrying it, shared by every tier.
//! Each key also remembers the `expires_at` of the entry that registered it;
//! that stamp acts as a generation so an expiry observed on an old copy of
//! a key never unregisters a newer write of the same key.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct KeyTags {
    tags: BTreeSet<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, KeyTags>,
}

impl Inner {
    fn detach(&mut self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }
}

/// Thread-safe tag → keys index
#[derive(Debug, Default)]
pub struct TagIndex {
    inner: Mutex<Inner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` with exactly `tags`, replacing any previous tag set
    pub fn register<I, T>(&self, key: &str, tags: I, expires_at: Option<DateTime<Utc>>)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.by_key.remove(key) {
            inner.detach(key, &old.tags);
        }
        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            inner
                .by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner
            .by_key
            .insert(key.to_string(), KeyTags { tags, expires_at });
    }

    /// Add `tags` to `key` without dropping the tags it already has
    ///
    /// A key seen for the first time takes `expires_at` as its generation;
    /// a known key keeps the generation it was registered with.
    pub fn merge<I, T>(&self, key: &str, tags: I, expires_at: Option<DateTime<Utc>>)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        if tags.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for tag in &tags {
            inner
                .by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| KeyTags {
                tags: BTreeSet::new(),
                expires_at,
            })
            .tags
            .extend(tags);
    }

    /// Add a single tag to `key`, keeping its existing tags
    pub fn add(&self, tag: &str, key: &str) {
        let mut inner = self.inner.lock();
        inner
            .by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        inner
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| KeyTags {
                tags: BTreeSet::new(),
                expires_at: None,
            })
            .tags
            .insert(tag.to_string());
    }

    /// Remove a single tag from `key`
    pub fn remove(&self, tag: &str, key: &str) {
        let mut inner = self.inner.lock();
        let mut drop_key = false;
        if let Some(entry) = inner.by_key.get_mut(key) {
            entry.tags.remove(tag);
            drop_key = entry.tags.is_empty();
        }
        if drop_key {
            inner.by_key.remove(key);
        }
        let single = BTreeSet::from([tag.to_string()]);
        inner.detach(key, &single);
    }

    /// Forget `key` entirely
    pub fn unregister(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_key.remove(key) {
            Some(old) => {
                inner.detach(key, &old.tags);
                true
            }
            None => false,
        }
    }

    /// Forget `key` only if it is still registered by the entry with this
    /// `expires_at`
    pub fn unregister_if_generation(&self, key: &str, expires_at: Option<DateTime<Utc>>) -> bool {
        let mut inner = self.inner.lock();
        let current = match inner.by_key.get(key) {
            Some(entry) => entry.expires_at,
            None => return false,
        };
        if current != expires_at {
            return false;
        }
        if let Some(old) = inner.by_key.remove(key) {
            inner.detach(key, &old.tags);
        }
        true
    }

    /// Keys currently carrying `tag`
    pub fn keys_for_tag(&self, tag: &str) -> BTreeSet<String> {
        self.inner
            .lock()
            .by_tag
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tags registered for `key`
    pub fn tags_for_key(&self, key: &str) -> BTreeSet<String> {
        self.inner
            .lock()
            .by_key
            .get(key)
            .map(|e| e.tags.clone())
            .unwrap_or_default()
    }

    /// Remove `tag` and return the keys that carried it; those keys lose
    /// all their registrations since their entries are about to be dropped
    pub fn take_tag(&self, tag: &str) -> BTreeSet<String> {
        let mut inner = self.inner.lock();
        let Some(keys) = inner.by_tag.remove(tag) else {
            return BTreeSet::new();
        };
        let keys: BTreeSet<String> = keys.into_iter().collect();
        for key in &keys {
            if let Some(old) = inner.by_key.remove(key) {
                inner.detach(key, &old.tags);
            }
        }
        keys
    }

    /// Number of tagged keys
    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct tags
    pub fn tag_count(&self) -> usize {
        self.inner.lock().by_tag.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.by_tag.clear();
        inner.by_key.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_register_and_lookup() {
        let index = TagIndex::new();
        index.register("a", ["t1", "t2"], None);
        index.register("b", ["t1"], None);

        assert_eq!(index.keys_for_tag("t1"), set(&["a", "b"]));
        assert_eq!(index.keys_for_tag("t2"), set(&["a"]));
        assert!(index.keys_for_tag("t3").is_empty());
        assert_eq!(index.tag_count(), 2);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_register_replaces_tag_set() {
        let index = TagIndex::new();
        index.register("a", ["old"], None);
        index.register("a", ["new"], None);

        assert!(index.keys_for_tag("old").is_empty());
        assert_eq!(index.keys_for_tag("new"), set(&["a"]));
        assert_eq!(index.tag_count(), 1);
    }

    #[test]
    fn test_register_without_tags_forgets_key() {
        let index = TagIndex::new();
        index.register("a", ["t"], None);
        index.register("a", Vec::<String>::new(), None);
        assert!(index.is_empty());
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_add_and_remove() {
        let index = TagIndex::new();
        index.add("t1", "a");
        index.add("t2", "a");
        assert_eq!(index.tags_for_key("a").len(), 2);

        index.remove("t1", "a");
        assert!(index.keys_for_tag("t1").is_empty());
        assert_eq!(index.keys_for_tag("t2"), set(&["a"]));

        index.remove("t2", "a");
        assert!(index.is_empty());
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_take_tag_removes_every_registration_of_the_keys() {
        let index = TagIndex::new();
        index.register("a", ["t1", "t2"], None);
        index.register("b", ["t2"], None);

        assert_eq!(index.take_tag("t1"), set(&["a"]));
        assert_eq!(index.keys_for_tag("t2"), set(&["b"]));
        assert!(index.take_tag("t1").is_empty());
    }

    #[test]
    fn test_generation_guard() {
        let index = TagIndex::new();
        let first = Utc::now();
        let second = first + Duration::seconds(60);

        index.register("a", ["t"], Some(first));
        index.register("a", ["t"], Some(second));

        // An expiry observed on the first write must not drop the second
        assert!(!index.unregister_if_generation("a", Some(first)));
        assert_eq!(index.keys_for_tag("t"), set(&["a"]));

        assert!(index.unregister_if_generation("a", Some(second)));
        assert!(index.keys_for_tag("t").is_empty());
    }

    #[test]
    fn test_merge_stamps_new_keys_with_their_expiry() {
        let index = TagIndex::new();
        let expires = Utc::now() + Duration::milliseconds(20);

        index.merge("a", ["t1", "t2"], Some(expires));
        assert_eq!(index.tags_for_key("a"), set(&["t1", "t2"]));

        assert!(index.unregister_if_generation("a", Some(expires)));
        assert!(index.keys_for_tag("t1").is_empty());
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_merge_keeps_existing_generation_and_tags() {
        let index = TagIndex::new();
        let first = Utc::now();
        let other = first + Duration::seconds(5);

        index.register("a", ["t1"], Some(first));
        index.merge("a", ["t2"], Some(other));
        assert_eq!(index.tags_for_key("a"), set(&["t1", "t2"]));

        assert!(!index.unregister_if_generation("a", Some(other)));
        assert!(index.unregister_if_generation("a", Some(first)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_unregister_and_clear() {
        let index = TagIndex::new();
        index.register("a", ["t"], None);
        assert!(index.unregister("a"));
        assert!(!index.unregister("a"));

        index.register("b", ["t"], None);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.tag_count(), 0);
    }
}
