//! Priority-ordered content lists.
//!
//! [`Priority`] stores its contents in a [`ContentManager`] under the
//! synthetic `priority` type and keeps, per numeric level, the keys in the
//! order they were added. Reading the contents back walks levels in
//! ascending order, so a lower number always comes first and equal levels
//! stay first-in first-out. Listener dispatch order depends on this.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::content::{ContentEntry, ContentKey, ContentManager};

/// Content type used for every entry stored through a [`Priority`].
pub const PRIORITY_CONTENT_TYPE: &str = "priority";

pub const PRIORITY_HIGHEST: i32 = 100;
pub const PRIORITY_HIGH: i32 = 250;
pub const PRIORITY_DEFAULT: i32 = 500;
pub const PRIORITY_LOW: i32 = 750;
pub const PRIORITY_LOWEST: i32 = 1000;

/// Contents bucketed by numeric priority.
#[derive(Debug)]
pub struct Priority<T: ?Sized> {
    manager: ContentManager<T>,
    priorities: BTreeMap<i32, Vec<ContentKey>>,
}

impl<T: ?Sized> Default for Priority<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Priority<T> {
    pub fn new() -> Self {
        Self {
            manager: ContentManager::new(),
            priorities: BTreeMap::new(),
        }
    }

    /// Appends `content` to the `priority` level and marks its key in use.
    pub fn add_content(&mut self, content: Arc<T>, priority: i32, meta: Value) -> ContentKey {
        let key = self.manager.add_typed(content, meta, PRIORITY_CONTENT_TYPE);
        self.manager.using(&key, true);
        self.priorities.entry(priority).or_default().push(key.clone());
        key
    }

    /// True if `content` is stored, at `priority` when one is given.
    pub fn has_content(&self, content: &Arc<T>, priority: Option<i32>) -> bool {
        !self.matching_keys(content, priority).is_empty()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.manager.has_key(key, Some(PRIORITY_CONTENT_TYPE))
    }

    /// All entries in dispatch order.
    pub fn get_contents(&self) -> Vec<ContentEntry<T>> {
        self.ordered_keys()
            .filter_map(|key| self.manager.get(key.as_str()).cloned())
            .collect()
    }

    /// Content values only, in dispatch order.
    pub fn get_content_values(&self) -> Vec<Arc<T>> {
        self.ordered_keys()
            .filter_map(|key| self.manager.get_content(key.as_str()))
            .collect()
    }

    /// Keys paired with their content, in dispatch order.
    pub fn get_keyed_contents(&self) -> Vec<(ContentKey, Arc<T>)> {
        self.ordered_keys()
            .filter_map(|key| {
                self.manager
                    .get_content(key.as_str())
                    .map(|content| (key.clone(), content))
            })
            .collect()
    }

    /// The level `key` was inserted at.
    pub fn priority_of(&self, key: &str) -> Option<i32> {
        self.priorities
            .iter()
            .find(|(_, keys)| keys.iter().any(|k| k.as_str() == key))
            .map(|(priority, _)| *priority)
    }

    /// Keys stored at one level, in insertion order.
    pub fn keys_at(&self, priority: i32) -> &[ContentKey] {
        self.priorities.get(&priority).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Levels currently holding at least one key, ascending.
    pub fn priorities(&self) -> Vec<i32> {
        self.priorities.keys().copied().collect()
    }

    /// Removes every entry holding `content`, optionally only at one level.
    pub fn remove_content(&mut self, content: &Arc<T>, priority: Option<i32>) -> Vec<ContentKey> {
        let keys = self.matching_keys(content, priority);
        self.remove_keys(&keys)
    }

    /// Removes the given keys from storage and from every level.
    pub fn remove_keys<'a, I>(&mut self, keys: I) -> Vec<ContentKey>
    where
        I: IntoIterator<Item = &'a ContentKey>,
    {
        let removed: Vec<ContentKey> = self
            .manager
            .remove(keys)
            .into_iter()
            .map(|position| position.key)
            .collect();

        if !removed.is_empty() {
            for level in self.priorities.values_mut() {
                level.retain(|key| !removed.contains(key));
            }
            self.priorities.retain(|_, level| !level.is_empty());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.priorities.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.priorities.is_empty()
    }

    pub fn clear(&mut self) {
        let keys: Vec<ContentKey> = self.priorities.values().flatten().cloned().collect();
        self.remove_keys(&keys);
    }

    fn ordered_keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.priorities.values().flatten()
    }

    fn matching_keys(&self, content: &Arc<T>, priority: Option<i32>) -> Vec<ContentKey> {
        let positions = self
            .manager
            .content_positions(content, Some(PRIORITY_CONTENT_TYPE));
        match priority {
            Some(priority) => {
                let level = self.keys_at(priority);
                positions
                    .into_iter()
                    .map(|position| position.key)
                    .filter(|key| level.contains(key))
                    .collect()
            }
            None => positions.into_iter().map(|position| position.key).collect(),
        }
    }
}
