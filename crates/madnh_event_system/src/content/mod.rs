//! Keyed storage of typed content with metadata.
//!
//! A [`ContentManager`] groups contents into buckets by a type tag. Every
//! stored content gets a [`ContentKey`] of the form `content_<type>_<n>`, so
//! the bucket of a key can always be recovered from the key alone. On top of
//! storage sits a small "in use" bookkeeping layer used by callers that hand
//! keys out to other structures (see [`crate::priority::Priority`]).
//!
//! Identity, not structure, decides equality: two contents are the same if
//! they are the same `Arc` allocation.

use compact_str::{format_compact, CompactString};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::utils::{next_sequence, short_type_name};

const KEY_PREFIX: &str = "content_";

/// Runtime type tag for contents stored without an explicit type.
pub trait Classify {
    /// Type tag of this content. Defaults to the short, lower-cased Rust
    /// type name.
    fn content_type(&self) -> CompactString {
        short_type_name(std::any::type_name::<Self>())
    }
}

impl Classify for Value {
    fn content_type(&self) -> CompactString {
        let tag = match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        CompactString::new(tag)
    }
}

impl Classify for String {
    fn content_type(&self) -> CompactString {
        CompactString::new("string")
    }
}

impl Classify for str {
    fn content_type(&self) -> CompactString {
        CompactString::new("string")
    }
}

/// Key of a stored content, `content_<type>_<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(CompactString);

impl ContentKey {
    fn generate(content_type: &str) -> Self {
        Self(format_compact!(
            "{}{}_{}",
            KEY_PREFIX,
            content_type,
            next_sequence()
        ))
    }

    /// Wraps an existing key string without validating it.
    pub fn from_raw(key: impl Into<CompactString>) -> Self {
        Self(key.into())
    }

    /// The type segment embedded in the key, if the key is well formed.
    pub fn content_type(&self) -> Option<&str> {
        parse_key_type(&self.0)
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ContentKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Extracts the type segment of a `content_<type>_<n>` key.
pub fn parse_key_type(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(KEY_PREFIX)?;
    let (content_type, sequence) = rest.rsplit_once('_')?;
    if content_type.is_empty()
        || sequence.is_empty()
        || !sequence.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some(content_type)
}

/// A stored content together with its metadata.
#[derive(Debug)]
pub struct ContentEntry<T: ?Sized> {
    pub content: Arc<T>,
    pub meta: Value,
}

impl<T: ?Sized> Clone for ContentEntry<T> {
    fn clone(&self) -> Self {
        Self {
            content: Arc::clone(&self.content),
            meta: self.meta.clone(),
        }
    }
}

/// Where a content lives: its type bucket and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentPosition {
    pub content_type: CompactString,
    pub key: ContentKey,
}

/// Typed content storage with usage tracking.
#[derive(Debug)]
pub struct ContentManager<T: ?Sized> {
    contents: HashMap<CompactString, HashMap<ContentKey, ContentEntry<T>>>,
    using: HashSet<ContentKey>,
}

impl<T: ?Sized> Default for ContentManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ContentManager<T> {
    pub fn new() -> Self {
        Self {
            contents: HashMap::new(),
            using: HashSet::new(),
        }
    }

    /// Stores `content` under an explicit type tag. Always creates a new
    /// entry, even when the same content is already stored.
    pub fn add_typed(&mut self, content: Arc<T>, meta: Value, content_type: &str) -> ContentKey {
        let content_type = normalize_type(content_type);
        let key = ContentKey::generate(&content_type);
        trace!("Adding content {}", key);
        self.contents
            .entry(content_type)
            .or_default()
            .insert(key.clone(), ContentEntry { content, meta });
        key
    }

    /// Returns the key of `content` if it is already stored in the
    /// `content_type` bucket, otherwise stores it.
    pub fn add_unique_typed(
        &mut self,
        content: Arc<T>,
        meta: Value,
        content_type: &str,
    ) -> ContentKey {
        let content_type = normalize_type(content_type);
        match self.content_positions(&content, Some(content_type.as_str())).into_iter().next() {
            Some(position) => position.key,
            None => self.add_typed(content, meta, &content_type),
        }
    }

    /// Finds every position holding this exact allocation, optionally
    /// restricted to one type bucket.
    pub fn content_positions(&self, content: &Arc<T>, content_type: Option<&str>) -> Vec<ContentPosition> {
        let mut positions = Vec::new();
        let mut scan = |bucket_type: &CompactString, bucket: &HashMap<ContentKey, ContentEntry<T>>| {
            for (key, entry) in bucket {
                if same_content(&entry.content, content) {
                    positions.push(ContentPosition {
                        content_type: bucket_type.clone(),
                        key: key.clone(),
                    });
                }
            }
        };

        match content_type {
            Some(content_type) => {
                if let Some((bucket_type, bucket)) = self.contents.get_key_value(content_type) {
                    scan(bucket_type, bucket);
                }
            }
            None => {
                for (bucket_type, bucket) in &self.contents {
                    scan(bucket_type, bucket);
                }
            }
        }
        positions
    }

    pub fn has_content(&self, content: &Arc<T>, content_type: Option<&str>) -> bool {
        !self.content_positions(content, content_type).is_empty()
    }

    /// True when `key` is stored (and belongs to `content_type` if given).
    ///
    /// A key marked as in use also counts as present, even if its storage
    /// is gone.
    pub fn has_key(&self, key: &str, content_type: Option<&str>) -> bool {
        if self.using.contains(key) {
            return true;
        }
        let Some(key_type) = parse_key_type(key) else {
            return false;
        };
        if content_type.is_some_and(|wanted| wanted != key_type) {
            return false;
        }
        self.contents
            .get(key_type)
            .is_some_and(|bucket| bucket.contains_key(key))
    }

    pub fn has_type(&self, content_type: &str) -> bool {
        self.contents.contains_key(content_type)
    }

    /// Type tags that currently have a bucket.
    pub fn types(&self) -> Vec<CompactString> {
        self.contents.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<&ContentEntry<T>> {
        let key_type = parse_key_type(key)?;
        self.contents.get(key_type)?.get(key)
    }

    pub fn get_content(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).map(|entry| Arc::clone(&entry.content))
    }

    pub fn get_content_or(&self, key: &str, default: Arc<T>) -> Arc<T> {
        self.get_content(key).unwrap_or(default)
    }

    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.get(key).map(|entry| &entry.meta)
    }

    pub fn get_meta_or(&self, key: &str, default: Value) -> Value {
        self.get_meta(key).cloned().unwrap_or(default)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut ContentEntry<T>> {
        let key_type = parse_key_type(key)?;
        self.contents.get_mut(key_type)?.get_mut(key)
    }

    /// Replaces the content stored under `key`. Returns false if absent.
    pub fn update(&mut self, key: &str, content: Arc<T>) -> bool {
        match self.get_mut(key) {
            Some(entry) => {
                entry.content = content;
                true
            }
            None => false,
        }
    }

    /// Replaces the metadata stored under `key`. Returns false if absent.
    pub fn update_meta(&mut self, key: &str, meta: Value) -> bool {
        match self.get_mut(key) {
            Some(entry) => {
                entry.meta = meta;
                true
            }
            None => false,
        }
    }

    /// Removes the given keys, clears their usage marks and prunes empty
    /// buckets. Returns the positions that were actually removed.
    pub fn remove<'a, I>(&mut self, keys: I) -> Vec<ContentPosition>
    where
        I: IntoIterator<Item = &'a ContentKey>,
    {
        let mut removed = Vec::new();
        for key in keys {
            self.using.remove(key);
            let Some(key_type) = key.content_type() else {
                continue;
            };
            let removed_entry = self
                .contents
                .get_mut(key_type)
                .and_then(|bucket| bucket.remove(key));
            if removed_entry.is_some() {
                removed.push(ContentPosition {
                    content_type: CompactString::new(key_type),
                    key: key.clone(),
                });
            }
        }
        self.clean();
        removed
    }

    /// Removes every position holding `content`.
    pub fn remove_content(&mut self, content: &Arc<T>, content_type: Option<&str>) -> Vec<ContentPosition> {
        let keys: Vec<ContentKey> = self
            .content_positions(content, content_type)
            .into_iter()
            .map(|position| position.key)
            .collect();
        self.remove(&keys)
    }

    /// Drops a whole type bucket. Usage marks are left untouched.
    pub fn remove_type(&mut self, content_type: &str) -> Vec<ContentKey> {
        self.contents
            .remove(content_type)
            .map(|bucket| bucket.into_keys().collect())
            .unwrap_or_default()
    }

    /// Marks or unmarks `key` as in use.
    pub fn using(&mut self, key: &ContentKey, is_using: bool) {
        if is_using {
            self.using.insert(key.clone());
        } else {
            self.using.remove(key);
        }
    }

    pub fn unused<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a ContentKey>,
    {
        for key in keys {
            self.using.remove(key);
        }
    }

    pub fn is_using(&self, key: &str) -> bool {
        self.using.contains(key)
    }

    pub fn using_keys(&self) -> Vec<ContentKey> {
        self.using.iter().cloned().collect()
    }

    /// Removes every stored content that is marked in use.
    pub fn remove_using(&mut self) -> Vec<ContentPosition> {
        let keys: Vec<ContentKey> = self.using.iter().cloned().collect();
        self.remove(&keys)
    }

    /// Removes every stored content that is not marked in use.
    pub fn remove_unusing(&mut self) -> Vec<ContentPosition> {
        let keys: Vec<ContentKey> = self
            .contents
            .values()
            .flat_map(|bucket| bucket.keys())
            .filter(|key| !self.using.contains(*key))
            .cloned()
            .collect();
        self.remove(&keys)
    }

    /// Prunes empty type buckets.
    pub fn clean(&mut self) {
        self.contents.retain(|_, bucket| !bucket.is_empty());
    }

    /// Total number of stored contents.
    pub fn len(&self) -> usize {
        self.contents.values().map(HashMap::len).sum()
    }

    /// Number of contents in one type bucket.
    pub fn count(&self, content_type: &str) -> usize {
        self.contents.get(content_type).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.values().all(HashMap::is_empty)
    }
}

impl<T: ?Sized + Classify> ContentManager<T> {
    /// Stores `content` under its own [`Classify`] type tag.
    pub fn add(&mut self, content: Arc<T>, meta: Value) -> ContentKey {
        let content_type = content.content_type();
        self.add_typed(content, meta, &content_type)
    }

    /// Like [`ContentManager::add`], but returns the existing key when the
    /// same allocation is already stored under its type tag.
    pub fn add_unique(&mut self, content: Arc<T>, meta: Value) -> ContentKey {
        let content_type = content.content_type();
        self.add_unique_typed(content, meta, &content_type)
    }
}

#[inline]
fn same_content<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn normalize_type(content_type: &str) -> CompactString {
    let trimmed = content_type.trim();
    if trimmed.is_empty() {
        CompactString::new("unknown")
    } else {
        CompactString::new(trimmed)
    }
}
