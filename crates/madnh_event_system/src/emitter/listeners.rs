/// Listener registration and removal
use super::{EventBucket, EventEmitter, ListenerFn};
use crate::content::ContentKey;
use crate::utils::unique_id;
use compact_str::CompactString;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key shared by every listener registered in one `add_listener` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey(CompactString);

impl ListenerKey {
    pub fn generate() -> Self {
        Self(unique_id("listener_key_"))
    }

    pub fn new(key: impl Into<CompactString>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered listener of one event.
pub struct Listener {
    callback: Arc<ListenerFn>,
    key: ListenerKey,
    priority: i32,
    is_async: bool,
    /// Calls left, `None` for unlimited
    remaining: Option<AtomicUsize>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("is_async", &self.is_async)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl Listener {
    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Calls left before the listener goes quiet, `None` when unlimited.
    pub fn remaining(&self) -> Option<usize> {
        self.remaining
            .as_ref()
            .map(|remaining| remaining.load(Ordering::Acquire))
    }

    pub(crate) fn is_callback(&self, callback: &Arc<ListenerFn>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.callback), Arc::as_ptr(callback))
    }

    /// Takes one call from the budget.
    ///
    /// Returns `None` when the budget is already spent, otherwise whether
    /// this call was the last one.
    pub(crate) fn consume(&self) -> Option<bool> {
        match &self.remaining {
            None => Some(false),
            Some(remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
                .ok()
                .map(|before| before == 1),
        }
    }

    pub(crate) fn call(&self, data: &Value) {
        (self.callback)(data)
    }
}

/// Options for [`EventEmitter::add_listener`].
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Dispatch priority, lower runs first. Defaults to the emitter config.
    pub priority: Option<i32>,
    /// Number of calls before the listener is dropped. `None` is unlimited.
    pub times: Option<usize>,
    /// Registration key to reuse instead of generating one.
    pub key: Option<ListenerKey>,
    /// Run through the scheduler instead of on the emitting stack.
    pub is_async: bool,
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn times(mut self, times: usize) -> Self {
        self.times = Some(times);
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn key(mut self, key: ListenerKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn is_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }
}

impl EventEmitter {
    /// Registers every listener on every event under one shared key.
    ///
    /// Exceeding the per-event listener limit only logs a warning.
    pub fn add_listener<E, S>(
        &self,
        events: E,
        listeners: Vec<Arc<ListenerFn>>,
        options: ListenerOptions,
    ) -> ListenerKey
    where
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = options.key.clone().unwrap_or_else(ListenerKey::generate);
        let priority = options.priority.unwrap_or(self.config.default_priority);

        if options.times == Some(0) {
            return key;
        }

        let mut state = self.state();
        for event in events {
            let event = CompactString::new(event.as_ref());
            let limit = state
                .limits
                .get(&event)
                .copied()
                .unwrap_or(self.config.listener_limit);
            let bucket = state.events.entry(event.clone()).or_default();

            for callback in &listeners {
                let count = bucket.priority.len();
                if limit >= 0 && count as i64 >= limit {
                    warn!(
                        "⚠️ Possible listener leak on {}: event '{}' already has {} listeners (limit {}), use set_limit() to raise it",
                        self.id, event, count, limit
                    );
                }

                let listener = Arc::new(Listener {
                    callback: Arc::clone(callback),
                    key: key.clone(),
                    priority,
                    is_async: options.is_async,
                    remaining: options.times.map(AtomicUsize::new),
                });
                let content_key = bucket.priority.add_content(listener, priority, Value::Null);
                bucket
                    .key_mapped
                    .entry(key.clone())
                    .or_default()
                    .push(content_key);
            }
            // Empty listener list: no bucket should survive.
            if bucket.is_empty() {
                state.events.remove(&event);
            }
        }
        debug!("📝 Registered listener key {} on {}", key, self.id);
        key
    }

    /// Registers `listener` on `event` at the default priority.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_with(event, listener, ListenerOptions::default())
    }

    pub fn on_with<F>(&self, event: &str, listener: F, options: ListenerOptions) -> ListenerKey
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_listener([event], vec![Arc::new(listener) as Arc<ListenerFn>], options)
    }

    /// Registers a listener that runs through the scheduler.
    pub fn on_async<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_with(event, listener, ListenerOptions::new().is_async(true))
    }

    /// Registers a listener that runs at most once.
    pub fn add_once_listener<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_with(event, listener, ListenerOptions::new().once())
    }

    /// Shorthand for [`EventEmitter::add_once_listener`].
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_once_listener(event, listener)
    }

    /// Registers a listener that runs at most `times` times.
    pub fn add_listener_times<F>(&self, event: &str, listener: F, times: usize) -> ListenerKey
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_with(event, listener, ListenerOptions::new().times(times))
    }

    /// Removes everything registered under `key`, across all events.
    /// Returns how many listener entries were removed.
    pub fn remove_listener(&self, key: &ListenerKey) -> usize {
        let mut state = self.state();
        let mut removed = 0;
        for bucket in state.events.values_mut() {
            if let Some(entries) = bucket.key_mapped.get(key).cloned() {
                removed += bucket.remove_entries(&entries);
            }
        }
        prune_empty(&mut state.events);
        if removed > 0 {
            debug!("🗑️ Removed {} listener(s) with key {} from {}", removed, key, self.id);
        }
        removed
    }

    /// Removes registrations of this exact callback, optionally only those
    /// at `priority`. Returns how many listener entries were removed.
    pub fn remove_listener_fn(&self, callback: &Arc<ListenerFn>, priority: Option<i32>) -> usize {
        let mut state = self.state();
        let mut removed = 0;
        for bucket in state.events.values_mut() {
            let matching: Vec<ContentKey> = bucket
                .priority
                .get_keyed_contents()
                .into_iter()
                .filter(|(_, listener)| {
                    listener.is_callback(callback)
                        && priority.map_or(true, |priority| listener.priority == priority)
                })
                .map(|(key, _)| key)
                .collect();
            removed += bucket.remove_entries(&matching);
        }
        prune_empty(&mut state.events);
        removed
    }

    /// Drops every listener of the named events.
    pub fn remove_event<E, S>(&self, events: E) -> usize
    where
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        events
            .into_iter()
            .filter_map(|event| state.events.remove(event.as_ref()))
            .map(|bucket| bucket.priority.len())
            .sum()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.state().events.contains_key(event)
    }

    /// True if any event still holds a listener registered under `key`.
    pub fn has_listener(&self, key: &ListenerKey) -> bool {
        self.state()
            .events
            .values()
            .any(|bucket| bucket.key_mapped.contains_key(key))
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.state()
            .events
            .get(event)
            .map_or(0, |bucket| bucket.priority.len())
    }

    /// Names of events that currently have listeners.
    pub fn events(&self) -> Vec<CompactString> {
        self.state().events.keys().cloned().collect()
    }

    /// Overrides the listener limit for one event (-1 disables the check).
    pub fn set_limit(&self, event: &str, limit: i64) {
        self.state().limits.insert(CompactString::new(event), limit);
    }

    /// Listener limit in effect for `event`.
    pub fn limit(&self, event: &str) -> i64 {
        self.state()
            .limits
            .get(event)
            .copied()
            .unwrap_or(self.config.listener_limit)
    }

    /// Drops the entry of a listener whose call budget just ran out.
    pub(crate) fn remove_exhausted(&self, event: &str, listener: &Arc<Listener>) {
        let mut state = self.state();
        let Some(bucket) = state.events.get_mut(event) else {
            return;
        };
        let matching: Vec<ContentKey> = bucket
            .priority
            .get_keyed_contents()
            .into_iter()
            .filter(|(_, stored)| Arc::ptr_eq(stored, listener))
            .map(|(key, _)| key)
            .collect();
        bucket.remove_entries(&matching);
        if bucket.is_empty() {
            state.events.remove(event);
        }
    }
}

fn prune_empty(events: &mut HashMap<CompactString, EventBucket>) {
    events.retain(|_, bucket| !bucket.is_empty());
}
