//! # Event Emitter
//!
//! A per-object registry of named events and their listeners, with
//! priority-ordered dispatch and a follower graph between emitters.
//!
//! ## Dispatch
//!
//! Listeners of one event are stored in a [`Priority`] and run in ascending
//! priority order, first-in first-out within a level. Synchronous listeners
//! run on the emitting call stack; async listeners are handed to the
//! emitter's [`Scheduler`]. The listener list is snapshotted before the
//! first call, so listeners added or removed during an emission only affect
//! later emissions.
//!
//! Every emission (other than of [`EVENT_EMITTED`] itself) is followed by an
//! [`EVENT_EMITTED`] meta-event carrying `[event, data]`.
//!
//! ## Followers
//!
//! `source.attach(&follower, ..)` makes `follower` receive a
//! [`EventEmitter::notice`] for every non-private event `source` emits. A
//! notice either re-emits the event verbatim (when it matches one of the
//! follower's mimic patterns) or emits the `noticed` cascade:
//!
//! - `<source id>.<event>`
//! - `<source type>.<event>`
//! - `noticed.<source id>.<event>`
//! - `noticed.<source id>`
//! - `noticed.<source type>.<event>`
//! - `noticed.<source type>`
//! - `noticed`
//!
//! each carrying `{id, type, event, data}`. Attaching is a handshake: the
//! source records the follower, the follower records what it follows (with
//! optional `only`/`excepts` filters), whichever side starts it.

mod attach;
mod emit;
mod listeners;

#[cfg(test)]
mod tests;

pub use attach::{AttachOptions, Following};
pub use listeners::{Listener, ListenerKey, ListenerOptions};

use compact_str::CompactString;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::config::EmitterConfig;
use crate::content::ContentKey;
use crate::priority::Priority;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::utils::unique_id;

/// Meta-event emitted after every other event, with `[event, data]`.
pub const EVENT_EMITTED: &str = "event_emitted";

/// Root name of the notice cascade.
pub const NOTICED: &str = "noticed";

/// Listener callback.
pub type ListenerFn = dyn Fn(&Value) + Send + Sync;

/// Listeners of one event.
#[derive(Debug, Default)]
pub(crate) struct EventBucket {
    pub(crate) priority: Priority<Listener>,
    /// Registration key to the priority entries it created in this event.
    pub(crate) key_mapped: HashMap<ListenerKey, SmallVec<[ContentKey; 4]>>,
}

impl EventBucket {
    /// Removes priority entries and scrubs them from the key map.
    pub(crate) fn remove_entries(&mut self, keys: &[ContentKey]) -> usize {
        let removed = self.priority.remove_keys(keys);
        if !removed.is_empty() {
            for entries in self.key_mapped.values_mut() {
                entries.retain(|key| !removed.contains(key));
            }
            self.key_mapped.retain(|_, entries| !entries.is_empty());
        }
        removed.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.priority.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct Follower {
    pub(crate) target: Weak<EventEmitter>,
    pub(crate) is_async: bool,
}

#[derive(Debug, Default)]
pub(crate) struct EmitterState {
    pub(crate) events: HashMap<CompactString, EventBucket>,
    pub(crate) emitted: HashMap<CompactString, u64>,
    pub(crate) limits: HashMap<CompactString, i64>,
    pub(crate) followers: HashMap<CompactString, Follower>,
    pub(crate) following: HashMap<CompactString, Following>,
    pub(crate) mimics: Vec<CompactString>,
    pub(crate) privates: HashSet<CompactString>,
}

/// Named-event listener registry with priority dispatch and followers.
///
/// Always handled through an `Arc`; construct with [`EventEmitter::new`] or
/// [`EventEmitter::builder`].
pub struct EventEmitter {
    id: CompactString,
    kind: CompactString,
    config: EmitterConfig,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<EmitterState>,
    this: Weak<EventEmitter>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("EventEmitter")
            .field("id", &self.id)
            .field("type", &self.kind)
            .field("events", &state.events.len())
            .field("followers", &state.followers.len())
            .field("following", &state.following.len())
            .finish()
    }
}

/// Builder for [`EventEmitter`].
#[derive(Debug)]
pub struct EventEmitterBuilder {
    kind: CompactString,
    id: Option<CompactString>,
    config: EmitterConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl EventEmitterBuilder {
    /// Uses a fixed id instead of a generated `<type>_<n>` one.
    pub fn id(mut self, id: impl Into<CompactString>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn config(mut self, config: EmitterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Arc<EventEmitter> {
        let id = self
            .id
            .unwrap_or_else(|| unique_id(&format!("{}_", self.kind)));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));
        Arc::new_cyclic(|this| EventEmitter {
            id,
            kind: self.kind,
            config: self.config,
            scheduler,
            state: Mutex::new(EmitterState::default()),
            this: this.clone(),
        })
    }
}

impl EventEmitter {
    /// Creates an emitter of the given type with default settings.
    pub fn new(kind: &str) -> Arc<Self> {
        Self::builder(kind).build()
    }

    pub fn builder(kind: &str) -> EventEmitterBuilder {
        EventEmitterBuilder {
            kind: CompactString::new(kind),
            id: None,
            config: EmitterConfig::default(),
            scheduler: None,
        }
    }

    /// Unique id of this emitter.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Type tag of this emitter, e.g. `dialog`.
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[inline]
    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Drops every listener and every emission counter.
    ///
    /// Followers, following filters, mimics and private events are kept.
    pub fn reset_events(&self) {
        let mut state = self.state();
        state.events.clear();
        state.emitted.clear();
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn this(&self) -> Option<Arc<EventEmitter>> {
        self.this.upgrade()
    }

    pub(crate) fn weak(&self) -> Weak<EventEmitter> {
        self.this.clone()
    }
}
