/// Follower graph: attach/detach handshakes, notices, mimics and private events
use super::{EventEmitter, Follower, NOTICED};
use crate::error::EmitterError;
use compact_str::{format_compact, CompactString};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// Options for the attach family.
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Only these events are noticed (empty means all)
    pub only: Vec<CompactString>,
    /// These events are never noticed
    pub excepts: Vec<CompactString>,
    /// Deliver notices through the scheduler (false is a "hard" attach)
    pub is_async: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            excepts: Vec::new(),
            is_async: true,
        }
    }
}

impl AttachOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.only = events.into_iter().map(|e| CompactString::new(e.as_ref())).collect();
        self
    }

    pub fn excepts<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excepts = events.into_iter().map(|e| CompactString::new(e.as_ref())).collect();
        self
    }

    /// Synchronous notices.
    pub fn hard(mut self) -> Self {
        self.is_async = false;
        self
    }
}

/// What a follower records about an emitter it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Following {
    pub id: CompactString,
    pub kind: CompactString,
    pub only: Vec<CompactString>,
    pub excepts: Vec<CompactString>,
}

impl Following {
    /// Whether `event` passes the `only`/`excepts` filters.
    pub fn accepts(&self, event: &str) -> bool {
        (self.only.is_empty() || self.only.iter().any(|name| name.as_str() == event))
            && !self.excepts.iter().any(|name| name.as_str() == event)
    }
}

impl EventEmitter {
    /// Makes `other` a follower of this emitter, with async notices by
    /// default. Returns `Ok(false)` if it already was one.
    ///
    /// `other` records the relationship on its side as part of the call.
    pub fn attach(&self, other: &Arc<EventEmitter>, options: AttachOptions) -> Result<bool, EmitterError> {
        self.ensure_other(other)?;
        {
            let mut state = self.state();
            if state.followers.contains_key(other.id()) {
                return Ok(false);
            }
            state.followers.insert(
                CompactString::new(other.id()),
                Follower {
                    target: Arc::downgrade(other),
                    is_async: options.is_async,
                },
            );
        }
        debug!("🔗 {} is now followed by {}", self.id, other.id());

        let this = self.this_or_err()?;
        other.attach_to(&this, options)?;
        Ok(true)
    }

    /// [`EventEmitter::attach`] with synchronous notices.
    pub fn attach_hard(&self, other: &Arc<EventEmitter>, options: AttachOptions) -> Result<bool, EmitterError> {
        self.attach(other, options.hard())
    }

    /// Makes this emitter follow `other`, noticing only what passes the
    /// filters. Returns `Ok(false)` if it already followed it.
    pub fn attach_to(&self, other: &Arc<EventEmitter>, options: AttachOptions) -> Result<bool, EmitterError> {
        self.ensure_other(other)?;
        {
            let mut state = self.state();
            if state.following.contains_key(other.id()) {
                return Ok(false);
            }
            state.following.insert(
                CompactString::new(other.id()),
                Following {
                    id: CompactString::new(other.id()),
                    kind: CompactString::new(other.kind()),
                    only: options.only.clone(),
                    excepts: options.excepts.clone(),
                },
            );
        }
        debug!("🔗 {} now follows {}", self.id, other.id());

        let this = self.this_or_err()?;
        other.attach(&this, options)?;
        Ok(true)
    }

    /// Stops `other` from following this emitter, on both sides.
    pub fn detach(&self, other: &Arc<EventEmitter>) -> Result<bool, EmitterError> {
        self.ensure_other(other)?;
        if self.state().followers.remove(other.id()).is_none() {
            return Ok(false);
        }
        debug!("✂️ {} detached follower {}", self.id, other.id());

        let this = self.this_or_err()?;
        other.detach_from(&this)?;
        Ok(true)
    }

    /// Stops this emitter from following `other`, on both sides.
    pub fn detach_from(&self, other: &Arc<EventEmitter>) -> Result<bool, EmitterError> {
        self.ensure_other(other)?;
        if self.state().following.remove(other.id()).is_none() {
            return Ok(false);
        }
        debug!("✂️ {} stopped following {}", self.id, other.id());

        let this = self.this_or_err()?;
        other.detach(&this)?;
        Ok(true)
    }

    /// Receives an event from a followed emitter.
    ///
    /// Events from emitters this one does not follow, or filtered out by
    /// `only`/`excepts`, are ignored. Mimicked events are re-emitted under
    /// their own name with the original data; everything else becomes the
    /// `noticed` cascade.
    pub fn notice(&self, source_id: &str, event: &str, data: &Value) {
        let (source_kind, mimic) = {
            let state = self.state();
            let Some(following) = state.following.get(source_id) else {
                trace!("{} ignoring notice from unfollowed {}", self.id, source_id);
                return;
            };
            if !following.accepts(event) {
                return;
            }
            let kind = following.kind.clone();
            let mimic = state.mimics.iter().any(|pattern| {
                pattern.as_str() == event
                    || *pattern == format_compact!("{}.*", kind)
                    || *pattern == format_compact!("{}.{}", kind, event)
            });
            (kind, mimic)
        };

        if mimic {
            self.emit(event, data);
            return;
        }

        let payload = json!({
            "id": source_id,
            "type": source_kind.as_str(),
            "event": event,
            "data": data,
        });
        let cascade = [
            format_compact!("{}.{}", source_id, event),
            format_compact!("{}.{}", source_kind, event),
            format_compact!("{}.{}.{}", NOTICED, source_id, event),
            format_compact!("{}.{}", NOTICED, source_id),
            format_compact!("{}.{}.{}", NOTICED, source_kind, event),
            format_compact!("{}.{}", NOTICED, source_kind),
            CompactString::new(NOTICED),
        ];
        self.emit_event(&cascade, &payload);
    }

    /// Adds mimic patterns: `event`, `<type>.*` or `<type>.<event>`.
    pub fn mimic<I, S>(&self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if !state.mimics.iter().any(|existing| existing.as_str() == pattern) {
                state.mimics.push(CompactString::new(pattern));
            }
        }
    }

    pub fn unmimic<I, S>(&self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            state.mimics.retain(|existing| existing.as_str() != pattern);
        }
    }

    pub fn is_mimic(&self, pattern: &str) -> bool {
        self.state().mimics.iter().any(|existing| existing.as_str() == pattern)
    }

    pub fn mimics(&self) -> Vec<CompactString> {
        self.state().mimics.clone()
    }

    /// Marks events as private: they are never pushed to followers.
    pub fn private_events<I, S>(&self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        for event in events {
            state.privates.insert(CompactString::new(event.as_ref()));
        }
    }

    pub fn public_events<I, S>(&self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state();
        for event in events {
            state.privates.remove(event.as_ref());
        }
    }

    pub fn is_private(&self, event: &str) -> bool {
        self.state().privates.contains(event)
    }

    /// Ids of the emitters following this one.
    pub fn followers(&self) -> Vec<CompactString> {
        self.state().followers.keys().cloned().collect()
    }

    /// Emitters this one follows, with their filters.
    pub fn following(&self) -> Vec<Following> {
        self.state().following.values().cloned().collect()
    }

    pub fn is_followed_by(&self, id: &str) -> bool {
        self.state().followers.contains_key(id)
    }

    pub fn is_following(&self, id: &str) -> bool {
        self.state().following.contains_key(id)
    }

    fn ensure_other(&self, other: &Arc<EventEmitter>) -> Result<(), EmitterError> {
        if std::ptr::eq(self, Arc::as_ptr(other)) {
            return Err(EmitterError::InvalidEmitter(format!(
                "{} cannot attach to or detach from itself",
                self.id
            )));
        }
        if self.id == other.id {
            return Err(EmitterError::InvalidEmitter(format!(
                "another emitter already uses the id {}",
                self.id
            )));
        }
        Ok(())
    }

    fn this_or_err(&self) -> Result<Arc<EventEmitter>, EmitterError> {
        self.this()
            .ok_or_else(|| EmitterError::InvalidEmitter(format!("{} is being dropped", self.id)))
    }
}
