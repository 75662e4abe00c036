/// Event emission and follower propagation
use super::{EventEmitter, Listener, EVENT_EMITTED};
use compact_str::CompactString;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

impl EventEmitter {
    /// Emits a single event.
    #[inline]
    pub fn emit(&self, event: &str, data: &Value) {
        self.emit_event([event], data);
    }

    /// Emits each named event in turn with the same data.
    ///
    /// For every event: listeners run in priority order (async ones through
    /// the scheduler), the emission counter is bumped if any listener was
    /// registered, an [`EVENT_EMITTED`] meta-event follows, and non-private
    /// events are pushed to followers.
    pub fn emit_event<E, S>(&self, events: E, data: &Value)
    where
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for event in events {
            self.emit_one(event.as_ref(), data);
        }
    }

    /// Like [`EventEmitter::emit_event`], then calls `final_cb` with the
    /// names that were emitted. Async listeners may still be pending.
    pub fn emit_event_then<E, S, F>(&self, events: E, data: &Value, final_cb: F)
    where
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&[CompactString]),
    {
        let names: Vec<CompactString> = events
            .into_iter()
            .map(|event| CompactString::new(event.as_ref()))
            .collect();
        self.emit_event(&names, data);
        final_cb(&names);
    }

    /// How many times `event` was emitted to at least one listener.
    pub fn emitted(&self, event: &str) -> u64 {
        self.state().emitted.get(event).copied().unwrap_or(0)
    }

    fn emit_one(&self, event: &str, data: &Value) {
        self.dispatch(event, data);
        if event == EVENT_EMITTED {
            return;
        }

        self.dispatch(EVENT_EMITTED, &json!([event, data]));
        if !self.is_private(event) {
            self.propagate(event, data);
        }
    }

    /// Runs the listeners of one event against a snapshot of the registry.
    fn dispatch(&self, event: &str, data: &Value) {
        let listeners: Vec<Arc<Listener>> = {
            let state = self.state();
            match state.events.get(event) {
                Some(bucket) => bucket.priority.get_content_values(),
                None => return,
            }
        };
        if listeners.is_empty() {
            return;
        }
        trace!("📤 {} emitting '{}' to {} listener(s)", self.id, event, listeners.len());

        for listener in &listeners {
            if listener.is_async() {
                let emitter = self.weak();
                let listener = Arc::clone(listener);
                let event = CompactString::new(event);
                let data = data.clone();
                self.scheduler().schedule(
                    self.config.async_delay(),
                    Box::new(move || invoke_deferred(&emitter, &event, &listener, &data)),
                );
            } else {
                self.invoke(event, listener, data);
            }
        }

        *self
            .state()
            .emitted
            .entry(CompactString::new(event))
            .or_insert(0) += 1;
    }

    pub(crate) fn invoke(&self, event: &str, listener: &Arc<Listener>, data: &Value) {
        let Some(exhausted) = listener.consume() else {
            return;
        };
        if exhausted {
            self.remove_exhausted(event, listener);
        }
        listener.call(data);
    }

    /// Pushes a notice for `event` to every live follower.
    fn propagate(&self, event: &str, data: &Value) {
        let followers: Vec<(CompactString, Weak<EventEmitter>, bool)> = {
            let state = self.state();
            if state.followers.is_empty() {
                return;
            }
            state
                .followers
                .iter()
                .map(|(id, follower)| (id.clone(), follower.target.clone(), follower.is_async))
                .collect()
        };

        let mut stale = Vec::new();
        for (follower_id, target, is_async) in followers {
            let Some(target) = target.upgrade() else {
                stale.push(follower_id);
                continue;
            };
            if is_async {
                let source_id = self.id.clone();
                let event = CompactString::new(event);
                let data = data.clone();
                self.scheduler().schedule(
                    self.config.async_delay(),
                    Box::new(move || target.notice(&source_id, &event, &data)),
                );
            } else {
                target.notice(&self.id, event, data);
            }
        }

        if !stale.is_empty() {
            debug!("🧹 {} dropping {} stale follower(s)", self.id, stale.len());
            let mut state = self.state();
            for follower_id in stale {
                state.followers.remove(&follower_id);
            }
        }
    }
}

/// Runs a deferred listener call. If the emitter is gone the listener still
/// runs, but there is no registry left to update.
fn invoke_deferred(emitter: &Weak<EventEmitter>, event: &str, listener: &Arc<Listener>, data: &Value) {
    match emitter.upgrade() {
        Some(emitter) => emitter.invoke(event, listener, data),
        None => {
            if listener.consume().is_some() {
                listener.call(data);
            }
        }
    }
}
