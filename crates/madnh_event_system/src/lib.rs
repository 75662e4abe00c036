//! # MadNH Event System
//!
//! Event plumbing for UI-style object graphs: per-object emitters with
//! priority-ordered listeners, a follower graph that forwards events between
//! emitters, and the small registries those emitters are built from.
//!
//! ## Core Features
//!
//! - **Content Manager**: typed, keyed storage with identity dedupe and in-use marks
//! - **Priority**: numeric priority levels over a content manager, FIFO within a level
//! - **Event Emitter**: multi-event registration, `once`/`times` listeners,
//!   async dispatch, follower notices, mimicry and private events
//! - **Scheduler**: pluggable deferral for async work, tokio-backed or manual
//! - **Waiter**: callbacks addressable by opaque string keys
//!
//! ## Quick Start Example
//!
//! ```rust
//! use madnh_event_system::*;
//! use serde_json::{json, Value};
//! use std::sync::{Arc, Mutex};
//!
//! let dialog = EventEmitter::new("dialog");
//! let app = EventEmitter::new("app");
//! dialog.attach_hard(&app, AttachOptions::new()).unwrap();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! app.on("dialog.open", move |notice: &Value| {
//!     sink.lock().unwrap().push(notice["data"].clone());
//! });
//!
//! dialog.emit("open", &json!({"title": "Hello"}));
//! assert_eq!(*seen.lock().unwrap(), vec![json!({"title": "Hello"})]);
//! ```

pub mod config;
pub mod content;
pub mod emitter;
pub mod error;
pub mod priority;
pub mod scheduler;
pub mod utils;
pub mod waiter;

pub use config::{EmitterConfig, UNLIMITED_LISTENERS};
pub use content::{Classify, ContentEntry, ContentKey, ContentManager, ContentPosition};
pub use emitter::{
    AttachOptions, EventEmitter, EventEmitterBuilder, Following, Listener, ListenerFn,
    ListenerKey, ListenerOptions, EVENT_EMITTED, NOTICED,
};
pub use error::{EmitterError, MadnhError, WaiterError};
pub use priority::{
    Priority, PRIORITY_DEFAULT, PRIORITY_HIGH, PRIORITY_HIGHEST, PRIORITY_LOW, PRIORITY_LOWEST,
};
pub use scheduler::{ManualScheduler, Scheduler, Task, TokioScheduler};
pub use waiter::{Callback, GlobalScope, Runner, Waiter};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, MadnhError>;

/// Crate version, for embedders that log it at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
