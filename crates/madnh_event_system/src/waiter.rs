//! # Waiter
//!
//! A registry mapping opaque string keys to callbacks, so a callback can be
//! handed around as a plain string (for instance inside generated markup)
//! and resolved back later.
//!
//! [`Waiter::create_func`] additionally installs the callback under its key
//! in a [`GlobalScope`], the process-wide function namespace embedders
//! resolve names against. The scope is injected rather than global, so
//! several independent registries can coexist.
//!
//! ```rust
//! use madnh_event_system::{Callback, Waiter};
//! use serde_json::{json, Value};
//!
//! let waiter = Waiter::new();
//! let key = waiter.add(|args: &[Value]| json!(args.len()), true, "count args");
//!
//! let result = waiter.call_func(&Callback::name(&key), &[json!(1), json!(2)]).unwrap();
//! assert_eq!(result, json!(2));
//! assert!(!waiter.has(&key));
//! ```

use crate::error::WaiterError;
use crate::utils::opaque_id;
use compact_str::CompactString;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Callable stored in a [`Waiter`] or a [`GlobalScope`]. Arguments arrive
/// spread as a slice.
pub type Runner = dyn Fn(&[Value]) -> Value + Send + Sync;

/// Named functions callable from string-only contexts.
#[derive(Default)]
pub struct GlobalScope {
    functions: DashMap<CompactString, Arc<Runner>>,
}

impl fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalScope")
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `function` under `name`, returning whatever it replaced.
    pub fn install(&self, name: &str, function: Arc<Runner>) -> Option<Arc<Runner>> {
        self.functions.insert(CompactString::new(name), function)
    }

    pub fn uninstall(&self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Calls the function installed under `name`, if any.
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Value> {
        // Clone out so the shard lock is released before running user code.
        let function = self.functions.get(name).map(|entry| Arc::clone(entry.value()))?;
        Some(function(args))
    }

    pub fn names(&self) -> Vec<CompactString> {
        self.functions.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// A callback given either directly or by name.
#[derive(Clone)]
pub enum Callback {
    Func(Arc<Runner>),
    /// A waiter key or the name of a function in the global scope
    Name(CompactString),
}

impl Callback {
    pub fn func<F>(runner: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Callback::Func(Arc::new(runner))
    }

    pub fn name(name: &str) -> Self {
        Callback::Name(CompactString::new(name))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Func(_) => f.write_str("Callback::Func(..)"),
            Callback::Name(name) => f.debug_tuple("Callback::Name").field(name).finish(),
        }
    }
}

impl From<&str> for Callback {
    fn from(name: &str) -> Self {
        Callback::name(name)
    }
}

struct WaiterEntry {
    runner: Arc<Runner>,
    once: bool,
    description: CompactString,
    /// Also installed in the global scope under the same key
    aliased: bool,
}

struct WaiterInner {
    waiters: DashMap<CompactString, WaiterEntry>,
    scope: Arc<GlobalScope>,
}

impl WaiterInner {
    fn run(&self, key: &str, args: &[Value]) -> Option<Value> {
        let (runner, once) = {
            let entry = self.waiters.get(key)?;
            (Arc::clone(&entry.runner), entry.once)
        };
        // Once-only entries leave the registry before running so a
        // concurrent or re-entrant run cannot call them a second time.
        if once && !self.remove_one(key) {
            return None;
        }
        Some(runner(args))
    }

    fn remove_one(&self, key: &str) -> bool {
        match self.waiters.remove(key) {
            Some((_, entry)) => {
                if entry.aliased {
                    self.scope.uninstall(key);
                }
                true
            }
            None => false,
        }
    }
}

/// Registry of callbacks addressable by opaque keys.
///
/// Cloning is cheap and clones share the same registry.
#[derive(Clone)]
pub struct Waiter {
    inner: Arc<WaiterInner>,
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("waiters", &self.inner.waiters.len())
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    /// Creates a registry with its own, empty global scope.
    pub fn new() -> Self {
        Self::with_scope(Arc::new(GlobalScope::new()))
    }

    /// Creates a registry that installs aliases into `scope`.
    pub fn with_scope(scope: Arc<GlobalScope>) -> Self {
        Self {
            inner: Arc::new(WaiterInner {
                waiters: DashMap::new(),
                scope,
            }),
        }
    }

    pub fn scope(&self) -> &Arc<GlobalScope> {
        &self.inner.scope
    }

    /// Stores `runner` under a fresh key and returns the key.
    ///
    /// A `once` runner is dropped from the registry when it is run.
    pub fn add<F>(&self, runner: F, once: bool, description: &str) -> CompactString
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.insert(Arc::new(runner), once, description, false)
    }

    /// Like [`Waiter::add`], and also installs a global function named by
    /// the key that forwards its arguments to [`Waiter::run`].
    pub fn create_func<F>(&self, runner: F, once: bool, description: &str) -> CompactString
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let key = self.insert(Arc::new(runner), once, description, true);

        let weak: Weak<WaiterInner> = Arc::downgrade(&self.inner);
        let alias_key = key.clone();
        self.inner.scope.install(
            &key,
            Arc::new(move |args: &[Value]| {
                weak.upgrade()
                    .and_then(|inner| inner.run(&alias_key, args))
                    .unwrap_or(Value::Null)
            }),
        );
        debug!("🌐 Installed global alias {}", key);
        key
    }

    fn insert(&self, runner: Arc<Runner>, once: bool, description: &str, aliased: bool) -> CompactString {
        let key = opaque_id("waiter_");
        self.inner.waiters.insert(
            key.clone(),
            WaiterEntry {
                runner,
                once,
                description: CompactString::new(description),
                aliased,
            },
        );
        debug!("⏳ Registered waiter {} ({})", key, description);
        key
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.waiters.contains_key(key)
    }

    pub fn description(&self, key: &str) -> Option<CompactString> {
        self.inner
            .waiters
            .get(key)
            .map(|entry| entry.description.clone())
    }

    pub fn keys(&self) -> Vec<CompactString> {
        self.inner
            .waiters
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.waiters.is_empty()
    }

    /// Runs the callback stored under `key`. `None` if there is none.
    pub fn run(&self, key: &str, args: &[Value]) -> Option<Value> {
        self.inner.run(key, args)
    }

    /// Removes entries and their global aliases. Returns how many entries
    /// existed.
    pub fn remove<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter()
            .filter(|key| self.inner.remove_one(key.as_ref()))
            .count()
    }

    /// Calls a callback given directly or by name.
    ///
    /// Names resolve first as waiter keys, then as global functions.
    pub fn call_func(&self, callback: &Callback, args: &[Value]) -> Result<Value, WaiterError> {
        match callback {
            Callback::Func(runner) => Ok(runner(args)),
            Callback::Name(name) => {
                if let Some(result) = self.run(name, args) {
                    return Ok(result);
                }
                if let Some(result) = self.inner.scope.call(name, args) {
                    return Ok(result);
                }
                warn!("❌ Callback '{}' is neither a waiter key nor a global function", name);
                Err(WaiterError::CallbackNotFound(name.to_string()))
            }
        }
    }
}
