//! Error types for the event system.
//!
//! Only programmer errors are represented here. Lookups of missing keys,
//! events or contents are soft failures and surface as `Option`, `bool`
//! or empty collections instead.

/// Main error type for the event system
#[derive(Debug, thiserror::Error)]
pub enum MadnhError {
    /// Emitter usage error
    #[error("Emitter error: {0}")]
    Emitter(#[from] EmitterError),

    /// Waiter / callback resolution error
    #[error("Waiter error: {0}")]
    Waiter(#[from] WaiterError),

    /// Configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by the attach/detach family
///
/// Listener removal takes either a [`crate::emitter::ListenerKey`] or a
/// callback, so there is no invalid remover to report.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    /// The argument cannot take part in an attach/detach handshake
    #[error("Invalid event emitter: {0}")]
    InvalidEmitter(String),
}

/// Errors raised while resolving callbacks by name
#[derive(Debug, thiserror::Error)]
pub enum WaiterError {
    /// Name is neither a waiter key nor an installed global function
    #[error("Callback not found: {0}")]
    CallbackNotFound(String),
}
