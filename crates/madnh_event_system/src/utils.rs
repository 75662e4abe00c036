//! # Utility Functions
//!
//! Identifier generation shared by the content manager, the emitters and the
//! waiter registry. Sequences are process-wide so that generated keys never
//! collide between instances.

use compact_str::{format_compact, CompactString};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Returns the next value of the process-wide sequence.
#[inline]
pub fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Generates a unique identifier of the form `<prefix><n>`.
pub fn unique_id(prefix: &str) -> CompactString {
    format_compact!("{}{}", prefix, next_sequence())
}

/// Generates an opaque random identifier of the form `<prefix><uuid>`.
///
/// Used where identifiers travel through string-only contexts and should not
/// be guessable from their neighbours.
pub fn opaque_id(prefix: &str) -> CompactString {
    format_compact!("{}{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Returns the last path segment of a Rust type name, without generics,
/// lower-cased. `alloc::vec::Vec<u8>` becomes `vec`.
pub fn short_type_name(full: &str) -> CompactString {
    let base = full.split('<').next().unwrap_or(full);
    let last = base.rsplit("::").next().unwrap_or(base);
    let trimmed = last
        .trim_start_matches(['&', '[', '('])
        .trim_end_matches([']', ')'])
        .trim();
    if trimmed.is_empty() {
        CompactString::new("unknown")
    } else {
        CompactString::new(trimmed.to_lowercase())
    }
}
