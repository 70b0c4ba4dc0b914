//! UUID v7 utilities for time-ordered identifiers.
//!
//! Mutation ids, event ids, and temporary entity ids are all UUIDv7 so they
//! sort in creation order, which keeps logs and pending stacks readable.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use tasklane_core::uuid_utils::{is_v7, new_v7};
///
/// let id = new_v7();
/// assert!(is_v7(&id));
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

/// Extract the embedded creation time from a UUIDv7.
///
/// Returns `None` for other UUID versions.
pub fn extract_timestamp(id: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(id) {
        return None;
    }
    let bytes = id.as_bytes();
    let millis = bytes[..6]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Utc.timestamp_millis_opt(millis as i64).single()
}
