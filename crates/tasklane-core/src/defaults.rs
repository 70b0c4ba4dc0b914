//! Centralized default constants for tasklane.
//!
//! **This module is the single source of truth** for shared default values.
//! Engine configuration, facades, and tests reference these constants instead
//! of defining their own magic numbers.

// =============================================================================
// COALESCING
// =============================================================================

/// Quiescence window before a buffered reorder burst is written (milliseconds).
///
/// Observed in production use as a good balance between a settled drag and a
/// prompt save; hosts override it through `TASKLANE_REORDER_DEBOUNCE_MS`.
pub const REORDER_DEBOUNCE_MS: u64 = 500;

/// Smallest accepted debounce window. Zero would flush on the next tick and
/// defeat coalescing entirely.
pub const REORDER_DEBOUNCE_MIN_MS: u64 = 10;

// =============================================================================
// MUTATIONS
// =============================================================================

/// Maximum number of in-flight optimistic mutations stacked on one cache key.
pub const MAX_PENDING_PER_KEY: usize = 64;

/// Sort index assigned to the first entity in an empty collection.
pub const FIRST_SORT_INDEX: i64 = 0;

// =============================================================================
// EVENTS
// =============================================================================

/// Default engine event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// CACHE KEYS
// =============================================================================

/// Cache key prefix for task collections.
pub const TASKS_KEY: &str = "tasks";

/// Cache key for the list collection.
pub const LISTS_KEY: &str = "lists";

/// Cache key for the tag collection.
pub const TAGS_KEY: &str = "tags";

// =============================================================================
// LOGGING
// =============================================================================

/// Default `RUST_LOG` filter when none is set.
pub const LOG_FILTER: &str = "tasklane_sync=info,tasklane_core=info";
