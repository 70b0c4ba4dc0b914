//! Structured logging field name constants for tasklane.
//!
//! These names are the field naming contract for both crates, so a log
//! pipeline can follow one mutation from optimistic apply to commit or
//! rollback. `tracing` macros take field names as identifiers, so call sites
//! spell them literally (`cache_key = %key`); engine event payloads use the
//! same names as their JSON keys.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | An engine invariant could not be upheld (e.g. recovered poisoned lock) |
//! | WARN  | A remote call failed and local state was rolled back |
//! | INFO  | Commits, rollbacks, batch flushes |
//! | DEBUG | Optimistic applies, timer resets, cache replaces |
//! | TRACE | Per-listener notifications |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Identifier of one optimistic mutation (UUIDv7).
pub const MUTATION_ID: &str = "mutation_id";

/// Cache key a mutation or read applies to.
pub const CACHE_KEY: &str = "cache_key";

/// Coalescing buffer key.
pub const BUFFER_KEY: &str = "buffer_key";

/// Entity kind ("task", "list", "tag").
pub const ENTITY_KIND: &str = "entity_kind";

/// Logical operation name ("insert", "update", "remove", "reorder").
pub const OPERATION: &str = "op";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of entries in a batch payload.
pub const ENTRY_COUNT: &str = "entry_count";

/// Number of mutations still pending on a key.
pub const PENDING_COUNT: &str = "pending_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Terminal mutation status.
pub const STATUS: &str = "status";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
