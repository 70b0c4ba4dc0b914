//! # tasklane-sync
//!
//! Optimistic mutation engine for tasklane.
//!
//! This crate provides:
//! - An in-memory entity cache with per-key pending mutation stacks
//! - Optimistic apply, commit reconciliation, and exact rollback
//! - A trailing-edge batch coalescer for drag-and-drop reordering
//! - Task, list, and tag action facades with loading state and notifications
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasklane_sync::{Engine, EngineConfig, TaskDraft};
//!
//! let engine = Engine::builder()
//!     .with_config(EngineConfig::from_env())
//!     .with_remote(Arc::new(rest_client))
//!     .with_identity(Arc::new(session))
//!     .with_notifier(Arc::new(toasts))
//!     .build()?;
//!
//! engine.tasks().refresh(None).await?;
//!
//! // The task is in the cache as soon as `create` returns.
//! let pending = engine.tasks().create(TaskDraft::new("Buy milk"));
//! assert!(engine.tasks().is_loading());
//! let task = pending.await?;
//! ```

pub mod actions;
pub mod cache;
pub mod coalescer;
pub mod config;
pub mod engine;
pub mod mutation;
pub mod patch;
pub mod telemetry;
pub mod testing;

// Re-export core types
pub use tasklane_core::*;

pub use actions::{ActionContext, ActionState, ActionStatus, ListActions, TagActions, TaskActions};
pub use cache::{CacheKey, Collection, CommitReport, EntityCache, MutationId, Subscription};
pub use coalescer::{BatchCoalescer, BatchFlush, BufferKey, FlushFn};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use mutation::{MutationExecutor, MutationOutcome, MutationPlan, MutationStatus, Staged};
pub use patch::{next_sort_index, Op};
pub use telemetry::init_tracing;
