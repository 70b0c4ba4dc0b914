//! # tasklane-core
//!
//! Core types, traits, and abstractions for tasklane.
//!
//! This crate provides the entity records and typed patches, the error
//! taxonomy, and the collaborator traits (remote endpoints, notifications,
//! identity) that the optimistic mutation engine in `tasklane-sync` is
//! written against.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, RemoteError, RemoteResult, Result};
pub use events::{EngineEvent, EngineEventBus, EventEnvelope};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
