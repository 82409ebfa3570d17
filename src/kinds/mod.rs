//! Kind discriminants, the registry, and per-kind strategies.
//!
//! ## Contents
//! - [`Kind`] — discriminant naming each fault type
//! - [`KindRegistry`] / [`KindEntry`] — the immutable startup-built table
//! - [`FaultRoutine`] / [`AgentRoutine`] — per-kind strategy seam

mod kind;
mod registry;
mod routine;

pub use kind::Kind;
pub use registry::{FaultList, KindEntry, KindRegistry, KindRegistryBuilder};
pub use routine::{AgentRoutine, FaultRoutine};
