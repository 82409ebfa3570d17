//! Runtime events: the data model and the broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] — classification and payload metadata
//! - [`Bus`] — thin wrapper over `tokio::sync::broadcast`
//!
//! Publishers: the reconcilers, the recovery coordinator and the
//! supervisor. Consumer: the supervisor's listener, which fans events
//! out to [`Subscribe`](crate::Subscribe) implementations.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
