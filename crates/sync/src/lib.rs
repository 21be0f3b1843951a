#![warn(missing_docs)]
//! Reconciliation engine between a host scene and a replicated object tree.
//!
//! A [`SyncSession`] owns a [`Dispatcher`] holding one [`Adapter`] per replicated type.
//! Replication events are routed by type tag; host notifications are fanned out to
//! every adapter. Work that does not fit the per-tick [`TickBudget`] is queued and
//! retried on later ticks.

pub mod adapters;
pub mod budget;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod notices;
pub mod properties;
pub mod session;
pub mod stand_in;

pub use budget::TickBudget;
pub use config::SyncConfig;
pub use context::{CreateQueue, SessionState, SyncContext};
pub use dispatcher::{Adapter, AdapterId, Claim, Dispatcher};
pub use error::SyncError;
pub use notices::{Notice, Notices};
pub use session::SyncSession;
pub use stand_in::{StandIn, StandIns};
