//! Error taxonomy of the reconciliation engine.

use scenesync_codec::DecodeError;
use scenesync_core::{ObjectId, ObjectKind, TreeError};
use thiserror::Error;

/// Errors raised while reconciling the local scene with the replicated tree.
///
/// Only [`SyncError::Protocol`] is fatal to the session; everything else is contained
/// to the object or operation that raised it.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The replicated tree has a shape the engine cannot interpret.
    #[error("protocol error on {object}: {reason}")]
    Protocol {
        /// Offending object.
        object: ObjectId,
        /// What was wrong.
        reason: String,
    },
    /// A class or asset could not be resolved locally.
    #[error("class `{class}` could not be resolved")]
    Resolution {
        /// Missing class name.
        class: String,
    },
    /// A provider object limit was reached.
    #[error("{kind:?} limit of {limit} reached")]
    Capacity {
        /// Limited type.
        kind: ObjectKind,
        /// Configured limit.
        limit: u32,
    },
    /// A referenced object is not locally resolvable yet.
    #[error("{object} is not resolvable yet")]
    TransientUnavailable {
        /// Missing object.
        object: ObjectId,
    },
    /// A binary payload was malformed.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] DecodeError),
    /// A tree request was rejected.
    #[error("tree request failed: {0}")]
    Tree(#[from] TreeError),
}

impl SyncError {
    /// Shorthand for a protocol error.
    pub fn protocol(object: ObjectId, reason: impl Into<String>) -> Self {
        SyncError::Protocol {
            object,
            reason: reason.into(),
        }
    }

    /// Whether the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Protocol { .. })
    }
}
