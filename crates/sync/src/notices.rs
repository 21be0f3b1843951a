//! User-facing notices, each shown at most once per session.

use scenesync_core::ObjectKind;
use std::collections::BTreeSet;
use std::fmt;

/// Notification meant for the person at the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A provider object limit blocked uploads.
    ObjectLimitReached {
        /// Limited type.
        kind: ObjectKind,
        /// Limit in force.
        limit: u32,
    },
    /// A class could not be loaded; a stand-in was spawned.
    MissingClass {
        /// Class name.
        class: String,
    },
    /// Bulk instance syncing is disabled for this session.
    BulkInstancesDisabled,
}

impl Notice {
    fn key(&self) -> String {
        match self {
            Notice::ObjectLimitReached { kind, .. } => format!("limit:{kind:?}"),
            Notice::MissingClass { class } => format!("class:{class}"),
            Notice::BulkInstancesDisabled => "instances-disabled".to_string(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ObjectLimitReached { kind, limit } => {
                write!(f, "You have reached the limit of {limit} {kind:?} objects for this session")
            }
            Notice::MissingClass { class } => {
                write!(f, "Class {class} is not available; a stand-in was placed")
            }
            Notice::BulkInstancesDisabled => {
                write!(f, "Bulk instance syncing is disabled for this session")
            }
        }
    }
}

/// Deduplicating notice queue.
#[derive(Debug, Default)]
pub struct Notices {
    raised: BTreeSet<String>,
    pending: Vec<Notice>,
}

impl Notices {
    /// Queue `notice` unless an equivalent one was already raised. Returns whether it was queued.
    pub fn raise(&mut self, notice: Notice) -> bool {
        if !self.raised.insert(notice.key()) {
            return false;
        }
        self.pending.push(notice);
        true
    }

    /// Take every queued notice.
    pub fn take(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.pending)
    }

    /// Forget everything; used on reconnect.
    pub fn reset(&mut self) {
        self.raised.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_notice_is_raised_once_per_kind() {
        let mut notices = Notices::default();
        let limit = |limit| Notice::ObjectLimitReached {
            kind: ObjectKind::Node,
            limit,
        };
        assert!(notices.raise(limit(3)));
        assert!(!notices.raise(limit(4)));
        assert_eq!(notices.take(), vec![limit(3)]);
        assert!(notices.take().is_empty());

        notices.reset();
        assert!(notices.raise(limit(3)));
    }
}
