//! Legal status transitions for controller actions.
//!
//! Anything not listed here is ignored by the controller: no write, no worker
//! signal, no listener event.

use serde::{Deserialize, Serialize};

use crate::models::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Pause,
    Resume,
    Cancel,
    Remove,
    Delete,
}

/// What the controller tells the transfer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    Pause,
    Resume,
}

const PAUSE_FROM: &[Status] = &[Status::Downloading, Status::Queued];
const RESUME_FROM: &[Status] = &[Status::Paused, Status::Queued, Status::Error, Status::Cancelled];
const CANCEL_FROM: &[Status] = &[Status::Paused, Status::Queued, Status::Error, Status::Downloading];

impl Action {
    pub fn allowed_from(&self) -> &'static [Status] {
        match self {
            Action::Pause => PAUSE_FROM,
            Action::Resume => RESUME_FROM,
            Action::Cancel => CANCEL_FROM,
            Action::Remove | Action::Delete => &Status::ALL,
        }
    }

    pub fn target(&self) -> Status {
        match self {
            Action::Pause => Status::Paused,
            Action::Resume => Status::Queued,
            Action::Cancel => Status::Cancelled,
            Action::Remove => Status::Removed,
            Action::Delete => Status::Deleted,
        }
    }

    pub fn signal(&self) -> WorkerSignal {
        match self {
            Action::Resume => WorkerSignal::Resume,
            Action::Pause | Action::Cancel | Action::Remove | Action::Delete => WorkerSignal::Pause,
        }
    }

    /// Remove and delete drop the row instead of writing a status.
    pub fn discards_record(&self) -> bool {
        matches!(self, Action::Remove | Action::Delete)
    }
}

pub fn can_transition(current: Status, action: Action) -> bool {
    action.allowed_from().contains(&current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(action: Action) -> Vec<Status> {
        Status::ALL
            .into_iter()
            .filter(|s| can_transition(*s, action))
            .collect()
    }

    #[test]
    fn pause_only_from_downloading_or_queued() {
        assert_eq!(allowed(Action::Pause), vec![Status::Queued, Status::Downloading]);
    }

    #[test]
    fn resume_from_paused_queued_error_cancelled() {
        assert_eq!(
            allowed(Action::Resume),
            vec![Status::Queued, Status::Paused, Status::Cancelled, Status::Error]
        );
    }

    #[test]
    fn cancel_never_from_completed() {
        assert!(!can_transition(Status::Completed, Action::Cancel));
        assert_eq!(
            allowed(Action::Cancel),
            vec![Status::Queued, Status::Downloading, Status::Paused, Status::Error]
        );
    }

    #[test]
    fn remove_and_delete_are_unconditional() {
        assert_eq!(allowed(Action::Remove).len(), Status::ALL.len());
        assert_eq!(allowed(Action::Delete).len(), Status::ALL.len());
    }

    #[test]
    fn invalid_status_only_leaves_by_removal() {
        assert!(!can_transition(Status::Invalid, Action::Pause));
        assert!(!can_transition(Status::Invalid, Action::Resume));
        assert!(!can_transition(Status::Invalid, Action::Cancel));
        assert!(can_transition(Status::Invalid, Action::Remove));
    }

    #[test]
    fn descriptors() {
        assert_eq!(Action::Cancel.target(), Status::Cancelled);
        assert_eq!(Action::Cancel.signal(), WorkerSignal::Pause);
        assert_eq!(Action::Resume.signal(), WorkerSignal::Resume);
        assert!(Action::Delete.discards_record());
        assert!(!Action::Pause.discards_record());
    }
}
