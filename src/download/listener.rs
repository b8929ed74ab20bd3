//! Callback and listener contracts plus their event payloads.

use serde::Serialize;

use crate::models::{ErrorKind, Request};

/// Lifecycle events delivered to a [`DownloadListener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    Paused {
        id: i64,
        progress: u32,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    Cancelled {
        id: i64,
        progress: u32,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    Removed {
        id: i64,
        progress: u32,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    Completed {
        id: i64,
        progress: u32,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    Error {
        id: i64,
        progress: u32,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        error: ErrorKind,
    },
    Progress {
        id: i64,
        progress: u32,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
}

impl DownloadEvent {
    pub fn id(&self) -> i64 {
        match self {
            DownloadEvent::Paused { id, .. }
            | DownloadEvent::Cancelled { id, .. }
            | DownloadEvent::Removed { id, .. }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Error { id, .. }
            | DownloadEvent::Progress { id, .. } => *id,
        }
    }
}

/// Receives download lifecycle notifications on the delivery context.
///
/// Every method defaults to doing nothing. Closures taking a
/// [`DownloadEvent`] implement the trait directly.
pub trait DownloadListener: Send + Sync {
    fn on_paused(&self, _id: i64, _progress: u32, _downloaded_bytes: u64, _total_bytes: Option<u64>) {}

    fn on_cancelled(&self, _id: i64, _progress: u32, _downloaded_bytes: u64, _total_bytes: Option<u64>) {}

    fn on_removed(&self, _id: i64, _progress: u32, _downloaded_bytes: u64, _total_bytes: Option<u64>) {}

    fn on_completed(&self, _id: i64, _progress: u32, _downloaded_bytes: u64, _total_bytes: Option<u64>) {}

    fn on_error(
        &self,
        _id: i64,
        _progress: u32,
        _downloaded_bytes: u64,
        _total_bytes: Option<u64>,
        _error: ErrorKind,
    ) {
    }

    fn on_progress(&self, _id: i64, _progress: u32, _downloaded_bytes: u64, _total_bytes: Option<u64>) {}
}

impl<F> DownloadListener for F
where
    F: Fn(DownloadEvent) + Send + Sync,
{
    fn on_paused(&self, id: i64, progress: u32, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self(DownloadEvent::Paused { id, progress, downloaded_bytes, total_bytes })
    }

    fn on_cancelled(&self, id: i64, progress: u32, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self(DownloadEvent::Cancelled { id, progress, downloaded_bytes, total_bytes })
    }

    fn on_removed(&self, id: i64, progress: u32, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self(DownloadEvent::Removed { id, progress, downloaded_bytes, total_bytes })
    }

    fn on_completed(&self, id: i64, progress: u32, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self(DownloadEvent::Completed { id, progress, downloaded_bytes, total_bytes })
    }

    fn on_error(&self, id: i64, progress: u32, downloaded_bytes: u64, total_bytes: Option<u64>, error: ErrorKind) {
        self(DownloadEvent::Error { id, progress, downloaded_bytes, total_bytes, error })
    }

    fn on_progress(&self, id: i64, progress: u32, downloaded_bytes: u64, total_bytes: Option<u64>) {
        self(DownloadEvent::Progress { id, progress, downloaded_bytes, total_bytes })
    }
}

/// Outcome of one enqueued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueEvent {
    Queued(Request),
    Failed(Request, ErrorKind),
}

/// Per-call enqueue notifications.
pub trait EnqueueCallback: Send + Sync {
    fn on_queued(&self, request: &Request);

    fn on_failure(&self, request: &Request, error: ErrorKind);
}

impl<F> EnqueueCallback for F
where
    F: Fn(EnqueueEvent) + Send + Sync,
{
    fn on_queued(&self, request: &Request) {
        self(EnqueueEvent::Queued(request.clone()))
    }

    fn on_failure(&self, request: &Request, error: ErrorKind) {
        self(EnqueueEvent::Failed(request.clone(), error))
    }
}
