//! Contract with the external transfer worker.
//!
//! The worker performs the byte transfer; this crate only signals it. The
//! worker writes progress and terminal status back through the same
//! repository the controller uses, and fires its own listener events via
//! [`TransferReporter`].

use std::sync::Arc;

use crate::database::Repository;
use crate::download::dispatcher::Dispatcher;
use crate::download::listener::DownloadListener;
use crate::error::{RepoResult, RepositoryError};
use crate::models::{ErrorKind, Status};

/// Signals are fire-and-forget: implementations must return promptly and
/// observe the request asynchronously.
pub trait TransferWorker: Send + Sync {
    /// (Re)start the transfer for `id`.
    fn resume(&self, id: i64);

    /// Stop the transfer for `id`, keeping persisted progress.
    fn pause(&self, id: i64);
}

/// Worker-side writer: persists transfer state and posts the matching
/// listener event.
#[derive(Clone)]
pub struct TransferReporter {
    repository: Arc<dyn Repository>,
    dispatcher: Arc<dyn Dispatcher>,
    listener: Arc<dyn DownloadListener>,
}

impl TransferReporter {
    pub fn new(
        repository: Arc<dyn Repository>,
        dispatcher: Arc<dyn Dispatcher>,
        listener: Arc<dyn DownloadListener>,
    ) -> Self {
        Self { repository, dispatcher, listener }
    }

    /// Move a queued record to `DOWNLOADING`.
    ///
    /// Returns `false` when the record left `QUEUED` in the meantime (paused,
    /// cancelled, removed); the worker should then not start. A total smaller
    /// than the bytes already stored fails before the status changes.
    pub fn started(&self, id: i64, total_bytes: Option<u64>) -> RepoResult<bool> {
        let downloaded = match self.repository.get(id) {
            Ok(record) => record.downloaded_bytes,
            Err(RepositoryError::NotFound(_)) => {
                tracing::debug!(id, "transfer not started; record was removed");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if let Some(total) = total_bytes {
            if downloaded > total {
                return Err(RepositoryError::InvalidProgress { id, downloaded, total });
            }
        }

        let started = self
            .repository
            .set_status_and_error_if(id, Status::Downloading, ErrorKind::None, &[Status::Queued])?;
        if !started {
            tracing::debug!(id, "transfer not started; record is no longer queued");
            return Ok(false);
        }
        if total_bytes.is_some() {
            self.repository.set_progress(id, downloaded, total_bytes)?;
        }
        tracing::info!(id, "transfer started");
        Ok(true)
    }

    pub fn progress(&self, id: i64, downloaded_bytes: u64, total_bytes: Option<u64>) -> RepoResult<()> {
        self.repository.set_progress(id, downloaded_bytes, total_bytes)?;
        let record = self.repository.get(id)?;
        let listener = self.listener.clone();
        let progress = record.progress();
        self.dispatcher.post(Box::new(move || {
            listener.on_progress(id, progress, downloaded_bytes, total_bytes)
        }));
        Ok(())
    }

    pub fn completed(&self, id: i64) -> RepoResult<()> {
        self.repository.set_status_and_error(id, Status::Completed, ErrorKind::None)?;
        let record = self.repository.get(id)?;
        tracing::info!(id, downloaded = record.downloaded_bytes, "transfer completed");

        let listener = self.listener.clone();
        self.dispatcher.post(Box::new(move || {
            listener.on_completed(id, record.progress(), record.downloaded_bytes, record.total_bytes)
        }));
        Ok(())
    }

    pub fn failed(&self, id: i64, error: ErrorKind) -> RepoResult<()> {
        let error = if error == ErrorKind::None { ErrorKind::Unknown } else { error };
        self.repository.set_status_and_error(id, Status::Error, error)?;
        let record = self.repository.get(id)?;
        tracing::warn!(id, %error, "transfer failed");

        let listener = self.listener.clone();
        self.dispatcher.post(Box::new(move || {
            listener.on_error(id, record.progress(), record.downloaded_bytes, record.total_bytes, error)
        }));
        Ok(())
    }
}
