use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::download::controller::{QueueController, Selector};
use crate::download::listener::EnqueueCallback;
use crate::error::FetchError;
use crate::models::Request;
use crate::status::Action;

pub enum DownloadCommand {
    Enqueue {
        requests: Vec<Request>,
        callback: Option<Arc<dyn EnqueueCallback>>,
    },
    Pause(Selector),
    Resume(Selector),
    Retry(Selector),
    Cancel(Selector),
    Remove(Selector),
    Delete(Selector),
    /// Connectivity changed; pause or resume according to each request's network type.
    ConnectionChanged { available: bool, on_wifi: bool },
}

impl fmt::Debug for DownloadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadCommand::Enqueue { requests, callback } => f
                .debug_struct("Enqueue")
                .field("requests", requests)
                .field("callback", &callback.is_some())
                .finish(),
            DownloadCommand::Pause(s) => f.debug_tuple("Pause").field(s).finish(),
            DownloadCommand::Resume(s) => f.debug_tuple("Resume").field(s).finish(),
            DownloadCommand::Retry(s) => f.debug_tuple("Retry").field(s).finish(),
            DownloadCommand::Cancel(s) => f.debug_tuple("Cancel").field(s).finish(),
            DownloadCommand::Remove(s) => f.debug_tuple("Remove").field(s).finish(),
            DownloadCommand::Delete(s) => f.debug_tuple("Delete").field(s).finish(),
            DownloadCommand::ConnectionChanged { available, on_wifi } => f
                .debug_struct("ConnectionChanged")
                .field("available", available)
                .field("on_wifi", on_wifi)
                .finish(),
        }
    }
}

/// Cloneable handle for submitting commands to the manager loop.
#[derive(Clone)]
pub struct DownloadManager {
    cmd_tx: mpsc::Sender<DownloadCommand>,
}

impl DownloadManager {
    pub fn new(cmd_tx: mpsc::Sender<DownloadCommand>) -> Self {
        Self { cmd_tx }
    }

    pub async fn send(&self, cmd: DownloadCommand) -> Result<(), FetchError> {
        self.cmd_tx.send(cmd).await.map_err(|e| {
            tracing::warn!(command = ?e.0, "download manager is closed");
            FetchError::ManagerClosed
        })
    }

    /// Per-request outcomes, duplicates included, go to `callback`.
    pub async fn enqueue(
        &self,
        requests: Vec<Request>,
        callback: Option<Arc<dyn EnqueueCallback>>,
    ) -> Result<(), FetchError> {
        self.send(DownloadCommand::Enqueue { requests, callback }).await
    }
}

impl fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager").finish_non_exhaustive()
    }
}

/// Apply commands one at a time, in arrival order, until every handle is dropped.
pub async fn run_download_manager(controller: Arc<QueueController>, mut cmd_rx: mpsc::Receiver<DownloadCommand>) {
    tracing::debug!("download manager started");
    while let Some(cmd) = cmd_rx.recv().await {
        let controller = controller.clone();
        // Repository I/O is synchronous; keep it off the async workers.
        let joined = tokio::task::spawn_blocking(move || apply(&controller, cmd)).await;
        if let Err(e) = joined {
            tracing::error!(error = %e, "download command panicked");
        }
    }
    tracing::debug!("download manager stopped");
}

fn apply(controller: &QueueController, cmd: DownloadCommand) {
    let (action, selector) = match cmd {
        DownloadCommand::Enqueue { requests, callback } => {
            let count = requests.len();
            if let Err(e) = controller.enqueue_batch(requests, callback) {
                tracing::warn!(count, error = %e, "enqueue rejected");
            }
            return;
        }
        DownloadCommand::Pause(selector) => (Action::Pause, selector),
        DownloadCommand::Resume(selector) | DownloadCommand::Retry(selector) => (Action::Resume, selector),
        DownloadCommand::Cancel(selector) => (Action::Cancel, selector),
        DownloadCommand::Remove(selector) => (Action::Remove, selector),
        DownloadCommand::Delete(selector) => (Action::Delete, selector),
        DownloadCommand::ConnectionChanged { available, on_wifi } => {
            let affected = controller.connection_changed(available, on_wifi);
            tracing::debug!(available, on_wifi, affected, "connection change applied");
            return;
        }
    };
    let affected = controller.perform(action, &selector);
    tracing::debug!(?action, ?selector, affected, "command applied");
}
