//! Persistent, resumable download request queue.
//!
//! Requests are stored in SQLite, move through a fixed status state machine
//! and are driven by an external [`TransferWorker`]. Listener notifications
//! are delivered asynchronously on a single delivery context.

pub mod database;
pub mod download;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod settings;
pub mod status;
mod utils;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use database::{Database, Repository};
pub use download::controller::{QueueController, Selector};
pub use download::dispatcher::{ChannelDispatcher, Dispatcher, ImmediateDispatcher};
pub use download::listener::{DownloadEvent, DownloadListener, EnqueueCallback, EnqueueEvent};
pub use download::manager::{DownloadCommand, DownloadManager};
pub use download::worker::{TransferReporter, TransferWorker};
pub use error::{FetchError, RepositoryError};
pub use models::{DownloadRecord, ErrorKind, NetworkType, Priority, Request, RequestData, Status};
pub use settings::FetchSettings;
pub use status::Action;

/// A running queue: the controller plus the tasks backing it.
pub struct FetchQueue {
    pub controller: Arc<QueueController>,
    pub manager: DownloadManager,
    pub dispatcher: ChannelDispatcher,
    delivery_task: JoinHandle<()>,
    manager_task: JoinHandle<()>,
}

impl FetchQueue {
    /// Reporter to hand to the transfer worker.
    pub fn reporter(&self) -> TransferReporter {
        self.controller.reporter()
    }

    /// Stop accepting commands, wait for queued ones, then drain pending callbacks.
    pub async fn shutdown(self) {
        let FetchQueue { controller, manager, dispatcher, delivery_task, manager_task } = self;
        drop(manager);
        if let Err(e) = manager_task.await {
            tracing::error!(error = %e, "download manager task failed");
        }
        dispatcher.flush().await;
        // The controller and any reporters hold dispatcher handles too.
        drop(controller);
        drop(dispatcher);
        delivery_task.abort();
        tracing::info!("fetch queue stopped");
    }
}

/// Load settings, install logging and start the queue. Must run inside a tokio runtime.
pub fn start(
    worker: Arc<dyn TransferWorker>,
    listener: Arc<dyn DownloadListener>,
) -> Result<FetchQueue, FetchError> {
    let s = settings::load_settings();
    logging::init(s.debug_logs);
    tracing::info!("fetch queue starting; debug_logs={}", s.debug_logs);
    start_with_settings(&s, worker, listener)
}

/// Start the queue from explicit settings, without touching global logging or
/// the settings file.
pub fn start_with_settings(
    settings: &FetchSettings,
    worker: Arc<dyn TransferWorker>,
    listener: Arc<dyn DownloadListener>,
) -> Result<FetchQueue, FetchError> {
    let db_path = Path::new(&settings.database_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FetchError::Settings {
            path: db_path.to_path_buf(),
            reason: format!("failed to create database dir: {e}"),
        })?;
    }
    let repository = Arc::new(Database::open(db_path)?);
    tracing::info!(path = %db_path.display(), "database opened");

    let (dispatcher, delivery_task) = ChannelDispatcher::spawn();
    let controller = Arc::new(QueueController::new(
        repository,
        worker,
        Arc::new(dispatcher.clone()),
        listener,
    ));

    let (cmd_tx, cmd_rx) = mpsc::channel(settings.command_buffer.max(1));
    let manager_task = tokio::spawn(download::manager::run_download_manager(controller.clone(), cmd_rx));

    Ok(FetchQueue {
        controller,
        manager: DownloadManager::new(cmd_tx),
        dispatcher,
        delivery_task,
        manager_task,
    })
}
