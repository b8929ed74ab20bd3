//! Queue controller: the single entry point for request lifecycle changes.
//!
//! Every verb (pause, resume, cancel, remove, delete) runs through one bulk
//! routine, [`QueueController::perform`], parametrized by a [`Selector`] and
//! an [`Action`]. Each selected record gets its own atomic read-decide-write
//! in the repository; there is no transaction across records.

use std::sync::Arc;

use crate::database::Repository;
use crate::download::dispatcher::Dispatcher;
use crate::download::listener::{DownloadListener, EnqueueCallback};
use crate::download::worker::{TransferReporter, TransferWorker};
use crate::error::{FetchError, RepoResult, RepositoryError};
use crate::models::{DownloadRecord, ErrorKind, Request, RequestData, Status};
use crate::status::{can_transition, Action, WorkerSignal};
use crate::utils::fs::delete_file_if_exists;

/// Which records an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(i64),
    Ids(Vec<i64>),
    Group(String),
    Status(Status),
    GroupAndStatus(String, Status),
    All,
}

pub struct QueueController {
    repository: Arc<dyn Repository>,
    worker: Arc<dyn TransferWorker>,
    dispatcher: Arc<dyn Dispatcher>,
    listener: Arc<dyn DownloadListener>,
}

impl QueueController {
    pub fn new(
        repository: Arc<dyn Repository>,
        worker: Arc<dyn TransferWorker>,
        dispatcher: Arc<dyn Dispatcher>,
        listener: Arc<dyn DownloadListener>,
    ) -> Self {
        Self { repository, worker, dispatcher, listener }
    }

    /// Reporter the transfer worker uses to write progress and terminal
    /// status; shares this controller's repository and delivery context.
    pub fn reporter(&self) -> TransferReporter {
        TransferReporter::new(self.repository.clone(), self.dispatcher.clone(), self.listener.clone())
    }

    /* -------------------------------- enqueue -------------------------------- */

    pub fn enqueue(&self, request: Request, callback: Option<Arc<dyn EnqueueCallback>>) -> Result<(), FetchError> {
        self.enqueue_batch(vec![request], callback)
    }

    /// Insert every request as `QUEUED`, then ask the worker to start each
    /// one that was inserted.
    ///
    /// Malformed input fails the call before anything is written. Duplicates
    /// are skipped individually and reported through `on_failure`.
    pub fn enqueue_batch(
        &self,
        requests: Vec<Request>,
        callback: Option<Arc<dyn EnqueueCallback>>,
    ) -> Result<(), FetchError> {
        for request in &requests {
            request.validate()?;
        }

        let mut inserted = Vec::with_capacity(requests.len());
        for request in requests {
            let priority = request.priority;
            let outcome = match self.repository.insert(&DownloadRecord::queued(&request)) {
                Ok(()) => {
                    tracing::info!(id = request.id, group = %request.group_id, "request queued");
                    inserted.push((request.id, priority));
                    ErrorKind::None
                }
                Err(RepositoryError::DuplicateId(id)) => {
                    tracing::warn!(id, "request already exists; skipping");
                    ErrorKind::RequestAlreadyExist
                }
                Err(RepositoryError::DuplicateFile { id, file_path }) => {
                    tracing::warn!(id, path = %file_path, "file already claimed by another request; skipping");
                    ErrorKind::RequestAlreadyExist
                }
                Err(err) => {
                    tracing::error!(id = request.id, error = %err, "failed to insert request");
                    ErrorKind::RequestNotFoundInDatabase
                }
            };

            if let Some(callback) = &callback {
                let callback = callback.clone();
                self.dispatcher.post(Box::new(move || match outcome {
                    ErrorKind::None => callback.on_queued(&request),
                    error => callback.on_failure(&request, error),
                }));
            }
        }

        // Stable: equal priorities keep submission order.
        inserted.sort_by_key(|&(_, priority)| std::cmp::Reverse(priority));
        for (id, _) in inserted {
            self.worker.resume(id);
        }
        Ok(())
    }

    /* --------------------------- lifecycle actions --------------------------- */

    /// Apply `action` to every selected record the state machine allows.
    /// Returns how many records were affected.
    pub fn perform(&self, action: Action, selector: &Selector) -> usize {
        let mut records = match self.select(selector) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(?action, ?selector, error = %err, "failed to select records");
                return 0;
            }
        };

        if action == Action::Resume {
            records.sort_by_key(|r| std::cmp::Reverse(r.priority));
        }

        let mut affected = 0;
        for record in records {
            let id = record.id;
            let result = if action.discards_record() {
                self.discard(record, action == Action::Delete)
            } else {
                self.transition(record, action)
            };
            match result {
                Ok(true) => affected += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(id, ?action, error = %err, "action failed for record"),
            }
        }
        affected
    }

    fn select(&self, selector: &Selector) -> RepoResult<Vec<DownloadRecord>> {
        match selector {
            Selector::Id(id) => match self.repository.get(*id) {
                Ok(record) => Ok(vec![record]),
                Err(RepositoryError::NotFound(_)) => Ok(Vec::new()),
                Err(err) => Err(err),
            },
            Selector::Ids(ids) => self.repository.get_many(ids),
            Selector::Group(group) => self.repository.get_by_group(group),
            Selector::Status(status) => self.repository.get_by_status(*status),
            Selector::GroupAndStatus(group, status) => self.repository.get_by_group_and_status(group, *status),
            Selector::All => self.repository.get_all(),
        }
    }

    /// Pause, resume or cancel one record.
    fn transition(&self, record: DownloadRecord, action: Action) -> RepoResult<bool> {
        let id = record.id;
        if !can_transition(record.status, action) {
            tracing::debug!(id, status = %record.status, ?action, "transition not allowed; ignoring");
            return Ok(false);
        }

        if action.signal() == WorkerSignal::Pause {
            self.worker.pause(id);
        }

        let target = action.target();
        // Compare-and-set: a concurrent writer may have moved the record since it was read.
        if !self
            .repository
            .set_status_and_error_if(id, target, ErrorKind::None, action.allowed_from())?
        {
            tracing::debug!(id, ?action, "record changed concurrently; ignoring");
            return Ok(false);
        }
        tracing::info!(id, from = %record.status, to = %target, "status changed");

        match action {
            Action::Resume => self.worker.resume(id),
            Action::Pause | Action::Cancel => {
                let fresh = self.repository.get(id)?;
                let listener = self.listener.clone();
                self.dispatcher.post(Box::new(move || {
                    let progress = fresh.progress();
                    if action == Action::Pause {
                        listener.on_paused(id, progress, fresh.downloaded_bytes, fresh.total_bytes);
                    } else {
                        listener.on_cancelled(id, progress, fresh.downloaded_bytes, fresh.total_bytes);
                    }
                }));
            }
            Action::Remove | Action::Delete => {}
        }
        Ok(true)
    }

    /// Remove (and for delete, unlink the file of) one record, whatever its status.
    fn discard(&self, record: DownloadRecord, delete_file: bool) -> RepoResult<bool> {
        let id = record.id;
        self.worker.pause(id);

        // Progress may have moved since selection.
        let fresh = match self.repository.get(id) {
            Ok(fresh) => fresh,
            Err(RepositoryError::NotFound(_)) => {
                // Someone else removed the row; the file still goes.
                if delete_file {
                    remove_backing_file(id, &record.file_path);
                }
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        self.repository.remove(id)?;
        tracing::info!(id, status = %fresh.status, delete_file, "record removed");

        if delete_file {
            remove_backing_file(id, &fresh.file_path);
        }

        let listener = self.listener.clone();
        self.dispatcher.post(Box::new(move || {
            listener.on_removed(id, fresh.progress(), fresh.downloaded_bytes, fresh.total_bytes)
        }));
        Ok(true)
    }

    /// React to a connectivity change: pause everything when offline,
    /// otherwise resume each record its network type allows and pause the rest.
    pub fn connection_changed(&self, available: bool, on_wifi: bool) -> usize {
        if !available {
            tracing::info!("network lost; pausing all downloads");
            return self.pause_all();
        }

        let records = match self.repository.get_all() {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(error = %err, "failed to select records");
                return 0;
            }
        };
        let (mut allowed, blocked): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.network_type.allows(available, on_wifi));
        allowed.sort_by_key(|r| std::cmp::Reverse(r.priority));
        tracing::info!(on_wifi, allowed = allowed.len(), blocked = blocked.len(), "network changed");

        let mut affected = 0;
        let actions = blocked
            .into_iter()
            .map(|r| (r, Action::Pause))
            .chain(allowed.into_iter().map(|r| (r, Action::Resume)));
        for (record, action) in actions {
            let id = record.id;
            match self.transition(record, action) {
                Ok(true) => affected += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(id, ?action, error = %err, "action failed for record"),
            }
        }
        affected
    }

    pub fn pause(&self, id: i64) -> usize {
        self.perform(Action::Pause, &Selector::Id(id))
    }

    pub fn pause_group(&self, group_id: &str) -> usize {
        self.perform(Action::Pause, &Selector::Group(group_id.to_string()))
    }

    pub fn pause_all(&self) -> usize {
        self.perform(Action::Pause, &Selector::All)
    }

    pub fn resume(&self, id: i64) -> usize {
        self.perform(Action::Resume, &Selector::Id(id))
    }

    pub fn resume_group(&self, group_id: &str) -> usize {
        self.perform(Action::Resume, &Selector::Group(group_id.to_string()))
    }

    pub fn resume_all(&self) -> usize {
        self.perform(Action::Resume, &Selector::All)
    }

    pub fn retry(&self, id: i64) -> usize {
        self.resume(id)
    }

    pub fn retry_group(&self, group_id: &str) -> usize {
        self.resume_group(group_id)
    }

    pub fn retry_all(&self) -> usize {
        self.resume_all()
    }

    pub fn cancel(&self, id: i64) -> usize {
        self.perform(Action::Cancel, &Selector::Id(id))
    }

    pub fn cancel_group(&self, group_id: &str) -> usize {
        self.perform(Action::Cancel, &Selector::Group(group_id.to_string()))
    }

    pub fn cancel_all(&self) -> usize {
        self.perform(Action::Cancel, &Selector::All)
    }

    pub fn remove(&self, id: i64) -> usize {
        self.perform(Action::Remove, &Selector::Id(id))
    }

    pub fn remove_group(&self, group_id: &str) -> usize {
        self.perform(Action::Remove, &Selector::Group(group_id.to_string()))
    }

    pub fn remove_all(&self) -> usize {
        self.perform(Action::Remove, &Selector::All)
    }

    pub fn delete(&self, id: i64) -> usize {
        self.perform(Action::Delete, &Selector::Id(id))
    }

    pub fn delete_group(&self, group_id: &str) -> usize {
        self.perform(Action::Delete, &Selector::Group(group_id.to_string()))
    }

    pub fn delete_all(&self) -> usize {
        self.perform(Action::Delete, &Selector::All)
    }

    /* -------------------------------- queries -------------------------------- */

    fn deliver<T, F>(&self, value: T, handler: F)
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.dispatcher.post(Box::new(move || handler(value)));
    }

    fn deliver_list<F>(&self, what: &str, records: RepoResult<Vec<DownloadRecord>>, handler: F)
    where
        F: FnOnce(Vec<RequestData>) + Send + 'static,
    {
        let data = match records {
            Ok(records) => records.into_iter().map(RequestData::from).collect(),
            Err(err) => {
                tracing::error!(query = what, error = %err, "query failed");
                Vec::new()
            }
        };
        self.deliver(data, handler);
    }

    pub fn query<F>(&self, id: i64, handler: F)
    where
        F: FnOnce(Option<RequestData>) + Send + 'static,
    {
        let data = match self.repository.get(id) {
            Ok(record) => Some(RequestData::from(record)),
            Err(RepositoryError::NotFound(_)) => None,
            Err(err) => {
                tracing::error!(id, error = %err, "query failed");
                None
            }
        };
        self.deliver(data, handler);
    }

    pub fn query_ids<F>(&self, ids: &[i64], handler: F)
    where
        F: FnOnce(Vec<RequestData>) + Send + 'static,
    {
        self.deliver_list("ids", self.repository.get_many(ids), handler);
    }

    pub fn query_all<F>(&self, handler: F)
    where
        F: FnOnce(Vec<RequestData>) + Send + 'static,
    {
        self.deliver_list("all", self.repository.get_all(), handler);
    }

    pub fn query_by_status<F>(&self, status: Status, handler: F)
    where
        F: FnOnce(Vec<RequestData>) + Send + 'static,
    {
        self.deliver_list("status", self.repository.get_by_status(status), handler);
    }

    pub fn query_by_group<F>(&self, group_id: &str, handler: F)
    where
        F: FnOnce(Vec<RequestData>) + Send + 'static,
    {
        self.deliver_list("group", self.repository.get_by_group(group_id), handler);
    }

    pub fn query_group_by_status<F>(&self, group_id: &str, status: Status, handler: F)
    where
        F: FnOnce(Vec<RequestData>) + Send + 'static,
    {
        self.deliver_list(
            "group_status",
            self.repository.get_by_group_and_status(group_id, status),
            handler,
        );
    }

    pub fn contains<F>(&self, id: i64, handler: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let found = self.repository.contains(id).unwrap_or_else(|err| {
            tracing::error!(id, error = %err, "contains query failed");
            false
        });
        self.deliver(found, handler);
    }
}

fn remove_backing_file(id: i64, path: &str) {
    if let Err(err) = delete_file_if_exists(path) {
        tracing::warn!(id, path, error = %err, "failed to delete file");
    }
}
