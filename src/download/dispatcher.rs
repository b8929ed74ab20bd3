//! Asynchronous delivery of callbacks and query results.
//!
//! Every notification produced by the controller is posted here instead of
//! being invoked on the calling thread. Tasks posted from one call run in the
//! order they were posted; nothing is promised across concurrent callers.

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn post(&self, task: Task);
}

/// Single-consumer delivery context backed by an unbounded channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

impl ChannelDispatcher {
    /// Spawn the delivery loop on the current tokio runtime.
    ///
    /// The loop exits once every handle to the dispatcher is dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_delivery_loop(rx));
        (Self { tx }, handle)
    }

    /// Resolves after every task posted before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.post(Box::new(move || {
            let _ = done_tx.send(());
        }));
        let _ = done_rx.await;
    }
}

impl Dispatcher for ChannelDispatcher {
    fn post(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::warn!("delivery loop has stopped; dropping callback");
        }
    }
}

async fn run_delivery_loop(mut rx: mpsc::UnboundedReceiver<Task>) {
    tracing::debug!("delivery loop started");
    while let Some(task) = rx.recv().await {
        // A misbehaving listener must not take the delivery context down with it.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("listener callback panicked");
        }
    }
    tracing::debug!("delivery loop stopped");
}

/// Runs every task inline on the posting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn post(&self, task: Task) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn tasks_run_in_post_order_off_the_caller() {
        let (dispatcher, _loop) = ChannelDispatcher::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            dispatcher.post(Box::new(move || seen.lock().unwrap().push(i)));
        }
        // Current-thread runtime: nothing has been delivered until we yield.
        assert!(seen.lock().unwrap().is_empty());

        dispatcher.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_task_does_not_stop_delivery() {
        let (dispatcher, _loop) = ChannelDispatcher::spawn();
        let seen = Arc::new(Mutex::new(false));

        dispatcher.post(Box::new(|| panic!("boom")));
        let flag = seen.clone();
        dispatcher.post(Box::new(move || *flag.lock().unwrap() = true));

        dispatcher.flush().await;
        assert!(*seen.lock().unwrap());
    }

    #[tokio::test]
    async fn loop_exits_when_handles_dropped() {
        let (dispatcher, handle) = ChannelDispatcher::spawn();
        drop(dispatcher);
        handle.await.unwrap();
    }

    #[test]
    fn immediate_dispatcher_runs_inline() {
        let hit = Arc::new(Mutex::new(0));
        let h = hit.clone();
        ImmediateDispatcher.post(Box::new(move || *h.lock().unwrap() += 1));
        assert_eq!(*hit.lock().unwrap(), 1);
    }
}
