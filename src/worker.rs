//! Serialized job workers.
//!
//! Two of these run per session: one for fire-and-forget local I/O
//! (ICE-server prefetch, the call-log write) and one dedicated to signaling
//! HTTP, so outbound signaling requests execute strictly in submission
//! order. Jobs run one at a time on a single task; a job submitted after
//! shutdown is dropped. Jobs are expected to check the session's finishing
//! guard themselves before mutating state.

use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug)]
pub struct SerialWorker {
    name: &'static str,
    tx: mpsc::UnboundedSender<Job>,
    closed: AtomicBool,
}

impl SerialWorker {
    pub fn spawn(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self {
            name,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a job. Returns `false` if the worker has been shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            debug!(target: "Calls/Worker", "{}: job dropped after shutdown", self.name);
            return false;
        }
        self.tx.send(Box::pin(job)).is_ok()
    }

    /// Refuse further submissions. Jobs already queued still drain, which is
    /// what lets an in-flight signaling request finish; its result is then
    /// discarded by the finishing guard.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
