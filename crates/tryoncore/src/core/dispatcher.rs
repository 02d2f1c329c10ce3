//! Process-wide serialization of calls to a rate-limited vendor.
//!
//! A [`RateLimitedDispatcher`] owns one worker task. The worker receives jobs over an
//! unbounded channel and runs them strictly in FIFO order, one at a time. Before starting a
//! job it waits out whatever remains of the minimum interval since the previous job settled.
//!
//! Each job runs in its own spawned task, so a panicking operation is reported to its caller
//! as [`DispatchError::Aborted`] and the worker moves on to the next job.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::core::metrics;

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// The worker task is gone (runtime shutting down)
    #[error("dispatcher '{0}' is closed")]
    Closed(String),

    /// The operation panicked or was cancelled while running
    #[error("operation aborted in dispatcher '{0}'")]
    Aborted(String),
}

/// Serializes operations and spaces their start times by a minimum interval.
///
/// Cloning is cheap and every clone feeds the same queue.
#[derive(Clone)]
pub struct RateLimitedDispatcher {
    name: String,
    min_interval: Duration,
    tx: mpsc::UnboundedSender<Job>,
}

impl RateLimitedDispatcher {
    /// Creates a dispatcher and spawns its worker on the current tokio runtime.
    ///
    /// # Arguments
    /// * `name` - Label used in logs and metrics (e.g. "vision")
    /// * `min_interval` - Minimum time between the end of one operation and the start of the next
    pub fn new(name: impl Into<String>, min_interval: Duration) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(name.clone(), min_interval, rx));
        log::info!("Dispatcher '{}' started with min interval {:?}", name, min_interval);
        Self { name, min_interval, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Queues `operation` and resolves with its output once it has run.
    ///
    /// The operation's own failure travels inside `T`; a [`DispatchError`] means the operation
    /// never produced an output.
    pub async fn enqueue<F, Fut, T>(&self, operation: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued_at = Instant::now();
        let name = self.name.clone();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                metrics::DISPATCH_WAIT_SECONDS
                    .with_label_values(&[&name])
                    .observe(queued_at.elapsed().as_secs_f64());
                let outcome = tokio::spawn(operation()).await;
                // The caller may have gone away; the slot is consumed either way.
                let _ = reply_tx.send(outcome);
            })
        });

        self.tx
            .send(job)
            .map_err(|_| DispatchError::Closed(self.name.clone()))?;

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join_err)) => {
                log::error!("Operation in dispatcher '{}' aborted: {}", self.name, join_err);
                Err(DispatchError::Aborted(self.name.clone()))
            }
            Err(_) => Err(DispatchError::Closed(self.name.clone())),
        }
    }
}

async fn run_worker(name: String, min_interval: Duration, mut rx: mpsc::UnboundedReceiver<Job>) {
    let mut last_settled: Option<Instant> = None;

    while let Some(job) = rx.recv().await {
        if let Some(last) = last_settled {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait = min_interval - elapsed;
                log::debug!("Dispatcher '{}' waiting {:?} before next call", name, wait);
                tokio::time::sleep(wait).await;
            }
        }

        job().await;
        last_settled = Some(Instant::now());
    }

    log::info!("Dispatcher '{}' stopped", name);
}
