//! Supervised background drain of the message queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{DrainSummary, MessageQueue, Result};

/// Work the worker repeats on every tick
#[async_trait]
pub trait DrainTask: Send + Sync + 'static {
    async fn drain(&self) -> Result<DrainSummary>;

    /// Called before the first pass and again after every restart
    async fn recover(&self) -> Result<usize> {
        Ok(0)
    }
}

#[async_trait]
impl DrainTask for MessageQueue {
    async fn drain(&self) -> Result<DrainSummary> {
        self.process_pending().await
    }

    async fn recover(&self) -> Result<usize> {
        self.recover_interrupted().await
    }
}

pub struct QueueWorker<T: DrainTask> {
    task: Arc<T>,
    idle_interval: Duration,
    error_backoff: Duration,
}

impl QueueWorker<MessageQueue> {
    /// Worker with the intervals from the queue's pipeline configuration
    pub fn for_queue(queue: Arc<MessageQueue>) -> Self {
        let idle = queue.config().idle_interval();
        let backoff = queue.config().error_backoff();
        Self::new(queue).with_intervals(idle, backoff)
    }
}

impl<T: DrainTask> QueueWorker<T> {
    pub fn new(task: Arc<T>) -> Self {
        Self {
            task,
            idle_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(10),
        }
    }

    pub fn with_intervals(mut self, idle_interval: Duration, error_backoff: Duration) -> Self {
        self.idle_interval = idle_interval;
        self.error_backoff = error_backoff;
        self
    }

    /// Spawn the supervisor task.
    ///
    /// The drain loop runs in its own task; if it panics the supervisor
    /// waits `error_backoff`, recovers interrupted work and starts a fresh
    /// loop.
    pub fn spawn(self) -> QueueWorkerHandle {
        let cancel_token = CancellationToken::new();
        let restarts = Arc::new(AtomicU32::new(0));

        let token = cancel_token.clone();
        let restart_counter = Arc::clone(&restarts);
        let join = tokio::spawn(async move {
            info!("QueueWorker started");

            loop {
                // A panicked pass can leave items mid-delivery
                match self.task.recover().await {
                    Ok(0) => {}
                    Ok(n) => info!("QueueWorker recovered {} interrupted item(s)", n),
                    Err(e) => warn!("QueueWorker recovery failed: {}", e),
                }

                let inner = tokio::spawn(Self::run(
                    Arc::clone(&self.task),
                    token.clone(),
                    self.idle_interval,
                    self.error_backoff,
                ));
                match inner.await {
                    Ok(()) => break,
                    Err(e) if e.is_panic() => {
                        restart_counter.fetch_add(1, Ordering::SeqCst);
                        error!("QueueWorker drain loop panicked, restarting");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(self.error_backoff) => {}
                        }
                    }
                    Err(e) => {
                        warn!("QueueWorker drain loop aborted: {}", e);
                        break;
                    }
                }
            }

            info!("QueueWorker stopped");
        });

        QueueWorkerHandle {
            cancel_token,
            restarts,
            join: Some(join),
        }
    }

    async fn run(
        task: Arc<T>,
        token: CancellationToken,
        idle_interval: Duration,
        error_backoff: Duration,
    ) {
        while !token.is_cancelled() {
            let pause = match task.drain().await {
                Ok(summary) => {
                    if summary.attempted > 0 || summary.failed > 0 {
                        info!(
                            "Drain pass: {} sent, {} retrying, {} failed",
                            summary.sent, summary.retried, summary.failed
                        );
                    }
                    idle_interval
                }
                Err(e) => {
                    warn!("Drain pass failed: {}", e);
                    error_backoff
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

/// Controls a spawned [`QueueWorker`]. Dropping the handle stops the worker.
pub struct QueueWorkerHandle {
    cancel_token: CancellationToken,
    restarts: Arc<AtomicU32>,
    join: Option<JoinHandle<()>>,
}

impl QueueWorkerHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// How many times the drain loop was restarted after a panic
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stop the worker and wait for it to exit. A pass in flight finishes first.
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("QueueWorker exited abnormally: {}", e);
            }
        }
    }
}

impl Drop for QueueWorkerHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
