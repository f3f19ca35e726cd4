//! Fixed-size async worker pool shared by all calls.
//!
//! Jobs go through a bounded queue. `submit` never waits: when the queue is
//! full the job is handed back as `PoolSaturated` and the caller decides what
//! to log. Workers take jobs in submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{RelayError, RelayResult};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
}

/// Owns the worker tasks; dropping every `WorkerPool` handle lets them drain and exit.
pub struct PoolWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks on the current runtime.
    pub fn spawn(workers: usize, queue_capacity: usize) -> (Self, PoolWorkers) {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        // hold the lock only while waiting for the next job
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    log::debug!("worker {} exiting", id);
                })
            })
            .collect();

        log::info!(
            "Worker pool started: {} workers, queue capacity {}",
            workers.max(1),
            queue_capacity.max(1)
        );
        (Self { tx }, PoolWorkers { handles })
    }

    pub fn submit<F>(&self, job: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.try_send(Box::pin(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::PoolSaturated,
            mpsc::error::TrySendError::Closed(_) => RelayError::PoolClosed,
        })
    }
}

impl PoolWorkers {
    /// Waits for queued jobs to finish. Only returns once every pool handle is dropped.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
