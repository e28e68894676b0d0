//! Bounded worker pool for slow authentication work.
//!
//! Credential callbacks may block on user input for minutes, so handlers
//! that can reach them never run on the task delivering the triggering
//! message. Jobs queue on an unbounded channel and a fixed set of workers
//! drains it.

use std::sync::Arc;

use bus_types::{BusError, BusResult};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

pub(crate) type Job = BoxFuture<'static, ()>;

#[derive(Default)]
pub(crate) struct Dispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `workers` tasks on the current runtime. Idempotent.
    pub(crate) fn start(&self, workers: usize) -> BusResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| BusError::Fail("no async runtime".to_string()))?;
        let mut tx_slot = self.tx.lock();
        if tx_slot.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(AsyncMutex::new(rx));
        let mut pool = self.workers.lock();
        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            pool.push(handle.spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
            }));
        }
        *tx_slot = Some(tx);
        Ok(())
    }

    /// Queue a job.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Stopping` when the pool is not running.
    pub(crate) fn submit(&self, job: Job) -> BusResult<()> {
        self.tx
            .lock()
            .as_ref()
            .ok_or(BusError::Stopping)?
            .send(job)
            .map_err(|_| BusError::Stopping)
    }

    /// Refuse new jobs; workers exit once the queue drains.
    pub(crate) fn stop(&self) {
        self.tx.lock().take();
        self.workers.lock().clear();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }
}
