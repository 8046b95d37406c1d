//! Background queue that moves decision writes off the routing path.
//!
//! Delivery is at-least-once: a write that keeps failing stays queued and is
//! retried on the next command, and the store upsert is idempotent by id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::PerformanceRecord;
use super::store::LedgerStore;
use crate::{Result, RoutingError};

enum WriterCommand {
    Record(PerformanceRecord),
    /// Replies with the number of records still undelivered.
    Flush(oneshot::Sender<usize>),
}

/// Handle to the background writer task.
pub struct LedgerWriter {
    sender: mpsc::UnboundedSender<WriterCommand>,
    handle: JoinHandle<()>,
}

impl LedgerWriter {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn LedgerStore>, max_retries: u32) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = WriterWorker {
            store,
            max_retries: max_retries.max(1),
            pending: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(receiver));
        Self { sender, handle }
    }

    /// Queues a record.
    ///
    /// # Errors
    /// Returns an error if the worker has stopped.
    pub fn enqueue(&self, record: PerformanceRecord) -> Result<()> {
        self.sender
            .send(WriterCommand::Record(record))
            .map_err(|_| RoutingError::Ledger("ledger writer has stopped".to_owned()))
    }

    /// Waits until every record queued so far has been attempted.
    ///
    /// # Errors
    /// Returns an error if the worker has stopped or some records are still undelivered.
    pub async fn flush(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(WriterCommand::Flush(reply))
            .map_err(|_| RoutingError::Ledger("ledger writer has stopped".to_owned()))?;
        let pending = response
            .await
            .map_err(|_| RoutingError::Ledger("ledger writer dropped flush".to_owned()))?;
        if pending == 0 {
            Ok(())
        } else {
            Err(RoutingError::Ledger(format!(
                "{pending} ledger records still undelivered"
            )))
        }
    }

    /// Drains the queue and stops the worker.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(error) = self.handle.await {
            warn!(%error, "ledger writer task failed");
        }
    }
}

struct WriterWorker {
    store: Arc<dyn LedgerStore>,
    max_retries: u32,
    pending: Vec<PerformanceRecord>,
}

impl WriterWorker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<WriterCommand>) {
        while let Some(command) = receiver.recv().await {
            self.retry_pending().await;
            match command {
                WriterCommand::Record(record) => {
                    if !self.deliver(&record).await {
                        self.pending.push(record);
                    }
                }
                WriterCommand::Flush(reply) => {
                    if reply.send(self.pending.len()).is_err() {
                        debug!("flush requester went away");
                    }
                }
            }
        }
        self.retry_pending().await;
        if !self.pending.is_empty() {
            warn!(count = self.pending.len(), "ledger writer stopped with undelivered records");
        }
    }

    async fn retry_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for record in pending {
            if !self.deliver(&record).await {
                self.pending.push(record);
            }
        }
    }

    async fn deliver(&self, record: &PerformanceRecord) -> bool {
        for attempt in 1..=self.max_retries {
            match self.store.upsert_decision(record.clone()).await {
                Ok(()) => return true,
                Err(error) => {
                    warn!(decision = %record.decision_id, attempt, %error, "ledger write failed");
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    }
                }
            }
        }
        false
    }
}
