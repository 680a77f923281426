// Job Queue - bounded FIFO between the scheduler and the consumers

use crate::domain::Job;
use crate::error::{AppError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Item carried by the queue; `Stop` retires exactly one consumer
#[derive(Debug)]
pub enum QueueItem {
    Job(Job),
    Stop,
}

/// Multi-producer, multi-consumer queue
///
/// Producers wait while the queue is full. Consumers share the receiver;
/// a dropped `pop` future releases it without losing an item.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueueItem>,
    rx: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub async fn push(&self, job: Job) -> Result<()> {
        self.tx
            .send(QueueItem::Job(job))
            .await
            .map_err(|_| AppError::QueueClosed("job queue closed".to_string()))
    }

    pub async fn push_stop(&self) -> Result<()> {
        self.tx
            .send(QueueItem::Stop)
            .await
            .map_err(|_| AppError::QueueClosed("job queue closed".to_string()))
    }

    /// Next item; None once every sender is gone and the queue is drained
    pub async fn pop(&self) -> Option<QueueItem> {
        self.rx.lock().await.recv().await
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
