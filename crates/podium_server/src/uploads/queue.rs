use podium_core::upload::UploadTask;
use podium_core::{PodiumError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Sending side of the upload queue.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::UnboundedSender<UploadTask>,
    pending: Arc<AtomicUsize>,
}

/// Receiving side, shared by all workers of the pool.
#[derive(Clone)]
pub struct UploadReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<UploadTask>>>,
    pending: Arc<AtomicUsize>,
}

/// Create a connected queue and receiver.
pub fn upload_queue() -> (UploadQueue, UploadReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        UploadQueue {
            tx,
            pending: pending.clone(),
        },
        UploadReceiver {
            rx: Arc::new(Mutex::new(rx)),
            pending,
        },
    )
}

impl UploadQueue {
    pub fn enqueue(&self, task: UploadTask) -> Result<()> {
        debug!(
            "Queueing upload of {} for block {} ({})",
            task.prop_name, task.block_id, task.temp_path
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(task).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            PodiumError::Storage(format!(
                "upload queue closed, dropped task for block {}",
                e.0.block_id
            ))
        })
    }

    /// Tasks queued or in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl UploadReceiver {
    /// Wait for the next task, `None` once every sender is gone.
    pub async fn next(&self) -> Option<UploadTask> {
        self.rx.lock().await.recv().await
    }

    /// Mark a received task as finished.
    pub fn done(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(block_id: i64) -> UploadTask {
        UploadTask {
            website_id: 1,
            block_id,
            temp_path: format!("block-{}-imageUrl-abcd1234.png", block_id),
            destination_path: format!("blocks/1/{}/abcd1234-1700000000.png", block_id),
            prop_name: "imageUrl".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fifo_and_pending_count() {
        let (queue, receiver) = upload_queue();
        queue.enqueue(task(1)).unwrap();
        queue.enqueue(task(2)).unwrap();
        assert_eq!(queue.pending(), 2);

        assert_eq!(receiver.next().await.unwrap().block_id, 1);
        receiver.done();
        assert_eq!(queue.pending(), 1);
        assert_eq!(receiver.next().await.unwrap().block_id, 2);
        receiver.done();
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped() {
        let (queue, receiver) = upload_queue();
        drop(receiver);
        assert!(queue.enqueue(task(1)).is_err());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_receiver_ends_when_senders_drop() {
        let (queue, receiver) = upload_queue();
        drop(queue);
        assert!(receiver.next().await.is_none());
    }
}
