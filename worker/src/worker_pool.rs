use std::sync::Arc;

use crates::domain::value_objects::recording_task::RecordingTask;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::usecases::recording_processor::TaskHandler;

pub fn channel(capacity: usize) -> (mpsc::Sender<RecordingTask>, mpsc::Receiver<RecordingTask>) {
    mpsc::channel(capacity.max(1))
}

/// Fixed set of workers draining one shared queue. Workers exit once every
/// sender is dropped and the queue is empty.
pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    pub fn spawn<H>(count: usize, receiver: mpsc::Receiver<RecordingTask>, handler: Arc<H>) -> Self
    where
        H: TaskHandler + Send + Sync + 'static,
    {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = JoinSet::new();
        for worker_id in 0..count.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            workers.spawn(run_worker(worker_id, receiver, handler));
        }
        info!(workers = count.max(1), "worker_pool: started");
        Self { workers }
    }

    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "worker_pool: worker panicked");
            }
        }
        info!("worker_pool: all workers stopped");
    }
}

async fn run_worker<H>(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<RecordingTask>>>,
    handler: Arc<H>,
) where
    H: TaskHandler + Send + Sync + 'static,
{
    loop {
        // The lock is only held while waiting for the next task.
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        info!(worker_id, stream_id = %task.stream_id, "worker_pool: picked up task");
        handler.handle(task).await;
    }
    info!(worker_id, "worker_pool: worker stopped");
}
