//! Bounded pool running transcode tasks in the background.
//!
//! Enqueueing never blocks the caller. A dispatcher task pulls from an
//! unbounded queue and starts a worker for each task once one of the
//! `pool_size` permits is free, so at most `pool_size` transcoder processes
//! run at once. Finished tasks are published on a broadcast channel.

use super::worker::{TranscodeOutcome, TranscodeTask, TranscodeWorker};
use crate::metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENTS_CAPACITY: usize = 256;

pub struct TranscodeQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<TranscodeTask>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<TranscodeOutcome>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl TranscodeQueue {
    /// Start the dispatcher. Must be called from within a tokio runtime.
    pub fn start(worker: Arc<TranscodeWorker>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            receiver,
            worker,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            events: events.clone(),
            pending: pending.clone(),
            shutdown: shutdown.clone(),
        };
        info!("Transcode pool starting with {} workers", pool_size);
        let handle = tokio::spawn(dispatcher.run());

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(handle)),
            events,
            pending,
            shutdown,
        }
    }

    /// Queue a task. Returns false once the queue has been shut down.
    pub fn enqueue(&self, task: TranscodeTask) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = sender.as_ref() else {
            warn!("Transcode queue closed, dropping task for asset {}", task.asset_id);
            return false;
        };
        let asset_id = task.asset_id;
        self.pending.fetch_add(1, Ordering::SeqCst);
        metrics::transcode_enqueued();
        if sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            metrics::transcode_dequeued();
            warn!("Transcode dispatcher gone, dropping task for asset {}", asset_id);
            return false;
        }
        debug!("Queued transcode of asset {}", asset_id);
        true
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscodeOutcome> {
        self.events.subscribe()
    }

    /// Stop accepting tasks, finish every queued and running one, then return.
    pub async fn drain(&self) {
        self.close_sender();
        self.join_dispatcher().await;
    }

    /// Stop accepting tasks and drop the queued ones. Running tasks finish.
    /// Dropped assets stay provisional until they are resumed.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.close_sender();
        self.join_dispatcher().await;
    }

    fn close_sender(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    async fn join_dispatcher(&self) {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Transcode dispatcher crashed: {}", e);
            }
        }
    }
}

/// Pool slot of a running task. Released on drop, also when the worker panics.
struct RunningSlot {
    pending: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        metrics::transcode_dequeued();
    }
}

struct Dispatcher {
    receiver: mpsc::UnboundedReceiver<TranscodeTask>,
    worker: Arc<TranscodeWorker>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    events: broadcast::Sender<TranscodeOutcome>,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = self.receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.drop_task(&task);
                    break;
                }
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = self.worker.clone();
            let events = self.events.clone();
            let slot = RunningSlot {
                pending: self.pending.clone(),
                _permit: permit,
            };
            tokio::spawn(async move {
                let outcome = worker.process(&task).await;
                drop(slot);
                // No subscribers is fine
                let _ = events.send(outcome);
            });
        }

        self.receiver.close();
        while let Ok(task) = self.receiver.try_recv() {
            self.drop_task(&task);
        }

        // Every permit back means no worker is running
        if let Ok(permits) = self.permits.acquire_many(self.pool_size as u32).await {
            drop(permits);
        }
        info!("Transcode pool stopped");
    }

    fn drop_task(&self, task: &TranscodeTask) {
        debug!("Not starting transcode of asset {}", task.asset_id);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        metrics::transcode_dequeued();
    }
}
