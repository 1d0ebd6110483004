use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex, Notify,
};

/// A queue item: either work, or an instruction for one worker to exit.
#[derive(Debug)]
pub enum WorkItem<T> {
    Task(T),
    Shutdown,
}

/// Multi-producer multi-consumer FIFO with a join barrier.
///
/// Every pushed item (shutdown sentinels included) must be balanced by one
/// `task_done` call once a worker has finished handling it; `join` resolves
/// when the outstanding count reaches zero. One `Shutdown` retires exactly
/// one worker, because only a single consumer can pop it.
pub struct TaskQueue<T> {
    tx: UnboundedSender<WorkItem<T>>,
    rx: Arc<Mutex<UnboundedReceiver<WorkItem<T>>>>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl<T: Send> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn push(&self, task: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(WorkItem::Task(task)).ok();
    }

    pub fn push_shutdown(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(WorkItem::Shutdown).ok();
    }

    /// Blocks until an item is available. A closed channel reads as
    /// `Shutdown` so orphaned workers still exit.
    pub async fn pop(&self) -> WorkItem<T> {
        let mut receiver = self.rx.lock().await;
        receiver.recv().await.unwrap_or(WorkItem::Shutdown)
    }

    pub fn task_done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolves once every pushed item has been balanced by `task_done`.
    pub async fn join(&self) {
        loop {
            let drained = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }
}

impl<T: Send> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            pending: self.pending.clone(),
            drained: self.drained.clone(),
        }
    }
}
