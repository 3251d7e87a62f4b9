use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Deduplicating FIFO of object keys.
///
/// A key is held at most once while waiting. Once taken by [`next`](Self::next)
/// it may be queued again, so changes made while a key is being processed
/// lead to one more pass after the current one.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
}

struct QueueInner {
    queue: VecDeque<String>,
    pending: HashSet<String>,
    shutdown: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                queue: VecDeque::new(),
                pending: HashSet::new(),
                shutdown: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue `key` unless it is already waiting.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.shutdown || !inner.pending.insert(key.clone()) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<String> {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.shutdown {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.pending.remove(&key);
                    return Some(key);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop handing out keys; pending keys are dropped.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.queue.clear();
        inner.pending.clear();
        drop(inner);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
