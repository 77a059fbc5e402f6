//! Notification dispatcher: bounded queue and delivery workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vigil_models::{AlarmEvent, NotificationChannel, NotifyTarget};

use crate::engine::AlarmSink;
use crate::error::NotifyResult;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_WORKERS: usize = 4;

/// One alarm to deliver, carrying everything a channel needs.
#[derive(Debug, Clone)]
pub struct NotificationTask {
    pub rule_id: String,
    pub rule_name: String,
    pub channels: Vec<NotificationChannel>,
    pub event: AlarmEvent,
    pub notify: Option<NotifyTarget>,
}

/// A delivery backend for one notification channel.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn kind(&self) -> NotificationChannel;

    async fn deliver(&self, task: &NotificationTask) -> NotifyResult<()>;
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Fans alarm tasks out to delivery channels on a fixed worker pool.
///
/// The queue is bounded; when full, the newest task is dropped and
/// counted rather than blocking the session worker that produced it.
/// A failure on one channel never affects delivery on the others.
pub struct NotificationDispatcher {
    sender: Mutex<Option<mpsc::Sender<NotificationTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self::with_capacity(channels, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS)
    }

    pub fn with_capacity(
        channels: Vec<Arc<dyn NotifyChannel>>,
        capacity: usize,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let by_kind: Arc<HashMap<NotificationChannel, Arc<dyn NotifyChannel>>> =
            Arc::new(channels.into_iter().map(|c| (c.kind(), c)).collect());

        let delivered = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let by_kind = Arc::clone(&by_kind);
                let delivered = Arc::clone(&delivered);
                let failed = Arc::clone(&failed);
                tokio::spawn(async move {
                    loop {
                        let task = { rx.lock().await.recv().await };
                        let Some(task) = task else {
                            debug!(worker_id, "Notification worker draining complete");
                            break;
                        };
                        Self::deliver_task(&by_kind, &task, &delivered, &failed).await;
                    }
                })
            })
            .collect();

        info!(capacity, workers, "Notification dispatcher started");
        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered,
            failed,
        }
    }

    async fn deliver_task(
        by_kind: &HashMap<NotificationChannel, Arc<dyn NotifyChannel>>,
        task: &NotificationTask,
        delivered: &AtomicU64,
        failed: &AtomicU64,
    ) {
        for kind in &task.channels {
            let Some(channel) = by_kind.get(kind) else {
                warn!(?kind, rule_id = %task.rule_id, "No backend for channel");
                continue;
            };
            match channel.deliver(task).await {
                Ok(()) => {
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        ?kind,
                        rule_id = %task.rule_id,
                        session_id = %task.event.session_id,
                        error = %err,
                        "Notification delivery failed"
                    );
                }
            }
        }
    }

    /// Enqueue a task without blocking. Returns false when the queue is
    /// full and the task was dropped.
    pub fn enqueue(&self, task: NotificationTask) -> bool {
        let sender = self.sender.lock().expect("dispatcher sender lock poisoned");
        let Some(tx) = sender.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match tx.try_send(task) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    rule_id = %task.rule_id,
                    session_id = %task.event.session_id,
                    "Notification queue full, dropping alarm"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Stop accepting tasks, deliver what is already queued, then join
    /// the workers.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .expect("dispatcher sender lock poisoned")
            .take();
        drop(sender);

        let handles: Vec<_> = self
            .workers
            .lock()
            .expect("dispatcher workers lock poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Notification worker panicked");
            }
        }
        info!("Notification dispatcher stopped");
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl AlarmSink for NotificationDispatcher {
    fn submit(&self, task: NotificationTask) {
        self.enqueue(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_models::{BBox, Severity};

    fn task() -> NotificationTask {
        NotificationTask {
            rule_id: "r1".to_string(),
            rule_name: "fire watch".to_string(),
            channels: vec![NotificationChannel::Log],
            event: AlarmEvent {
                session_id: "cam-1".to_string(),
                timestamp: Utc::now(),
                severity: Severity::High,
                confidence: 0.9,
                class_name: "fire".to_string(),
                bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
                consecutive_count: 3,
                media_ref: None,
            },
            notify: None,
        }
    }

    struct CountingChannel {
        kind: NotificationChannel,
        delivered: AtomicU64,
        fail: bool,
    }

    impl CountingChannel {
        fn new(kind: NotificationChannel, fail: bool) -> Self {
            Self {
                kind,
                delivered: AtomicU64::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl NotifyChannel for CountingChannel {
        fn kind(&self) -> NotificationChannel {
            self.kind
        }

        async fn deliver(&self, _task: &NotificationTask) -> NotifyResult<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(crate::error::NotifyError::status("stub", 500))
            } else {
                Ok(())
            }
        }
    }

    /// Blocks deliveries until released; lets tests fill the queue
    /// deterministically.
    struct GatedChannel {
        started: Arc<tokio::sync::Notify>,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl NotifyChannel for GatedChannel {
        fn kind(&self) -> NotificationChannel {
            NotificationChannel::Log
        }

        async fn deliver(&self, _task: &NotificationTask) -> NotifyResult<()> {
            self.started.notify_one();
            let _permit = self.gate.acquire().await.ok();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivers_and_drains_on_shutdown() {
        let channel = Arc::new(CountingChannel::new(NotificationChannel::Log, false));
        let dispatcher = NotificationDispatcher::with_capacity(vec![channel.clone()], 16, 2);

        for _ in 0..5 {
            assert!(dispatcher.enqueue(task()));
        }
        dispatcher.shutdown().await;

        assert_eq!(channel.delivered.load(Ordering::SeqCst), 5);
        let stats = dispatcher.stats();
        assert_eq!(stats.enqueued, 5);
        assert_eq!(stats.delivered, 5);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let started = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let channel = Arc::new(GatedChannel {
            started: started.clone(),
            gate: gate.clone(),
        });
        let dispatcher = NotificationDispatcher::with_capacity(vec![channel], 2, 1);

        // First task occupies the single worker.
        assert!(dispatcher.enqueue(task()));
        started.notified().await;

        // Two more fill the queue; the fourth is dropped.
        assert!(dispatcher.enqueue(task()));
        assert!(dispatcher.enqueue(task()));
        assert!(!dispatcher.enqueue(task()));
        assert_eq!(dispatcher.stats().dropped, 1);

        gate.add_permits(16);
        dispatcher.shutdown().await;
        assert_eq!(dispatcher.stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_channel_failure_is_isolated() {
        let bad = Arc::new(CountingChannel::new(NotificationChannel::Callback, true));
        let good = Arc::new(CountingChannel::new(NotificationChannel::Log, false));
        let dispatcher =
            NotificationDispatcher::with_capacity(vec![bad.clone(), good.clone()], 16, 1);

        let mut t = task();
        t.channels = vec![NotificationChannel::Callback, NotificationChannel::Log];
        dispatcher.enqueue(t);
        dispatcher.shutdown().await;

        assert_eq!(bad.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(good.delivered.load(Ordering::SeqCst), 1);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let channel = Arc::new(CountingChannel::new(NotificationChannel::Log, false));
        let dispatcher = NotificationDispatcher::with_capacity(vec![channel], 4, 1);
        dispatcher.shutdown().await;

        assert!(!dispatcher.enqueue(task()));
        assert_eq!(dispatcher.stats().dropped, 1);
    }
}
