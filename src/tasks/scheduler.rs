//! One-shot reminder timers, indexed by task id.

use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::store::{StorageError, TaskStore};

/// Delivers a reminder text to the owner.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, text: &str) -> impl Future<Output = Result<(), String>> + Send;
}

/// Time left until `due_at`. Zero when it has already passed.
pub fn delay_until(due_at: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (due_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Pending timers by task id, each tagged with the generation that created it.
type Timers = Arc<Mutex<HashMap<i64, (u64, JoinHandle<()>)>>>;

/// Holds one pending timer per task.
///
/// A timer sleeps until the task's due time, calls the notifier once, then
/// marks the task fired in the store. Notification failures are logged and
/// not retried.
pub struct Scheduler<N: Notifier> {
    notifier: Arc<N>,
    store: Arc<dyn TaskStore>,
    timers: Timers,
    generation: AtomicU64,
}

impl<N: Notifier> Scheduler<N> {
    pub fn new(notifier: Arc<N>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            notifier,
            store,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Register a timer for a task. Past due times fire immediately.
    /// Rescheduling an id replaces its previous timer.
    pub fn schedule(&self, task_id: i64, due_at: NaiveDateTime, text: String) {
        let delay = delay_until(due_at, Local::now().naive_local());
        debug!("Scheduling task #{} in {:?}", task_id, delay);

        let notifier = self.notifier.clone();
        let store = self.store.clone();
        let timers = self.timers.clone();

        // Hold the lock across spawn so the timer cannot remove itself
        // before it has been inserted.
        let mut map = self.timers.lock().expect("scheduler lock poisoned");
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            sleep(delay).await;

            match notifier.notify(&text).await {
                Ok(()) => info!("🔔 Sent reminder for task #{}", task_id),
                Err(e) => warn!("Failed to send reminder for task #{}: {}", task_id, e),
            }
            if let Err(e) = store.mark_fired(task_id) {
                warn!("Failed to mark task #{} fired: {}", task_id, e);
            }

            // A replacement may have been scheduled while this one was firing
            let mut map = timers.lock().expect("scheduler lock poisoned");
            if map.get(&task_id).is_some_and(|(g, _)| *g == generation) {
                map.remove(&task_id);
            }
        });

        if let Some((_, previous)) = map.insert(task_id, (generation, handle)) {
            previous.abort();
        }
    }

    /// Cancel a pending timer. Returns whether one was pending.
    pub fn cancel(&self, task_id: i64) -> bool {
        let handle = self.timers.lock().expect("scheduler lock poisoned").remove(&task_id);
        match handle {
            Some((_, handle)) => {
                handle.abort();
                debug!("Cancelled timer for task #{}", task_id);
                true
            }
            None => false,
        }
    }

    /// Re-create timers for every stored task that has not fired yet.
    pub fn restore(&self) -> Result<usize, StorageError> {
        let pending = self.store.list_pending()?;
        let count = pending.len();
        for task in pending {
            self.schedule(task.id, task.due_at, task.text);
        }
        if count > 0 {
            info!("Restored {} pending reminder(s)", count);
        }
        Ok(count)
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, task_id: i64) -> bool {
        self.timers.lock().expect("scheduler lock poisoned").contains_key(&task_id)
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().expect("scheduler lock poisoned").len()
    }

    /// Abort every pending timer.
    pub fn shutdown(&self) {
        let mut map = self.timers.lock().expect("scheduler lock poisoned");
        for (_, (_, handle)) in map.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{MemoryStore, TaskDraft};
    use chrono::TimeDelta;
    use std::sync::{OnceLock, Weak};
    use tokio::sync::mpsc;

    struct ChannelNotifier {
        tx: mpsc::UnboundedSender<String>,
    }

    impl Notifier for ChannelNotifier {
        async fn notify(&self, text: &str) -> Result<(), String> {
            self.tx.send(text.to_string()).map_err(|e| e.to_string())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        async fn notify(&self, _text: &str) -> Result<(), String> {
            Err("chat not found".to_string())
        }
    }

    /// Schedules a follow-up for the same task from inside its first delivery.
    struct FollowUpNotifier {
        scheduler: OnceLock<Weak<Scheduler<FollowUpNotifier>>>,
        sent: Mutex<Vec<String>>,
    }

    impl Notifier for FollowUpNotifier {
        async fn notify(&self, text: &str) -> Result<(), String> {
            let first = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(text.to_string());
                sent.len() == 1
            };
            if first && let Some(scheduler) = self.scheduler.get().and_then(Weak::upgrade) {
                scheduler.schedule(1, now() + TimeDelta::days(1), format!("{text} again"));
            }
            Ok(())
        }
    }

    fn setup() -> (Scheduler<ChannelNotifier>, Arc<MemoryStore>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(Arc::new(ChannelNotifier { tx }), store.clone());
        (scheduler, store, rx)
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    #[test]
    fn test_delay_until() {
        let base = now();
        assert_eq!(delay_until(base + TimeDelta::seconds(5), base), Duration::from_secs(5));
        assert_eq!(delay_until(base - TimeDelta::seconds(5), base), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fires_once_at_due_time() {
        let (scheduler, store, mut rx) = setup();
        let task = store.create(&TaskDraft { due_at: now(), text: "Meeting".into() }).unwrap();

        scheduler.schedule(task.id, now() + TimeDelta::seconds(1), "Meeting".into());
        assert!(scheduler.is_scheduled(task.id));

        // Nothing before the due time
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        let text = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
        assert_eq!(text, "Meeting");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_scheduled(task.id));
        assert!(store.list_all().unwrap()[0].fired);
    }

    #[tokio::test]
    async fn test_past_due_fires_immediately() {
        let (scheduler, _store, mut rx) = setup();
        scheduler.schedule(7, now() - TimeDelta::hours(3), "late".into());

        let text = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
        assert_eq!(text, "late");
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let (scheduler, _store, mut rx) = setup();
        scheduler.schedule(1, now() + TimeDelta::milliseconds(300), "cancelled".into());

        assert!(scheduler.cancel(1));
        assert!(!scheduler.cancel(1));
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_timer() {
        let (scheduler, _store, mut rx) = setup();
        scheduler.schedule(1, now() + TimeDelta::milliseconds(200), "old".into());
        scheduler.schedule(1, now() + TimeDelta::milliseconds(400), "new".into());
        assert_eq!(scheduler.pending(), 1);

        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(text, "new");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restore_only_unfired() {
        let (scheduler, store, _rx) = setup();
        let later = now() + TimeDelta::days(1);
        let a = store.create(&TaskDraft { due_at: later, text: "a".into() }).unwrap();
        let b = store.create(&TaskDraft { due_at: later, text: "b".into() }).unwrap();
        store.mark_fired(a.id).unwrap();

        assert_eq!(scheduler.restore().unwrap(), 1);
        assert!(!scheduler.is_scheduled(a.id));
        assert!(scheduler.is_scheduled(b.id));

        scheduler.shutdown();
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_notification_still_marks_fired() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(Arc::new(FailingNotifier), store.clone());
        let task = store.create(&TaskDraft { due_at: now(), text: "x".into() }).unwrap();

        scheduler.schedule(task.id, task.due_at, task.text.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.list_all().unwrap()[0].fired);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_finished_timer_keeps_its_replacement() {
        let notifier = Arc::new(FollowUpNotifier { scheduler: OnceLock::new(), sent: Mutex::new(Vec::new()) });
        let scheduler = Arc::new(Scheduler::new(notifier.clone(), Arc::new(MemoryStore::new())));
        notifier.scheduler.set(Arc::downgrade(&scheduler)).unwrap();

        scheduler.schedule(1, now(), "first".into());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*notifier.sent.lock().unwrap(), vec!["first".to_string()]);
        // The follow-up timer is still reachable
        assert!(scheduler.is_scheduled(1));
        assert!(scheduler.cancel(1));
        assert_eq!(scheduler.pending(), 0);
    }
}
