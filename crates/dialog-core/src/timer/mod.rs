//! # Timer service
//!
//! Every delayed action in the stack (transaction retransmissions and
//! timeouts, 2xx retransmission, early-dialog expiry, linger cleanup) is a
//! task scheduled here. A task does not touch shared state itself; it pushes
//! a command onto the channel of the entity that owns the state, so timer
//! firings and network events for one entity are handled sequentially by
//! that entity's executor.
//!
//! ```rust
//! use std::time::Duration;
//! use sipflow_dialog_core::timer::TimerService;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let timers = TimerService::new();
//! let (tx, mut rx) = mpsc::channel(1);
//! timers.schedule(Duration::from_millis(5), async move {
//!     let _ = tx.send("fired").await;
//! });
//! assert_eq!(rx.recv().await, Some("fired"));
//! # }
//! ```

mod settings;

pub use settings::TimerSettings;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Schedules one-shot and repeating tasks on the tokio runtime
#[derive(Debug)]
pub struct TimerService {
    next_id: AtomicU64,
    tasks: Arc<DashMap<TimerId, JoinHandle<()>>>,
    started: AtomicBool,
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: Arc::new(DashMap::new()),
            started: AtomicBool::new(true),
        }
    }

    fn allocate(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.allocate();
        if !self.is_started() {
            return id;
        }
        let tasks = self.tasks.clone();
        self.spawn_tracked(id, async move {
            tokio::time::sleep(delay).await;
            tasks.remove(&id);
            task.await;
        });
        id
    }

    /// Runs `task` after `initial_delay` and again after each delay it returns.
    /// Returning `None` ends the repetition.
    pub fn schedule_repeating<F, Fut>(&self, initial_delay: Duration, mut task: F) -> TimerId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Duration>> + Send + 'static,
    {
        let id = self.allocate();
        if !self.is_started() {
            return id;
        }
        let tasks = self.tasks.clone();
        self.spawn_tracked(id, async move {
            let mut delay = initial_delay;
            loop {
                tokio::time::sleep(delay).await;
                match task().await {
                    Some(next) => delay = next,
                    None => break,
                }
            }
            tasks.remove(&id);
        });
        id
    }

    /// Runs `task` every `period` after `initial_delay` until it returns false
    pub fn schedule_periodic<F, Fut>(&self, initial_delay: Duration, period: Duration, mut task: F) -> TimerId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.schedule_repeating(initial_delay, move || {
            let fut = task();
            async move { fut.await.then_some(period) }
        })
    }

    /// Spawns `body` but holds it until its handle is in the task table, so
    /// the entry it removes on completion is always there to remove
    fn spawn_tracked<F>(&self, id: TimerId, body: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (armed, wait_armed) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if wait_armed.await.is_ok() {
                body.await;
            }
        });
        self.tasks.insert(id, handle);
        let _ = armed.send(());
    }

    /// Cancels a task that has not fired yet. Returns false if it already ran.
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.tasks.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                trace!(timer = %id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of tasks still pending
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels everything and refuses new tasks
    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
        let ids: Vec<TimerId> = self.tasks.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let id = timers.schedule(Duration::from_secs(1), async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(timers.cancel(id));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!timers.cancel(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_backoff_stops() {
        let timers = TimerService::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        timers.schedule_repeating(Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                (n < 3).then(|| Duration::from_millis(100 * n as u64))
            }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_until_task_declines() {
        let timers = TimerService::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        timers.schedule_periodic(Duration::from_millis(50), Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 4 }
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_periodic() {
        let timers = TimerService::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = timers.schedule_periodic(Duration::ZERO, Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(timers.cancel(id));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_delay_tasks_leave_no_handles() {
        let timers = TimerService::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for _ in 0..200 {
            let tx = tx.clone();
            timers.schedule(Duration::ZERO, async move {
                let _ = tx.send(());
            });
        }
        for _ in 0..200 {
            rx.recv().await.unwrap();
        }
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_refuses_new_tasks() {
        let timers = TimerService::new();
        timers.schedule(Duration::from_secs(10), async {});
        assert_eq!(timers.pending(), 1);
        timers.stop();
        assert!(!timers.is_started());
        assert_eq!(timers.pending(), 0);
        timers.schedule(Duration::from_secs(1), async {});
        assert_eq!(timers.pending(), 0);
    }
}
