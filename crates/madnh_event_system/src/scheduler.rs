//! Deferred task execution for async listeners and async follower notices.
//!
//! Emitters never spawn timers themselves; they hand a [`Task`] and a delay
//! to a [`Scheduler`]. Production code uses [`TokioScheduler`], tests use
//! [`ManualScheduler`] and drive its clock by hand.
//!
//! Deferred tasks are fire-and-forget: once scheduled they cannot be
//! cancelled, and two tasks scheduled for the same instant carry no ordering
//! guarantee beyond what the concrete scheduler documents.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, trace};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts tasks to run after a delay.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Schedules `task` to run once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task);
}

/// Runs tasks on a tokio runtime.
///
/// The runtime handle is captured at construction when one is available,
/// otherwise looked up at scheduling time. Callers outside any runtime share
/// a lazily started single-worker runtime, so a task never runs on the
/// caller's stack.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let handle = self
            .handle
            .clone()
            .or_else(|| Handle::try_current().ok())
            .or_else(fallback_handle);
        match handle {
            Some(handle) => {
                handle.spawn(async move {
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    task();
                });
            }
            None => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    task();
                });
            }
        }
    }
}

/// Handle of the runtime shared by schedulers used outside any runtime.
fn fallback_handle() -> Option<Handle> {
    static FALLBACK: OnceLock<Option<Runtime>> = OnceLock::new();
    FALLBACK
        .get_or_init(|| {
            let runtime = Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("madnh-scheduler")
                .enable_time()
                .build();
            match runtime {
                Ok(runtime) => {
                    debug!("⏱️ No tokio runtime in scope, started the shared scheduler runtime");
                    Some(runtime)
                }
                Err(e) => {
                    error!("❌ Failed to start scheduler runtime, deferring on threads: {}", e);
                    None
                }
            }
        })
        .as_ref()
        .map(|runtime| runtime.handle().clone())
}

#[derive(Default)]
struct ManualQueue {
    now: Duration,
    next_seq: u64,
    tasks: BTreeMap<(Duration, u64), Task>,
}

/// Deterministic scheduler with a fake clock.
///
/// Tasks run only when the clock is advanced, in order of due time and then
/// scheduling order. Tasks scheduled while others run are picked up in the
/// same pass if they are already due.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<ManualQueue>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ManualScheduler")
            .field("now", &queue.now)
            .field("pending", &queue.tasks.len())
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fake time.
    pub fn now(&self) -> Duration {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .len()
    }

    /// Moves the clock forward by `by` and runs every task that became due.
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let deadline = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.now += by;
            queue.now
        };
        self.run_until(deadline)
    }

    /// Runs every queued task, including ones scheduled along the way,
    /// moving the clock to each task's due time. Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                match queue.tasks.pop_first() {
                    Some(((due, _), task)) => {
                        if due > queue.now {
                            queue.now = due;
                        }
                        task
                    }
                    None => break,
                }
            };
            task();
            ran += 1;
        }
        ran
    }

    fn run_until(&self, deadline: Duration) -> usize {
        let mut ran = 0;
        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                let is_due = matches!(
                    queue.tasks.first_key_value(),
                    Some((&(due, _), _)) if due <= deadline
                );
                if is_due {
                    queue.tasks.pop_first().map(|(_, task)| task)
                } else {
                    None
                }
            };
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let due = queue.now + delay;
        let seq = queue.next_seq;
        queue.next_seq += 1;
        trace!("Queued deferred task #{} due at {:?}", seq, due);
        queue.tasks.insert((due, seq), task);
    }
}
