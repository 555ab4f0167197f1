//! Cooperative periodic task runner.
//!
//! Each tick fires every task whose elapsed time since its last run is at
//! least its interval. `last_run` is set to the time the task was invoked, so
//! a slow task pushes its own next firing back by its latency. A failing task
//! is logged and never stops the loop or its siblings.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::DaemonError;

pub type TaskResult = Result<(), DaemonError>;

#[async_trait]
pub trait Task: Send {
    async fn run(&mut self) -> TaskResult;
}

#[async_trait]
impl<F, Fut> Task for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn run(&mut self) -> TaskResult {
        (self)().await
    }
}

/// Source of whole seconds for scheduling decisions
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Monotonic seconds since the clock was created
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Hand-driven clock
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Stops a running scheduler after its current tick
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct ScheduledTask {
    name: String,
    interval_secs: u64,
    task: Box<dyn Task>,
    last_run: u64,
}

pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    handle: StopHandle,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self::with_clock(tick, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(tick: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Vec::new(),
            clock,
            tick: tick.max(Duration::from_millis(1)),
            handle: StopHandle {
                running: Arc::new(AtomicBool::new(true)),
                wake: Arc::new(Notify::new()),
            },
        }
    }

    /// Register a task. The first firing is one interval after registration.
    pub fn register<T>(&mut self, name: impl Into<String>, interval_secs: u64, task: T)
    where
        T: Task + 'static,
    {
        let name = name.into();
        if interval_secs == 0 {
            warn!(task = %name, "sub-tick interval requested, running every tick");
        }
        info!(task = %name, interval_secs, "registering task");
        self.tasks.push(ScheduledTask {
            name,
            interval_secs: interval_secs.max(1),
            task: Box::new(task),
            last_run: self.clock.now_secs(),
        });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Fire every due task once. Returns how many fired.
    pub async fn tick(&mut self) -> usize {
        let now = self.clock.now_secs();
        let mut fired = 0;

        for entry in self.tasks.iter_mut() {
            if now.saturating_sub(entry.last_run) < entry.interval_secs {
                continue;
            }
            entry.last_run = now;
            fired += 1;

            match entry.task.run().await {
                Ok(()) => debug!(task = %entry.name, "task completed"),
                Err(e) => error!(task = %entry.name, error = %e, "task failed"),
            }
        }

        fired
    }

    /// Tick until stopped
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tasks = self.tasks.len(), "scheduler running");

        while self.handle.is_running() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.handle.wake.notified() => {}
            }
            if !self.handle.is_running() {
                break;
            }
            self.tick().await;
        }

        info!("scheduler stopped");
    }
}
