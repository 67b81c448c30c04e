//! Fixed-interval scheduler for the keeper's periodic tasks.
//!
//! One loop wakes every second, spawns each task that is due, and skips a task
//! whose previous run is still in flight. Different tasks run concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, Instrument};

use crate::types::RunSummary;

const TICK: Duration = Duration::from_secs(1);

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self) -> Result<RunSummary>;
}

/// Snapshot of one task, as served on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: &'static str,
    pub interval_secs: u64,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

/// Shared view of every registered task.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<&'static str, TaskStatus>>>,
}

impl StatusBoard {
    pub async fn snapshot(&self) -> Vec<TaskStatus> {
        self.inner.read().await.values().cloned().collect()
    }

    async fn register(&self, name: &'static str, interval: Duration) {
        self.inner.write().await.insert(
            name,
            TaskStatus {
                name,
                interval_secs: interval.as_secs(),
                running: false,
                last_run: None,
                next_run: Some(Utc::now()),
                last_outcome: None,
            },
        );
    }

    async fn started(&self, name: &'static str, interval: Duration) {
        if let Some(status) = self.inner.write().await.get_mut(name) {
            let now = Utc::now();
            status.running = true;
            status.last_run = Some(now);
            status.next_run = chrono::Duration::from_std(interval).ok().map(|d| now + d);
        }
    }

    async fn finished(&self, name: &'static str, outcome: String) {
        if let Some(status) = self.inner.write().await.get_mut(name) {
            status.running = false;
            status.last_outcome = Some(outcome);
        }
    }
}

pub struct TaskDescriptor {
    pub task: Arc<dyn PeriodicTask>,
    pub interval: Duration,
}

struct Registered {
    descriptor: TaskDescriptor,
    running: Arc<AtomicBool>,
    next_due: Instant,
}

pub struct Scheduler {
    tasks: Vec<Registered>,
    board: StatusBoard,
}

/// Clears the running flag however the task ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(board: StatusBoard) -> Self {
        Self { tasks: Vec::new(), board }
    }

    /// Register a task; it first runs on the next tick.
    pub async fn register(&mut self, task: Arc<dyn PeriodicTask>, interval: Duration) {
        self.board.register(task.name(), interval).await;
        self.tasks.push(Registered {
            descriptor: TaskDescriptor { task, interval },
            running: Arc::new(AtomicBool::new(false)),
            next_due: Instant::now(),
        });
    }

    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.descriptor.task.name()).collect()
    }

    /// Spawn every task due at `now`; returns the handles of what was started.
    pub fn tick(&mut self, now: Instant) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();
        for registered in &mut self.tasks {
            if now < registered.next_due {
                continue;
            }
            let name = registered.descriptor.task.name();
            registered.next_due = now + registered.descriptor.interval;

            if registered
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!(task = name, "previous run still in progress, skipping");
                continue;
            }

            let guard = RunningGuard(registered.running.clone());
            let task = registered.descriptor.task.clone();
            let interval = registered.descriptor.interval;
            let board = self.board.clone();
            let span = tracing::info_span!("task", name);
            started.push(tokio::spawn(
                async move {
                    let _guard = guard;
                    board.started(name, interval).await;
                    let outcome = execute(task.as_ref()).await;
                    board.finished(name, outcome).await;
                }
                .instrument(span),
            ));
        }
        started
    }

    /// Drive the tasks until `shutdown` resolves.
    pub async fn run<F: Future<Output = ()>>(mut self, shutdown: F) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tasks = ?self.task_names(), "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Run one named task to completion, outside the schedule.
    pub async fn run_once(&self, name: &str) -> Result<RunSummary> {
        let registered = self
            .tasks
            .iter()
            .find(|t| t.descriptor.task.name() == name)
            .ok_or_else(|| eyre!("unknown task {:?} (known: {:?})", name, self.task_names()))?;
        registered.descriptor.task.run().await
    }
}

async fn execute(task: &dyn PeriodicTask) -> String {
    let started = std::time::Instant::now();
    match task.run().await {
        Ok(summary) => {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, %summary, "run complete");
            format!("ok: {}", summary)
        }
        Err(e) => {
            error!("run failed: {:#}", e);
            format!("error: {:#}", e)
        }
    }
}
