//! Bounded worker pool.
//!
//! The pool accepts [`Worker`]s through a rendezvous channel, holds them in
//! an ordered queue and dispatches them onto tokio tasks while the number of
//! running workers stays below the configured target. Every executed worker
//! produces exactly one [`JobStats`] on the outbound channel; the channel is
//! closed exactly once, after all in-flight workers have finished, when the
//! pool shuts down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::queue::Queue;

/// How often the monitor re-checks the holding queue for dispatchable work.
pub const DEFAULT_DISPATCH_TICK: Duration = Duration::from_secs(3);

/// Error type recorded in [`JobStats`] when an executor fails.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

type Exec =
    Box<dyn FnOnce(CancellationToken, String) -> BoxFuture<'static, Result<(), JobError>> + Send>;

/// A unit of work: an async executor plus a human-readable description.
pub struct Job {
    description: String,
    exec: Exec,
}

impl Job {
    /// Create a job from `exec`, which receives the cancellation token and
    /// the job's own description as an identifier.
    pub fn new<F, Fut>(description: impl Into<String>, exec: F) -> Self
    where
        F: FnOnce(CancellationToken, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            description: description.into(),
            exec: Box::new(move |cancel, id| Box::pin(exec(cancel, id))),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Outcome of one executed job.
#[derive(Debug)]
pub struct JobStats {
    pub description: String,
    pub error: Option<JobError>,
    pub created_at: Instant,
    pub started_at: Instant,
    pub finished_at: Instant,
}

/// A job bound to its creation time. Running a worker consumes it and
/// yields exactly one [`JobStats`].
pub struct Worker {
    created_at: Instant,
    job: Job,
}

impl Worker {
    pub fn new(job: Job) -> Self {
        Self {
            created_at: Instant::now(),
            job,
        }
    }

    /// Execute the job and record its timings.
    pub async fn run(self, cancel: CancellationToken) -> JobStats {
        let started_at = Instant::now();
        let description = self.job.description;
        let result = (self.job.exec)(cancel, description.clone()).await;
        JobStats {
            description,
            error: result.err(),
            created_at: self.created_at,
            started_at,
            finished_at: Instant::now(),
        }
    }
}

/// A pool that runs admitted workers on a bounded number of tokio tasks.
pub struct WorkPool {
    started: AtomicBool,

    target: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,

    pending: Arc<Mutex<Queue<Worker>>>,
    admit_tx: mpsc::Sender<Worker>,
    admit_rx: Mutex<Option<mpsc::Receiver<Worker>>>,
    stats_tx: Mutex<Option<mpsc::Sender<JobStats>>>,
    done: CancellationToken,
    tick: Mutex<Duration>,
}

impl WorkPool {
    /// Create a pool publishing job outcomes on `stats_tx`. The concurrency
    /// target defaults to the host's available parallelism.
    pub fn new(stats_tx: mpsc::Sender<JobStats>) -> Self {
        let (admit_tx, admit_rx) = mpsc::channel(1);
        Self {
            started: AtomicBool::new(false),
            target: Arc::new(AtomicUsize::new(num_cpus::get())),
            active: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(Mutex::new(Queue::new())),
            admit_tx,
            admit_rx: Mutex::new(Some(admit_rx)),
            stats_tx: Mutex::new(Some(stats_tx)),
            done: CancellationToken::new(),
            tick: Mutex::new(DEFAULT_DISPATCH_TICK),
        }
    }

    /// Set the desired concurrency. Zero is raised to one. Takes effect for
    /// future dispatch decisions, before or after [`start`](Self::start).
    pub fn with_threads(&self, threads: usize) -> &Self {
        self.target.store(threads.max(1), Ordering::SeqCst);
        self
    }

    /// Override the monitor tick period. Only read at start.
    pub fn with_tick(&self, tick: Duration) -> &Self {
        *self.tick.lock().expect("pool tick poisoned") = tick;
        self
    }

    /// Start the pool's monitor task. Idempotent; only the first call has
    /// any effect.
    pub fn start(&self, cancel: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(admit_rx) = self.admit_rx.lock().expect("pool admissions poisoned").take()
        else {
            return;
        };
        let Some(stats_tx) = self.stats_tx.lock().expect("pool stats poisoned").take() else {
            return;
        };
        let monitor = Monitor {
            cancel,
            done: self.done.clone(),
            target: self.target.clone(),
            active: self.active.clone(),
            finished: self.finished.clone(),
            pending: self.pending.clone(),
            stats_tx,
            running: Vec::new(),
            tick: *self.tick.lock().expect("pool tick poisoned"),
        };
        tokio::spawn(monitor.run(admit_rx));
    }

    /// Hand `worker` to the pool. Resolves once the monitor has taken it,
    /// or immediately — dropping the worker — if the pool has shut down.
    pub async fn add_worker(&self, worker: Worker) {
        tokio::select! {
            _ = self.done.cancelled() => {}
            result = self.admit_tx.send(worker) => {
                let _ = result;
            }
        }
    }

    /// Number of currently running workers.
    pub fn running_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of workers that have completed.
    pub fn finished_workers(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Number of admitted workers not yet dispatched.
    pub fn pending_workers(&self) -> usize {
        self.pending.lock().expect("pool queue poisoned").len()
    }
}

struct Monitor {
    cancel: CancellationToken,
    done: CancellationToken,
    target: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    pending: Arc<Mutex<Queue<Worker>>>,
    stats_tx: mpsc::Sender<JobStats>,
    running: Vec<JoinHandle<()>>,
    tick: Duration,
}

impl Monitor {
    async fn run(mut self, mut admit_rx: mpsc::Receiver<Worker>) {
        let cancel = self.cancel.clone();
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.active.load(Ordering::SeqCst) < self.target.load(Ordering::SeqCst) {
                if let Some(worker) = self.pop_pending() {
                    self.dispatch(worker);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    return;
                }
                Some(worker) = admit_rx.recv() => {
                    self.pending
                        .lock()
                        .expect("pool queue poisoned")
                        .push(worker);
                }
                _ = ticker.tick() => {
                    // Opportunistic catch-up: fill every free slot.
                    while self.active.load(Ordering::SeqCst) < self.target.load(Ordering::SeqCst) {
                        match self.pop_pending() {
                            Some(worker) => self.dispatch(worker),
                            None => break,
                        }
                    }
                }
            }
        }
    }

    fn pop_pending(&self) -> Option<Worker> {
        self.pending.lock().expect("pool queue poisoned").pop()
    }

    fn dispatch(&mut self, worker: Worker) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = self.active.clone();
        let finished = self.finished.clone();
        let stats_tx = self.stats_tx.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let stats = worker.run(cancel).await;
            active.fetch_sub(1, Ordering::SeqCst);
            finished.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(job = %stats.description, "worker finished");
            // Blocks until the consumer has taken the stats.
            let _ = stats_tx.send(stats).await;
        });
        self.running.push(handle);
    }

    /// Fire `done`, wait for every spawned worker, then close the stats
    /// channel by dropping the last sender. Workers still sitting in the
    /// holding queue are discarded.
    async fn shutdown(self) {
        self.done.cancel();
        let discarded = self.pending.lock().expect("pool queue poisoned").len();
        if discarded > 0 {
            tracing::debug!(discarded, "pool shutting down with undispatched workers");
        }
        for handle in self.running {
            let _ = handle.await;
        }
    }
}
