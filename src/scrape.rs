//! Scrape scheduling: deduplication, dispatch, retry and drain.
//!
//! The [`Scraper`] owns an internal [`WorkPool`] whose workers run
//! long-lived task loops, and an event loop that admits submitted targets.
//! Admission deduplicates URLs that are already in flight, consults the
//! eviction cache for recently seen ones, and hands accepted targets to the
//! pool through a non-blocking channel send; refused targets land on a retry
//! queue drained on the next tick. On cancellation the loop informs every
//! undelivered target's analyzer before returning.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;
use crate::cache::EvictableCache;
use crate::clock;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::pool::{Job, JobError, JobStats, WorkPool, Worker};
use crate::queue::Queue;
use crate::ScrapeError;

/// How often the event loop re-attempts targets that were refused dispatch.
pub const DEFAULT_RETRY_TICK: Duration = Duration::from_secs(3);

struct ScrapeTarget {
    url: String,
    analyzer: Arc<dyn Analyzer>,
}

/// What a pool worker dequeues: the target plus a callback releasing the
/// URL's dedup slot once the worker is done with it.
struct JobEnvelope {
    target: ScrapeTarget,
    release: Box<dyn FnOnce() + Send>,
}

/// Concurrent web scraper.
///
/// Configure with the chainable `with_*` methods, then [`start`], submit
/// targets with [`scrape`] / [`scrape_multi`], and [`stop`] to shut down.
/// Every analyzer handed in alongside a URL receives exactly one of
/// `analyze` or `cancel`, unless the URL is silently skipped as a duplicate
/// or as recently seen.
///
/// [`start`]: Scraper::start
/// [`scrape`]: Scraper::scrape
/// [`scrape_multi`]: Scraper::scrape_multi
/// [`stop`]: Scraper::stop
pub struct Scraper {
    started: AtomicBool,
    cancel: CancellationToken,
    done: CancellationToken,

    threads: usize,
    eviction_rate: Option<Duration>,
    retry_tick: Duration,
    fetcher: Arc<dyn Fetcher>,

    targets_tx: mpsc::Sender<Vec<ScrapeTarget>>,
    targets_rx: StdMutex<Option<mpsc::Receiver<Vec<ScrapeTarget>>>>,
    job_tx: mpsc::Sender<JobEnvelope>,
    job_rx: Arc<Mutex<mpsc::Receiver<JobEnvelope>>>,
    stats_rx: StdMutex<Option<mpsc::Receiver<JobStats>>>,

    pool: WorkPool,
    active: Arc<StdMutex<HashSet<String>>>,
    job_index: Arc<AtomicU64>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Scraper {
    pub fn new() -> Self {
        let (stats_tx, stats_rx) = mpsc::channel(1);
        let (targets_tx, targets_rx) = mpsc::channel(1);
        let (job_tx, job_rx) = mpsc::channel(1);
        Self {
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            threads: 1,
            eviction_rate: None,
            retry_tick: DEFAULT_RETRY_TICK,
            fetcher: Arc::new(HttpFetcher::new()),
            targets_tx,
            targets_rx: StdMutex::new(Some(targets_rx)),
            job_tx,
            job_rx: Arc::new(Mutex::new(job_rx)),
            stats_rx: StdMutex::new(Some(stats_rx)),
            pool: WorkPool::new(stats_tx),
            active: Arc::new(StdMutex::new(HashSet::new())),
            job_index: Arc::new(AtomicU64::new(0)),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// Number of worker threads used for scraping. Zero is raised to one at
    /// start.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Window after which a scraped URL may be scraped again. The default
    /// of zero means known URLs are never re-scraped for the scraper's
    /// lifetime.
    pub fn with_eviction(mut self, window: Duration) -> Self {
        self.eviction_rate = (!window.is_zero()).then_some(window);
        self
    }

    /// Override the retry tick period (default 3 seconds).
    pub fn with_retry_tick(mut self, tick: Duration) -> Self {
        self.retry_tick = tick;
        self
    }

    /// Replace the page fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Start the pool, the per-thread task loops and the event loop.
    /// Idempotent; only the first call has any effect.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let threads = self.threads.max(1);
        self.pool.with_threads(threads);
        self.pool.start(self.cancel.clone());

        // One long-running worker per thread, each pulling envelopes from
        // the job channel until cancelled.
        for index in 0..threads {
            let job_rx = self.job_rx.clone();
            let fetcher = self.fetcher.clone();
            let job_index = self.job_index.clone();
            let job = Job::new(format!("scrape-{index}"), move |cancel, id| {
                task_loop(cancel, id, job_rx, fetcher, job_index)
            });
            self.pool.add_worker(Worker::new(job)).await;
        }

        let mut handles = self.handles.lock().expect("scraper handles poisoned");

        // Job stats are not surfaced upward; drain them until the pool
        // closes its outbound channel at shutdown.
        if let Some(stats_rx) = self
            .stats_rx
            .lock()
            .expect("scraper stats poisoned")
            .take()
        {
            handles.push(tokio::spawn(async move {
                ReceiverStream::new(stats_rx)
                    .for_each(|stats| async move {
                        if let Some(error) = &stats.error {
                            tracing::debug!(job = %stats.description, %error, "job ended with error");
                        }
                    })
                    .await;
            }));
        }

        if let Some(targets_rx) = self
            .targets_rx
            .lock()
            .expect("scraper targets poisoned")
            .take()
        {
            handles.push(tokio::spawn(event_loop(
                self.done.clone(),
                targets_rx,
                self.job_tx.clone(),
                self.active.clone(),
                self.eviction_rate,
                self.retry_tick,
            )));
        }
    }

    /// Stop the scraper and wait until the event loop and every worker have
    /// exited. Idempotent. Analyzers of all undelivered targets receive
    /// [`ScrapeError::Cancelled`].
    pub async fn stop(&self) {
        if self.done.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.done.cancel();

        let handles: Vec<_> = {
            let mut handles = self.handles.lock().expect("scraper handles poisoned");
            handles.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        // The workers are gone once the stats drain ends; an envelope still
        // buffered in the job channel can no longer be delivered.
        let mut job_rx = self.job_rx.lock().await;
        while let Ok(envelope) = job_rx.try_recv() {
            envelope.target.analyzer.cancel(ScrapeError::Cancelled).await;
            (envelope.release)();
        }
    }

    /// Submit one URL for scraping.
    pub async fn scrape(&self, url: String, analyzer: Arc<dyn Analyzer>) {
        self.request_scrape(vec![ScrapeTarget { url, analyzer }])
            .await;
    }

    /// Submit a batch of URLs; the analyzer is invoked once per URL.
    pub async fn scrape_multi(&self, urls: Vec<String>, analyzer: Arc<dyn Analyzer>) {
        let targets = urls
            .into_iter()
            .map(|url| ScrapeTarget {
                url,
                analyzer: analyzer.clone(),
            })
            .collect();
        self.request_scrape(targets).await;
    }

    async fn request_scrape(&self, targets: Vec<ScrapeTarget>) {
        tokio::select! {
            _ = self.done.cancelled() => {
                // Already stopped; the targets will never run.
                for target in targets {
                    target.analyzer.cancel(ScrapeError::Cancelled).await;
                }
            }
            permit = self.targets_tx.reserve() => match permit {
                Ok(permit) => permit.send(targets),
                Err(_) => {
                    for target in targets {
                        target.analyzer.cancel(ScrapeError::Cancelled).await;
                    }
                }
            }
        }
    }
}

impl Default for Scraper {
    fn default() -> Self {
        Self::new()
    }
}

async fn event_loop(
    done: CancellationToken,
    mut targets_rx: mpsc::Receiver<Vec<ScrapeTarget>>,
    job_tx: mpsc::Sender<JobEnvelope>,
    active: Arc<StdMutex<HashSet<String>>>,
    eviction_rate: Option<Duration>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut retry: Queue<ScrapeTarget> = Queue::new();
    let mut cache: EvictableCache<String, ()> =
        EvictableCache::new(|url: String, _| tracing::debug!(url, "revisit window expired"));
    let mut targets: Vec<ScrapeTarget> = Vec::new();

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            batch = targets_rx.recv() => match batch {
                Some(batch) => targets.extend(batch),
                None => break,
            },
            _ = ticker.tick() => {
                while let Some(target) = retry.pop() {
                    targets.push(target);
                }
            }
        }

        for target in targets.drain(..) {
            // Still inside its revisit window.
            if cache.seen(&target.url) {
                continue;
            }
            // Already in flight.
            if !admit(&active, &target.url) {
                continue;
            }
            let url = target.url.clone();
            let release_set = active.clone();
            let release_url = url.clone();
            let envelope = JobEnvelope {
                target,
                release: Box::new(move || {
                    release_set
                        .lock()
                        .expect("dedup set poisoned")
                        .remove(&release_url);
                }),
            };
            match job_tx.try_send(envelope) {
                Ok(()) => {
                    let deadline = eviction_rate.map(|rate| clock::current().add(rate));
                    // Finding the key already cached is a harmless no-op.
                    cache.add_if_not_seen(url, (), deadline);
                }
                Err(refused) => {
                    tracing::debug!(url = %url, "dispatch refused, queuing for retry");
                    active.lock().expect("dedup set poisoned").remove(&url);
                    retry.push(refused.into_inner().target);
                }
            }
        }
    }

    // Inform every undelivered target of its fate, including batches that
    // were submitted but never received.
    targets_rx.close();
    while let Ok(batch) = targets_rx.try_recv() {
        targets.extend(batch);
    }
    for target in targets.drain(..) {
        target.analyzer.cancel(ScrapeError::Cancelled).await;
    }
    while let Some(target) = retry.pop() {
        target.analyzer.cancel(ScrapeError::Cancelled).await;
    }
}

fn admit(active: &StdMutex<HashSet<String>>, url: &str) -> bool {
    active
        .lock()
        .expect("dedup set poisoned")
        .insert(url.to_string())
}

/// Body of one long-running pool worker: pull envelopes and scrape them
/// until cancelled.
async fn task_loop(
    cancel: CancellationToken,
    id: String,
    job_rx: Arc<Mutex<mpsc::Receiver<JobEnvelope>>>,
    fetcher: Arc<dyn Fetcher>,
    job_index: Arc<AtomicU64>,
) -> Result<(), JobError> {
    loop {
        let envelope = {
            let mut rx = job_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => return Ok(()),
                },
            }
        };
        let index = job_index.fetch_add(1, Ordering::Relaxed);
        let JobEnvelope { target, release } = envelope;
        if let Err(error) = scrape_one(&cancel, fetcher.as_ref(), index, &target).await {
            tracing::warn!(worker = %id, url = %target.url, %error, "scrape failed");
        }
        release();
    }
}

/// Fetch one target and hand the outcome to its analyzer.
async fn scrape_one(
    cancel: &CancellationToken,
    fetcher: &dyn Fetcher,
    index: u64,
    target: &ScrapeTarget,
) -> Result<(), ScrapeError> {
    // Cancelled while the envelope was queued; abort before fetching.
    if cancel.is_cancelled() {
        target.analyzer.cancel(ScrapeError::Cancelled).await;
        return Err(ScrapeError::Cancelled);
    }
    tracing::debug!(index, url = %target.url, "fetching page");
    match fetcher.fetch(cancel, &target.url).await {
        Ok(page) => {
            target.analyzer.analyze(page).await;
            Ok(())
        }
        Err(error) => {
            target.analyzer.cancel(error.clone()).await;
            Err(error)
        }
    }
}
