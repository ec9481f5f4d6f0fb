use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scurry::clock::{self, RewindableClock};
use scurry::{Analyzer, Fetcher, ScrapeError, Scraper};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const PAGE: &str = r#"
    <!doctype html>
    <html>
      <head><title>This is the title of the webpage!</title></head>
      <body><p>This is an example paragraph.</p></body>
    </html>
"#;

/// Serves a fixed page after an optional delay, counting fetches.
struct StubFetcher {
    delay: Duration,
    hits: AtomicUsize,
}

impl StubFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            hits: AtomicUsize::new(0),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, cancel: &CancellationToken, _url: &str) -> Result<String, ScrapeError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if self.delay.is_zero() {
            return Ok(PAGE.to_string());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(PAGE.to_string()),
        }
    }
}

/// Counts analyze/cancel callbacks and wakes waiters on each one.
struct CountingAnalyzer {
    analyzed: AtomicUsize,
    cancelled: AtomicUsize,
    event: Notify,
}

impl CountingAnalyzer {
    fn new() -> Self {
        Self {
            analyzed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            event: Notify::new(),
        }
    }

    fn analyzed(&self) -> usize {
        self.analyzed.load(Ordering::SeqCst)
    }

    fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn total(&self) -> usize {
        self.analyzed() + self.cancelled()
    }

    async fn wait_for(&self, total: usize) {
        loop {
            let notified = self.event.notified();
            if self.total() >= total {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Analyzer for CountingAnalyzer {
    async fn analyze(&self, _page: String) {
        self.analyzed.fetch_add(1, Ordering::SeqCst);
        self.event.notify_waiters();
    }

    async fn cancel(&self, _err: ScrapeError) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.event.notify_waiters();
    }
}

#[tokio::test]
async fn more_threads_scrape_faster() {
    async fn scrape_six(threads: usize) -> Duration {
        let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(300)));
        let analyzer = Arc::new(CountingAnalyzer::new());
        let scraper = Scraper::new()
            .with_threads(threads)
            .with_retry_tick(Duration::from_millis(20))
            .with_fetcher(fetcher);
        scraper.start().await;

        let urls: Vec<String> = (0..6).map(|i| format!("https://test.invalid/{i}")).collect();
        let start = tokio::time::Instant::now();
        scraper.scrape_multi(urls, analyzer.clone()).await;
        timeout(Duration::from_secs(10), analyzer.wait_for(6))
            .await
            .expect("all six pages should be analyzed");
        let elapsed = start.elapsed();

        assert_eq!(analyzer.analyzed(), 6);
        scraper.stop().await;
        elapsed
    }

    let sequential = scrape_six(1).await;
    let parallel = scrape_six(6).await;

    assert!(
        parallel <= sequential,
        "6 threads took {parallel:?}, 1 thread took {sequential:?}"
    );
}

// Scenario: six slow targets, one thread; stop right after the first page
// lands. Exactly one analyze, the other five analyzers get cancel.
#[tokio::test]
async fn stop_mid_flight_cancels_the_rest() {
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(500)));
    let analyzer = Arc::new(CountingAnalyzer::new());
    let scraper = Scraper::new()
        .with_threads(1)
        .with_retry_tick(Duration::from_millis(50))
        .with_fetcher(fetcher);
    scraper.start().await;

    let urls: Vec<String> = (0..6).map(|i| format!("https://test.invalid/{i}")).collect();
    scraper.scrape_multi(urls, analyzer.clone()).await;

    timeout(Duration::from_secs(5), analyzer.wait_for(1))
        .await
        .expect("first page should be analyzed");
    scraper.stop().await;

    assert_eq!(analyzer.analyzed(), 1);
    assert_eq!(analyzer.cancelled(), 5);
}

// Scenario: a large batch with a single thread, stopped immediately. Every
// analyzer still receives exactly one callback, within bounded time.
#[tokio::test]
async fn cancellation_under_load_reaches_every_analyzer() {
    let fetcher = Arc::new(StubFetcher::new(Duration::from_millis(100)));
    let analyzer = Arc::new(CountingAnalyzer::new());
    let scraper = Scraper::new().with_threads(1).with_fetcher(fetcher);
    scraper.start().await;

    let urls: Vec<String> = (0..1024).map(|i| i.to_string()).collect();
    scraper.scrape_multi(urls, analyzer.clone()).await;
    timeout(Duration::from_secs(10), scraper.stop())
        .await
        .expect("stop should return in bounded time");

    timeout(Duration::from_secs(5), analyzer.wait_for(1024))
        .await
        .expect("every analyzer should hear back");
    assert_eq!(analyzer.total(), 1024);
}

#[tokio::test]
async fn zero_eviction_never_rescrapes() {
    let fetcher = Arc::new(StubFetcher::new(Duration::ZERO));
    let analyzer = Arc::new(CountingAnalyzer::new());
    let scraper = Scraper::new()
        .with_threads(1)
        .with_retry_tick(Duration::from_millis(50))
        .with_fetcher(fetcher.clone());
    scraper.start().await;

    let url = "https://test.invalid/page".to_string();
    scraper.scrape(url.clone(), analyzer.clone()).await;
    timeout(Duration::from_secs(5), analyzer.wait_for(1))
        .await
        .expect("first submission should be analyzed");

    // The same URL again: silently skipped, not fetched, no callback.
    scraper.scrape(url, analyzer.clone()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(fetcher.hits(), 1);
    assert_eq!(analyzer.total(), 1);
    scraper.stop().await;
}

#[tokio::test]
async fn eviction_window_permits_rescrape() {
    let original = clock::current();
    let testing_clock = Arc::new(RewindableClock::new());
    clock::set(testing_clock.clone());

    let fetcher = Arc::new(StubFetcher::new(Duration::ZERO));
    let analyzer = Arc::new(CountingAnalyzer::new());
    let scraper = Scraper::new()
        .with_threads(1)
        .with_retry_tick(Duration::from_millis(50))
        .with_eviction(Duration::from_secs(60))
        .with_fetcher(fetcher.clone());
    scraper.start().await;

    let url = "https://test.invalid/page".to_string();
    scraper.scrape(url.clone(), analyzer.clone()).await;
    timeout(Duration::from_secs(5), analyzer.wait_for(1))
        .await
        .expect("first submission should be analyzed");

    // Still inside the revisit window.
    scraper.scrape(url.clone(), analyzer.clone()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fetcher.hits(), 1);

    // Push the clock past the window; the URL is fair game again.
    testing_clock.rewind(clock::now() + Duration::from_secs(61));
    scraper.scrape(url, analyzer.clone()).await;
    timeout(Duration::from_secs(5), analyzer.wait_for(2))
        .await
        .expect("resubmission should be analyzed after the window");
    assert_eq!(fetcher.hits(), 2);

    scraper.stop().await;
    clock::set(original);
}

#[tokio::test]
async fn submissions_after_stop_are_cancelled() {
    let scraper = Scraper::new()
        .with_threads(1)
        .with_fetcher(Arc::new(StubFetcher::new(Duration::ZERO)));
    scraper.start().await;
    scraper.stop().await;

    let analyzer = Arc::new(CountingAnalyzer::new());
    scraper
        .scrape("https://test.invalid".to_string(), analyzer.clone())
        .await;

    assert_eq!(analyzer.cancelled(), 1);
    assert_eq!(analyzer.analyzed(), 0);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let scraper = Scraper::new()
        .with_threads(2)
        .with_fetcher(Arc::new(StubFetcher::new(Duration::ZERO)));
    scraper.start().await;

    scraper.stop().await;
    scraper.stop().await;
}
