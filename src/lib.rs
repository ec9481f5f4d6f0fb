//! Concurrent web crawler-scraper.
//!
//! `scurry` fetches a set of seed URLs, hands each page body to a pluggable
//! [`Analyzer`], and schedules further work under a configurable thread
//! budget. Three subsystems carry the load:
//!
//! - a bounded [`WorkPool`](pool::WorkPool) that dispatches queued jobs onto
//!   a desired concurrency level and reports per-job outcomes,
//! - a [`Scraper`](scrape::Scraper) event loop that deduplicates in-flight
//!   URLs, hands work to the pool without blocking, retries refused
//!   dispatches and drains cleanly on cancellation,
//! - an [`EvictableCache`](cache::EvictableCache) that suppresses re-fetching
//!   a URL for a configured window, driven by a swappable [`clock`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scurry::{Scraper, WordFrequencyAnalyzer};
//!
//! let scraper = Scraper::new().with_threads(4);
//! scraper.start().await;
//!
//! let analyzer = Arc::new(WordFrequencyAnalyzer::new(1));
//! scraper.scrape("https://example.com".to_string(), analyzer.clone()).await;
//!
//! let words = analyzer.result().await?;
//! scraper.stop().await;
//! ```

pub mod analyzer;
pub mod cache;
pub mod clock;
pub mod fetch;
pub mod html;
pub mod pool;
pub mod queue;
pub mod scrape;

pub use analyzer::{Analyzer, WordCount, WordFrequencyAnalyzer};
pub use cache::EvictableCache;
pub use fetch::{Fetcher, HttpFetcher};
pub use pool::{Job, JobError, JobStats, WorkPool, Worker};
pub use queue::Queue;
pub use scrape::Scraper;

/// Errors surfaced to analyzers and recorded in job stats.
///
/// Fetch failures flatten the transport error into a message so the same
/// value can be delivered to the target's analyzer and logged by the worker
/// that ran the job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScrapeError {
    /// The scraper was stopped before the target could be delivered.
    #[error("scrape cancelled")]
    Cancelled,

    /// The fetch itself failed.
    #[error("request for {url} failed: {message}")]
    Fetch { url: String, message: String },
}
