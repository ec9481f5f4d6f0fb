//! Page analyzers.
//!
//! An [`Analyzer`] is the capability a caller attaches to each scrape
//! target. The scheduler promises that exactly one of [`Analyzer::analyze`]
//! or [`Analyzer::cancel`] is invoked for every target it accepts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::html;
use crate::ScrapeError;

/// Consumes the outcome of a scrape target.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Deliver a successfully fetched page body. Invoked at most once.
    async fn analyze(&self, page: String);

    /// Signal that the page will not be delivered. Invoked at most once.
    async fn cancel(&self, err: ScrapeError);
}

/// A word and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordCount {
    pub word: String,
    pub count: u64,
}

struct FrequencyState {
    frequency: HashMap<String, u64>,
    failure: Option<ScrapeError>,
}

/// Counts word frequency across a fixed number of page deliveries.
///
/// Construct with the number of expected callbacks; [`result`] resolves
/// once that many analyze/cancel calls have arrived.
///
/// [`result`]: WordFrequencyAnalyzer::result
pub struct WordFrequencyAnalyzer {
    remaining: AtomicUsize,
    state: Mutex<FrequencyState>,
    done: Notify,
}

impl WordFrequencyAnalyzer {
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            state: Mutex::new(FrequencyState {
                frequency: HashMap::new(),
                failure: None,
            }),
            done: Notify::new(),
        }
    }

    /// Wait for every expected callback, then return the counts sorted by
    /// descending frequency, or the recorded failure.
    pub async fn result(&self) -> Result<Vec<WordCount>, ScrapeError> {
        loop {
            let notified = self.done.notified();
            if self.remaining.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        let mut state = self.state.lock().expect("analyzer state poisoned");
        if let Some(failure) = state.failure.take() {
            return Err(failure);
        }
        let mut counts: Vec<WordCount> = state
            .frequency
            .iter()
            .map(|(word, count)| WordCount {
                word: word.clone(),
                count: *count,
            })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(counts)
    }

    fn complete_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.done.notify_waiters();
        }
    }
}

#[async_trait]
impl Analyzer for WordFrequencyAnalyzer {
    async fn analyze(&self, page: String) {
        {
            let mut state = self.state.lock().expect("analyzer state poisoned");
            for word in html::extract_words(&page) {
                *state.frequency.entry(word).or_insert(0) += 1;
            }
        }
        self.complete_one();
    }

    async fn cancel(&self, err: ScrapeError) {
        self.state
            .lock()
            .expect("analyzer state poisoned")
            .failure = Some(err);
        self.complete_one();
    }
}
