//! Command-line entry point.

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use scurry::{Scraper, WordFrequencyAnalyzer};
use tracing_subscriber::EnvFilter;

/// How many of the most frequent words to report per page.
const TOP_WORDS: usize = 10;

/// Scrape pages concurrently and report their word frequencies.
#[derive(Parser, Debug)]
#[command(name = "scurry", version, about = "Concurrent web crawler-scraper")]
struct Cli {
    /// How many threads the scraper should utilize
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Comma separated list of urls to scrape,
    /// eg. --urls=https://example.com/a,https://example.com/b
    #[arg(long, value_delimiter = ',')]
    urls: Vec<String>,

    /// Logger output level
    #[arg(long, value_enum, default_value = "INFO")]
    verbosity: Verbosity,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Verbosity {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARN")]
    Warn,
}

impl Verbosity {
    fn filter(self) -> EnvFilter {
        match self {
            Verbosity::Debug => EnvFilter::new("scurry=debug,info"),
            Verbosity::Info => EnvFilter::new("scurry=info,warn"),
            Verbosity::Warn => EnvFilter::new("warn"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.verbosity.filter())
        .with_target(false)
        .init();

    let threads = cli.threads.max(1);
    tracing::info!(threads, urls = ?cli.urls, "initializing scraper");

    let scraper = Scraper::new().with_threads(threads);
    scraper.start().await;

    let started = Instant::now();
    let analyzers: Vec<(String, Arc<WordFrequencyAnalyzer>)> = cli
        .urls
        .iter()
        .map(|url| (url.clone(), Arc::new(WordFrequencyAnalyzer::new(1))))
        .collect();

    for (url, analyzer) in &analyzers {
        scraper.scrape(url.clone(), analyzer.clone()).await;
    }

    for (url, analyzer) in &analyzers {
        match analyzer.result().await {
            Ok(counts) => {
                let top: Vec<String> = counts
                    .iter()
                    .take(TOP_WORDS)
                    .map(|c| format!("{}:{}", c.word, c.count))
                    .collect();
                tracing::info!(url = %url, words = ?top, "scrape finished");
            }
            Err(error) => {
                tracing::warn!(url = %url, %error, "scrape failed");
            }
        }
    }

    scraper.stop().await;
    tracing::info!(elapsed = ?started.elapsed(), "scraping finished");
}
