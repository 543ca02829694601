use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;
use super::ScrapeSample;

// ─── Configuration ───────────────────────────────────────────────

/// How many individual scrape records we keep for the live feed
const MAX_RECENT_SCRAPES: usize = 200;

/// HdrHistogram range: 1 μs → 10 min, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 600_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe record of recent scrape runs.
/// Probe handlers call `record()`, `/api/stats` calls `snapshot()`.
pub struct ScrapeStats {
    inner: Mutex<Inner>,
}

/// A single entry in the recent-scrapes feed.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRecord {
    pub at: DateTime<Utc>,
    pub endpoint: &'static str,
    pub name: String,
    pub total_us: u64,
    pub samples: usize,
    pub failures: usize,
    pub cache_hit: bool,
    pub success: bool,
}

/// Complete snapshot returned by `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    // End-to-end latency split by where the samples came from
    pub collected: PercentileSet,
    pub cached: PercentileSet,

    // Counters
    pub total_scrapes: u64,
    pub failed_scrapes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failed_fetches: u64,
    pub scrapes_per_sec: f64,
    pub elapsed_secs: f64,

    pub recent_scrapes: Vec<ScrapeRecord>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    collected_hist: Histogram<u64>,
    cached_hist: Histogram<u64>,

    total_scrapes: u64,
    failed_scrapes: u64,
    cache_hits: u64,
    cache_misses: u64,
    failed_fetches: u64,

    recent: VecDeque<ScrapeRecord>,

    // Wall-clock anchor for the rate
    start_time: Option<Instant>,
}

// ─── ScrapeStats impl ────────────────────────────────────────────

impl ScrapeStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record one finished scrape. Called by both probe handlers.
    pub fn record(&self, sample: ScrapeSample) {
        self.inner.lock().record(sample);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram bounds are constant")
}

impl Inner {
    fn new() -> Self {
        Self {
            collected_hist: new_histogram(),
            cached_hist: new_histogram(),
            total_scrapes: 0,
            failed_scrapes: 0,
            cache_hits: 0,
            cache_misses: 0,
            failed_fetches: 0,
            recent: VecDeque::with_capacity(MAX_RECENT_SCRAPES + 1),
            start_time: None,
        }
    }

    fn record(&mut self, sample: ScrapeSample) {
        self.start_time.get_or_insert_with(Instant::now);

        // ── Counters ────────────────────────────────────────────
        self.total_scrapes += 1;
        if !sample.success {
            self.failed_scrapes += 1;
        }
        self.failed_fetches += sample.failures as u64;

        // ── Histograms (clamp into range) ───────────────────────
        let total_us = sample.total_us.clamp(HIST_LOW, HIST_HIGH);
        if sample.cache_hit {
            self.cache_hits += 1;
            let _ = self.cached_hist.record(total_us);
        } else {
            self.cache_misses += 1;
            let _ = self.collected_hist.record(total_us);
        }

        // ── Live feed ───────────────────────────────────────────
        self.recent.push_back(ScrapeRecord {
            at: Utc::now(),
            endpoint: sample.endpoint,
            name: sample.name,
            total_us: sample.total_us,
            samples: sample.samples,
            failures: sample.failures,
            cache_hit: sample.cache_hit,
            success: sample.success,
        });
        if self.recent.len() > MAX_RECENT_SCRAPES {
            self.recent.pop_front();
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let scrapes_per_sec = if elapsed_secs > 0.0 {
            self.total_scrapes as f64 / elapsed_secs
        } else {
            0.0
        };

        StatsSnapshot {
            collected: PercentileSet::from_histogram(&self.collected_hist),
            cached: PercentileSet::from_histogram(&self.cached_hist),
            total_scrapes: self.total_scrapes,
            failed_scrapes: self.failed_scrapes,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            failed_fetches: self.failed_fetches,
            scrapes_per_sec,
            elapsed_secs,
            recent_scrapes: self.recent.iter().cloned().collect(),
        }
    }
}
