pub mod endpoint;
pub mod instrumentation;
pub mod percentiles;
pub mod scrape_stats;

pub use instrumentation::{ExporterMetrics, Instrumentation};
pub use scrape_stats::{ScrapeStats, StatsSnapshot};

/// Summary of one finished scrape, pushed by the probe handlers.
#[derive(Debug, Clone)]
pub struct ScrapeSample {
    /// Route of the probe, e.g. "/probe/metrics/list"
    pub endpoint: &'static str,
    /// Gauge name requested by the scrape
    pub name: String,
    /// Total handler wall time in microseconds
    pub total_us: u64,
    /// Samples served in the response
    pub samples: usize,
    /// Remote calls that failed during collection
    pub failures: usize,
    /// true when the samples were served from the cache
    pub cache_hit: bool,
    /// false when the probe answered with an error status
    pub success: bool,
}
