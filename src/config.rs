use crate::client::open_meteo::DEFAULT_ARCHIVE_URL;
use crate::client::retry::RetryPolicy;
use crate::orchestrator::chunking::ChunkingPolicy;
use crate::settings::ResultLayout;
use crate::writer::table::OutputFormat;
use bon::Builder;
use std::time::Duration;

/// Everything a [`crate::WeatherIngest`] needs besides the job itself.
///
/// ```
/// use weather_ingest::{ChunkingPolicy, IngestConfig};
///
/// let config = IngestConfig::builder()
///     .models("ecmwf_ifs")
///     .concurrency(2)
///     .chunking(ChunkingPolicy::builder().window_days(7).build())
///     .build();
/// assert_eq!(config.concurrency, 2);
/// assert_eq!(config.base_url, "https://archive-api.open-meteo.com/v1/archive");
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct IngestConfig {
    #[builder(default = DEFAULT_ARCHIVE_URL.to_string(), into)]
    pub base_url: String,
    /// Provider model, e.g. `ecmwf_ifs`. The provider's best match when unset.
    #[builder(into)]
    pub models: Option<String>,
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default = 4)]
    pub concurrency: usize,
    #[builder(default)]
    pub chunking: ChunkingPolicy,
    #[builder(default)]
    pub layout: ResultLayout,
    #[builder(default)]
    pub output_format: OutputFormat,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
