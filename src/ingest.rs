//! The main entry point: fetch, merge and save historical hourly weather.

use crate::client::open_meteo::OpenMeteoClient;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::locations::load_locations;
use crate::orchestrator::runner::Orchestrator;
use crate::orchestrator::summary::{JobOutcome, JobSummary};
use crate::settings::ensure_dir_exists;
use crate::types::date_span::DateSpan;
use crate::types::fetch_request::DEFAULT_HOURLY_VARIABLES;
use crate::types::location::Location;
use crate::writer::table::{write_result_set, OutputFormat};
use bon::bon;
use chrono::NaiveDate;
use log::info;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Client for Open-Meteo historical hourly data.
///
/// Holds the HTTP client and the job settings from an [`IngestConfig`]. One
/// instance can run any number of jobs; each job gets its own rate gate,
/// retry counters and result set.
///
/// # Examples
///
/// ```rust,no_run
/// # use weather_ingest::{WeatherIngest, IngestError, LatLon, Location};
/// # use chrono::NaiveDate;
/// #
/// # #[tokio::main]
/// # async fn main() -> Result<(), IngestError> {
/// let ingest = WeatherIngest::new()?;
/// let utrecht = Location::new("utr", "Utrecht", LatLon(52.0908, 5.1222));
///
/// let outcome = ingest
///     .fetch()
///     .start(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
///     .end(NaiveDate::from_ymd_opt(2023, 2, 7).unwrap())
///     .locations(&[utrecht])
///     .call()
///     .await?;
///
/// println!("{} rows\n{}", outcome.results.len(), outcome.summary);
/// # Ok(())
/// # }
/// ```
pub struct WeatherIngest {
    config: IngestConfig,
    orchestrator: Orchestrator<OpenMeteoClient>,
}

#[bon]
impl WeatherIngest {
    /// Creates a client with [`IngestConfig::default()`].
    pub fn new() -> Result<Self, IngestError> {
        Self::with_config(IngestConfig::default())
    }

    /// # Errors
    ///
    /// Returns [`IngestError::HttpClientBuild`] if the HTTP client cannot be
    /// constructed (e.g. no TLS backend available).
    pub fn with_config(config: IngestConfig) -> Result<Self, IngestError> {
        let client = OpenMeteoClient::new(
            config.base_url.clone(),
            config.models.clone(),
            config.request_timeout,
        )
        .map_err(IngestError::HttpClientBuild)?;
        let orchestrator = Orchestrator::builder()
            .source(client)
            .retry(config.retry.clone())
            .concurrency(config.concurrency)
            .build();
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Fetches hourly data for every location over `start..=end` (UTC days).
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.start(NaiveDate)`: **Required.** First day, inclusive.
    /// * `.end(NaiveDate)`: **Required.** Last day, inclusive.
    /// * `.locations(&[Location])`: **Required.** Locations to fetch; ids must be unique.
    /// * `.variables(Vec<String>)`: Optional. Hourly variables. Defaults to
    ///   [`DEFAULT_HOURLY_VARIABLES`].
    /// * `.cancel(CancellationToken)`: Optional. Cancelling stops new requests
    ///   and backoff waits; rows merged so far are kept in the outcome.
    ///
    /// # Errors
    ///
    /// Only configuration problems are errors ([`IngestError::InvalidDateRange`],
    /// [`IngestError::NoLocations`], ...). Units that fail while fetching are
    /// reported in [`JobOutcome::summary`] instead.
    #[builder]
    pub async fn fetch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        locations: &[Location],
        variables: Option<Vec<String>>,
        cancel: Option<CancellationToken>,
    ) -> Result<JobOutcome, IngestError> {
        let span = DateSpan::new(start, end).ok_or(IngestError::InvalidDateRange { start, end })?;
        let variables = variables
            .unwrap_or_else(|| DEFAULT_HOURLY_VARIABLES.iter().map(|v| v.to_string()).collect());
        let cancel = cancel.unwrap_or_default();
        self.orchestrator
            .run(span, locations, &variables, self.config.chunking, &cancel)
            .await
    }

    /// Loads the location table, fetches every location and writes the merged
    /// table.
    ///
    /// Paths default to the configured [`crate::ResultLayout`]
    /// (`./data/results/locations.csv` in, `./data/results/weather.csv` out).
    /// The output format follows `.format(..)`, else the output file's
    /// extension, else [`IngestConfig::output_format`]. The file is replaced
    /// atomically and written even when some units failed; check the
    /// returned summary.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use weather_ingest::{WeatherIngest, IngestError};
    /// # use chrono::NaiveDate;
    /// #
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), IngestError> {
    /// let summary = WeatherIngest::new()?
    ///     .fetch_and_save()
    ///     .start(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
    ///     .end(NaiveDate::from_ymd_opt(2023, 2, 7).unwrap())
    ///     .call()
    ///     .await?;
    /// assert!(summary.is_complete());
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub async fn fetch_and_save(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        locations_path: Option<PathBuf>,
        output_path: Option<PathBuf>,
        format: Option<OutputFormat>,
        variables: Option<Vec<String>>,
        cancel: Option<CancellationToken>,
    ) -> Result<JobSummary, IngestError> {
        let locations_path = locations_path.unwrap_or_else(|| self.config.layout.locations_path());
        let output_path = output_path.unwrap_or_else(|| self.config.layout.weather_path());
        let format = format
            .or_else(|| OutputFormat::from_path(&output_path))
            .unwrap_or(self.config.output_format);

        let locations = load_locations(&locations_path).await?;
        let outcome = self
            .fetch()
            .start(start)
            .end(end)
            .locations(&locations)
            .maybe_variables(variables)
            .maybe_cancel(cancel)
            .call()
            .await?;

        if let Some(dir) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_exists(dir).await?;
        }
        write_result_set(&outcome.results, &output_path, format).await?;
        info!(
            "Saved {} weather rows for {} location(s) to {}",
            outcome.results.len(),
            locations.len(),
            output_path.display()
        );
        Ok(outcome.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::retry::RetryPolicy;
    use crate::settings::ResultLayout;
    use crate::types::location::LatLon;
    use crate::writer::table::read_result_set;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn day_body(temperature: f64) -> serde_json::Value {
        json!({
            "latitude": 52.0,
            "longitude": 5.0,
            "elevation": 4.0,
            "generationtime_ms": 0.2,
            "utc_offset_seconds": 0,
            "timezone": "GMT",
            "timezone_abbreviation": "GMT",
            "hourly_units": {
                "time": "iso8601",
                "temperature_2m": "°C",
                "precipitation": "mm",
                "sunshine_duration": "s",
                "weather_code": "wmo code"
            },
            "hourly": {
                "time": (0..24).map(|h| format!("2023-01-01T{h:02}:00")).collect::<Vec<_>>(),
                "temperature_2m": vec![temperature; 24],
                "precipitation": vec![json!(null); 24],
                "sunshine_duration": vec![0.0; 24],
                "weather_code": vec![3; 24]
            }
        })
    }

    async fn ingest_for(server: &MockServer, layout: ResultLayout) -> WeatherIngest {
        let config = IngestConfig::builder()
            .base_url(format!("{}/v1/archive", server.uri()))
            .models("ecmwf_ifs")
            .retry(
                RetryPolicy::builder()
                    .max_retries(1)
                    .base_delay(Duration::from_millis(1))
                    .build(),
            )
            .layout(layout)
            .build();
        WeatherIngest::with_config(config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_and_save_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .and(query_param("latitude", "52.0908"))
            .and(query_param("models", "ecmwf_ifs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(day_body(4.5)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .and(query_param("latitude", "38.7223"))
            .respond_with(ResponseTemplate::new(200).set_body_json(day_body(14.0)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let layout = ResultLayout::builder()
            .result_dir(dir.path().join("results"))
            .build();
        std::fs::create_dir_all(&layout.result_dir).unwrap();
        std::fs::write(
            layout.locations_path(),
            "id,name,latitude,longitude\nutr,Utrecht,52.0908,5.1222\nlis,Lisbon,38.7223,-9.1393\n",
        )
        .unwrap();

        let ingest = ingest_for(&server, layout.clone()).await;
        let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let summary = ingest
            .fetch_and_save()
            .start(day)
            .end(day)
            .call()
            .await
            .unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.units.len(), 2);

        let written = read_result_set(&layout.weather_path(), OutputFormat::Csv).await.unwrap();
        assert_eq!(written.len(), 48);
        assert_eq!(
            written.variables(),
            &["temperature_2m", "precipitation", "sunshine_duration", "weather_code"]
        );
        let first = written.rows().next().unwrap();
        assert_eq!(first.location.id, "lis");
        assert_eq!(first.value("temperature_2m"), Some(14.0));
        assert_eq!(first.value("precipitation"), None);
        assert_eq!(first.value("weather_code"), Some(3.0));
    }

    #[tokio::test]
    async fn test_failed_units_still_write_partial_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("latitude", "52.0908"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("latitude", "38.7223"))
            .respond_with(ResponseTemplate::new(200).set_body_json(day_body(14.0)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let locations = dir.path().join("in/locations.csv");
        std::fs::create_dir_all(locations.parent().unwrap()).unwrap();
        std::fs::write(
            &locations,
            "id,name,latitude,longitude\nutr,Utrecht,52.0908,5.1222\nlis,Lisbon,38.7223,-9.1393\n",
        )
        .unwrap();
        let output = dir.path().join("out/weather.parquet");

        let ingest = ingest_for(&server, ResultLayout::default()).await;
        let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let summary = ingest
            .fetch_and_save()
            .start(day)
            .end(day)
            .locations_path(locations)
            .output_path(output.clone())
            .call()
            .await
            .unwrap();

        assert!(!summary.is_complete());
        assert_eq!(summary.failed().count(), 1);
        let written = read_result_set(&output, OutputFormat::Parquet).await.unwrap();
        assert_eq!(written.len(), 24);
    }

    #[tokio::test]
    async fn test_reversed_dates_rejected() {
        let ingest = WeatherIngest::new().unwrap();
        let err = ingest
            .fetch()
            .start(NaiveDate::from_ymd_opt(2023, 2, 1).unwrap())
            .end(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
            .locations(&[Location::new("a", "A", LatLon(0.0, 0.0))])
            .call()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidDateRange { .. }));
    }
}
