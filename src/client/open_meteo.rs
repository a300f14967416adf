//! HTTP client for the Open-Meteo historical weather endpoint.

use crate::client::error::FetchError;
use crate::client::schema::{parse_payload, provider_reason};
use crate::client::source::HourlySource;
use crate::types::fetch_request::FetchRequest;
use crate::types::payload::RawHourlyPayload;
use log::{debug, info, warn};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Issues one GET per request unit to the archive endpoint.
///
/// The client always asks for `timezone=UTC`, so the returned series starts
/// at UTC midnight of the request's start date.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    http: Client,
    base_url: String,
    models: Option<String>,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>, models: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self::with_http_client(http, base_url, models))
    }

    pub fn with_http_client(http: Client, base_url: impl Into<String>, models: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            models,
        }
    }

    fn query(&self, request: &FetchRequest) -> Vec<(&'static str, String)> {
        let location = request.location();
        let mut query = vec![
            ("latitude", location.coordinate.latitude().to_string()),
            ("longitude", location.coordinate.longitude().to_string()),
            ("start_date", request.span().start().format("%Y-%m-%d").to_string()),
            ("end_date", request.span().end().format("%Y-%m-%d").to_string()),
            ("hourly", request.variables().join(",")),
            ("timezone", "UTC".to_string()),
        ];
        if let Some(models) = &self.models {
            query.push(("models", models.clone()));
        }
        query
    }

    async fn send(&self, request: &FetchRequest) -> Result<RawHourlyPayload, FetchError> {
        let http_request = self
            .http
            .get(&self.base_url)
            .query(&self.query(request))
            .build()
            .map_err(|e| FetchError::RequestBuild(self.base_url.clone(), e))?;
        let url = http_request.url().to_string();
        debug!("Requesting {} from {}", request, url);

        let response = self
            .http
            .execute(http_request)
            .await
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(&response);
            warn!("HTTP 429 for {} (retry-after: {:?})", url, retry_after);
            return Err(FetchError::RateLimited { url, retry_after });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Network {
            url: url.clone(),
            source: e,
        })?;

        if !status.is_success() {
            let reason = provider_reason(&body);
            warn!("HTTP error {} for {}: {:?}", status, url, reason);
            return Err(FetchError::HttpStatus { url, status, reason });
        }

        let payload = parse_payload(&body, &url, request)?;
        info!(
            "Fetched {} hourly values for {} ({} bytes)",
            payload.value_count(),
            request,
            body.len()
        );
        Ok(payload)
    }
}

impl HourlySource for OpenMeteoClient {
    fn fetch_once(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<RawHourlyPayload, FetchError>> + Send {
        self.send(request)
    }
}

/// Parses a `Retry-After` header given in whole seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::SchemaViolation;
    use crate::types::date_span::DateSpan;
    use crate::types::location::{LatLon, Location};
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> FetchRequest {
        FetchRequest::new(
            Location::new("ams", "Amsterdam", LatLon(52.37, 4.89)),
            DateSpan::single_day(NaiveDate::from_ymd_opt(2022, 7, 1).unwrap()),
            ["temperature_2m", "precipitation"],
        )
        .unwrap()
    }

    fn client(server: &MockServer, models: Option<&str>) -> OpenMeteoClient {
        OpenMeteoClient::new(
            format!("{}/v1/archive", server.uri()),
            models.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn body() -> serde_json::Value {
        json!({
            "latitude": 52.366,
            "longitude": 4.901,
            "elevation": 3.0,
            "utc_offset_seconds": 0,
            "timezone": "GMT",
            "hourly_units": {"time": "iso8601", "temperature_2m": "°C", "precipitation": "mm"},
            "hourly": {
                "time": vec!["2022-07-01T00:00"; 24],
                "temperature_2m": vec![13.0; 24],
                "precipitation": vec![0.0; 24]
            }
        })
    }

    #[tokio::test]
    async fn test_sends_expected_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .and(query_param("latitude", "52.37"))
            .and(query_param("longitude", "4.89"))
            .and(query_param("start_date", "2022-07-01"))
            .and(query_param("end_date", "2022-07-01"))
            .and(query_param("hourly", "temperature_2m,precipitation"))
            .and(query_param("timezone", "UTC"))
            .and(query_param("models", "ecmwf_ifs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(1)
            .mount(&server)
            .await;

        let payload = client(&server, Some("ecmwf_ifs"))
            .fetch_once(&request())
            .await
            .unwrap();
        assert_eq!(payload.value_count(), 24);
        assert_eq!(payload.units["precipitation"], "mm");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .mount(&server)
            .await;

        let err = client(&server, None).fetch_once(&request()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server, None).fetch_once(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bad_request_carries_provider_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": true,
                "reason": "Parameter 'start_date' is out of allowed range"
            })))
            .mount(&server)
            .await;

        let err = client(&server, None).fetch_once(&request()).await.unwrap_err();
        assert!(!err.is_transient());
        match err {
            FetchError::HttpStatus { status, reason, .. } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(reason.as_deref(), Some("Parameter 'start_date' is out of allowed range"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schema_violation_is_permanent() {
        let server = MockServer::start().await;
        let mut broken = body();
        broken["hourly"]
            .as_object_mut()
            .unwrap()
            .remove("precipitation");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(broken))
            .mount(&server)
            .await;

        let err = client(&server, None).fetch_once(&request()).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(
            err,
            FetchError::Schema(SchemaViolation::MissingVariable(ref v)) if v == "precipitation"
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = OpenMeteoClient::new(
            format!("http://127.0.0.1:{port}/v1/archive"),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client.fetch_once(&request()).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
        assert!(err.is_transient());
    }
}
