use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Whether retrying the same request can reasonably succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Network failure, 5xx, or rate limiting. Retried with backoff.
    Transient,
    /// 4xx other than 429, provider-declared error, or a response that does
    /// not match the schema. Never retried.
    Permanent,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Transient => write!(f, "transient fetch error"),
            FetchErrorKind::Permanent => write!(f, "permanent fetch error"),
        }
    }
}

/// A way the response body failed the expected schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    MissingKey(String),
    MissingVariable(String),
    NotAnArray(String),
    NonNumericValue { variable: String, index: usize },
    NonStringLabel { index: usize },
    LengthMismatch { variable: String, expected: usize, found: usize },
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaViolation::MissingKey(key) => write!(f, "required key '{key}' is missing"),
            SchemaViolation::MissingVariable(var) => {
                write!(f, "requested variable '{var}' is missing under 'hourly'")
            }
            SchemaViolation::NotAnArray(key) => write!(f, "'hourly.{key}' is not an array"),
            SchemaViolation::NonNumericValue { variable, index } => {
                write!(f, "'hourly.{variable}[{index}]' is neither a number nor null")
            }
            SchemaViolation::NonStringLabel { index } => {
                write!(f, "'hourly.time[{index}]' is not a string")
            }
            SchemaViolation::LengthMismatch {
                variable,
                expected,
                found,
            } => write!(
                f,
                "'hourly.{variable}' has {found} values, other series have {expected}"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network request failed for {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build request for {0}")]
    RequestBuild(String, #[source] reqwest::Error),

    #[error("Rate limited by provider at {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP request failed for {url} with status {status}{}", reason_suffix(.reason))]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        reason: Option<String>,
    },

    #[error("Failed to decode JSON response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Provider reported an error: {reason}")]
    ProviderError { reason: String },

    #[error("Response schema violation: {0}")]
    Schema(SchemaViolation),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } | FetchError::RateLimited { .. } => FetchErrorKind::Transient,
            FetchError::HttpStatus { status, .. } if status.is_server_error() => {
                FetchErrorKind::Transient
            }
            FetchError::HttpStatus { .. }
            | FetchError::RequestBuild(..)
            | FetchError::Decode { .. }
            | FetchError::ProviderError { .. }
            | FetchError::Schema(_) => FetchErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FetchErrorKind::Transient
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
