mod client;
mod config;
mod error;
mod ingest;
mod locations;
mod orchestrator;
mod reconstruct;
mod settings;
mod types;
mod writer;

pub use config::IngestConfig;
pub use error::IngestError;
pub use ingest::WeatherIngest;

pub use client::error::{FetchError, FetchErrorKind, SchemaViolation};
pub use client::open_meteo::{OpenMeteoClient, DEFAULT_ARCHIVE_URL};
pub use client::retry::{FetchContext, FetchStats, RetryPolicy};
pub use client::schema::parse_payload;
pub use client::source::HourlySource;

pub use reconstruct::error::ReconstructError;
pub use reconstruct::timeline::{
    hourly_step, reconstruct, rows_from_payload, start_instant, validate_series, LabelQuality,
    HOURLY_STEP_SECONDS,
};

pub use orchestrator::chunking::{ChunkingPolicy, MAX_WINDOW_DAYS};
pub use orchestrator::runner::Orchestrator;
pub use orchestrator::summary::{JobOutcome, JobSummary};
pub use orchestrator::unit::{
    FailureKind, RequestUnit, UnitError, UnitFailure, UnitOutcome, UnitPhase, UnitStatus,
};

pub use types::date_span::{DateSpan, HOURS_PER_DAY};
pub use types::fetch_request::{FetchRequest, FetchRequestError, DEFAULT_HOURLY_VARIABLES};
pub use types::hourly_row::{HourlyRow, RowKey};
pub use types::location::{LatLon, Location};
pub use types::payload::{PayloadMetadata, RawHourlyPayload};
pub use types::result_set::{MergeConflict, ResultSet, UnitId};

pub use locations::{load_locations, LocationsError};
pub use settings::{ensure_dir_exists, ResultLayout};
pub use writer::error::WriterError;
pub use writer::frame::DATETIME_FORMAT;
pub use writer::table::{read_result_set, write_result_set, OutputFormat};
