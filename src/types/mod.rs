pub mod date_span;
pub mod fetch_request;
pub mod hourly_row;
pub mod location;
pub mod payload;
pub mod result_set;
