pub mod error;
pub mod open_meteo;
pub mod retry;
pub mod schema;
pub mod source;
