pub mod error;
pub mod timeline;
