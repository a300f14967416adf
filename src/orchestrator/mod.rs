pub mod chunking;
pub mod runner;
pub mod summary;
pub mod unit;
