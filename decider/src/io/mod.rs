//! Side-effecting layers: configuration, generation backends, run records and reports.

pub mod backend;
pub mod config;
pub mod report;
pub mod session_store;
