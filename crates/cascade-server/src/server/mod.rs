pub mod config;
pub mod project_file;
pub mod service;
pub mod telemetry;
