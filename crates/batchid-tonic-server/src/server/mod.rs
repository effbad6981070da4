pub mod config;
pub mod serve;
pub mod service;
pub mod telemetry;
pub mod topology;
