//! Conversion worker.
//!
//! This crate provides:
//! - A bounded worker pool with backpressure and graceful shutdown
//! - The probe / build / run conversion pipeline
//! - The `ConversionService` entry point
//! - Environment configuration, structured job logging and metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod service;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{ConversionPipeline, ConversionTask, TaskProcessor};
pub use pool::WorkerPool;
pub use service::ConversionService;
