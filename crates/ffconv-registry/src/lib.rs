//! In-memory job registry.
//!
//! This crate provides:
//! - The job lifecycle state machine
//! - Bounded per-job log rings
//! - Status observers and a broadcast event stream

pub mod error;
pub mod event;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use event::JobEvent;
pub use registry::{JobRegistry, StatusHandler, EVENT_CHANNEL_CAPACITY};
