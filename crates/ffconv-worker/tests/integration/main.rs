//! Worker integration tests.
//!
//! The service tests drive the full pipeline against fake `ffmpeg` and
//! `ffprobe` shell scripts, so they only run on unix.

mod common;
mod pool_tests;
#[cfg(unix)]
mod service_tests;
