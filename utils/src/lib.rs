//! Shared utilities for the liquid voting services.

pub mod logging;
pub mod time;

pub use logging::init_tracing;
pub use time::{format_duration, format_millis};
