//! Observability for the live-query server
//!
//! - Structured logging through `tracing`
//! - Operational counters exposed on `/stats`
//!
//! # Usage
//!
//! ```ignore
//! use livequery::observability::{init_tracing, LiveQueryMetrics};
//!
//! init_tracing("info");
//! let metrics = LiveQueryMetrics::new();
//! metrics.increment_connected();
//! ```

mod logging;
mod metrics;

pub use logging::{env_filter, init_tracing};
pub use metrics::{LiveQueryMetrics, MetricsSnapshot};
