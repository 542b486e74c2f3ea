//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Tunnels produce:
//!     → logging.rs (structured log events via tracing)
//!     → spans.rs (one span per tunnel with its id and target)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;
pub mod spans;
