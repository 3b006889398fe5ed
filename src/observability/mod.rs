//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher / forwarder produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (upstream latency histogram)
//!     → one tracing span per outbound forward (forwarder)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured key-value logging throughout
//! - Metric recording is off the response path: the response value is
//!   already produced before an observation is made

pub mod logging;
pub mod metrics;
