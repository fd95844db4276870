//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, correlation id as a field)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Per request:
//!     → labels.rs derives (service, operation) from method + path
//!     → metrics.rs OperationGuard times the request
//!
//! Consumers:
//!     → stdout log aggregation
//!     → GET /metrics (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments)
//! - Label derivation is total so cardinality stays bounded

pub mod labels;
pub mod logging;
pub mod metrics;

pub use labels::{derive_labels, LabelPolicy, OperationLabels};
pub use logging::init_logging;
pub use metrics::init_metrics;
