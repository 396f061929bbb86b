//! Prometheus-based monitoring of judging activity.
//!
//! # Example
//!
//! ```ignore
//! use elitecode_judge::metrics::{export_metrics, init_metrics};
//!
//! init_metrics()?;
//! // ... judge submissions ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{InFlightGuard, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    REGISTRY, SANDBOXES_IN_FLIGHT, SANDBOX_DURATION, SANDBOX_RUNS_TOTAL, SUBMISSIONS_TOTAL,
    SUBMISSION_DURATION, SUMMARY_CONFLICTS, SUMMARY_FAILURES, TEST_CASE_VERDICTS,
};
