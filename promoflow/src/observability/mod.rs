//! Observability: metrics, operator alarms, and log setup.

mod alarms;
mod metrics;
mod tracing;

pub use alarms::{AlarmBoard, AlarmKind, OperatorAlarm};
pub use metrics::PromotionMetrics;
pub use tracing::{init_tracing, LogFormat, SpanTimer};
