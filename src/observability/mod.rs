pub mod metrics;
pub mod tracing;

pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use tracing::init_tracing;
