pub mod metrics;
pub mod tracing;

pub use metrics::MetricsRegistry;
pub use self::tracing::init_tracing;
