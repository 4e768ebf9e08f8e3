// In crates/analytics/src/lib.rs

pub mod engine;
pub mod result;
pub mod types;

pub use engine::{AnalyticsEngine, MetricsConfig};
pub use result::SimulationResult;
pub use types::PerformanceMetrics;
