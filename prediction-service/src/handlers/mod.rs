pub mod health;
pub mod metrics;
pub mod predict;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_endpoint;
pub use predict::{predict_bad, predict_good};
