pub mod prediction;
pub mod record;

pub use prediction::{PredictionResponse, Variant};
pub use record::{FeatureRecord, FEATURE_NAMES};
