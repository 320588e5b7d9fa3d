pub mod artifacts;
pub mod classifier;
pub mod explainer;
pub mod metrics;
pub mod predictor;
pub mod render;

pub use artifacts::{ArtifactPair, ArtifactStore};
pub use classifier::{load_classifier, Classifier};
pub use explainer::{Attribution, Explainer, Explanation};
pub use metrics::{get_metrics, init_metrics};
pub use predictor::Predictor;
pub use render::ForcePlotRenderer;
