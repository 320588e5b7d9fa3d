use serde::{Deserialize, Serialize};
use std::fmt;

/// Which trained model/explainer pair a request is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Good,
    Bad,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Good, Variant::Bad];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Good => "good",
            Variant::Bad => "bad",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub diabetes: bool,
    pub image_base64: String,
}
