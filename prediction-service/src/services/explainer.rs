//! Per-feature attributions for a single record.
//!
//! Explainer artifacts are JSON documents, optionally bzip2-compressed, fit
//! offline against a specific model:
//!
//! ```json
//! { "kind": "linear", "feature_names": [...], "expected_value": [0.12],
//!   "coefficients": [...], "means": [...] }
//!
//! { "kind": "kernel", "feature_names": [...], "background": [[...], ...] }
//! ```
//!
//! `kernel` explainers compute exact interventional Shapley values: every
//! feature coalition is evaluated against the paired model with the
//! remaining features drawn from each background row.

use crate::error::PredictionError;
use crate::models::{FeatureRecord, FEATURE_NAMES};
use crate::services::classifier::Classifier;
use anyhow::{bail, ensure, Context};
use bzip2::read::BzDecoder;
use ndarray::Array2;
use serde::Deserialize;
use std::io::Read;

const BZIP2_MAGIC: &[u8] = b"BZh";

/// Each kernel explanation evaluates `2^8` coalitions per background row.
const MAX_BACKGROUND_ROWS: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ExplainerDocument {
    Linear {
        feature_names: Vec<String>,
        expected_value: Vec<f64>,
        coefficients: Vec<f64>,
        means: Vec<f64>,
    },
    Kernel {
        feature_names: Vec<String>,
        #[serde(default)]
        expected_value: Vec<f64>,
        background: Vec<Vec<f64>>,
    },
}

#[derive(Debug)]
enum Method {
    Linear {
        coefficients: Vec<f64>,
        means: Vec<f64>,
    },
    Kernel {
        background: Array2<f32>,
    },
}

#[derive(Debug)]
pub struct Explainer {
    feature_names: Vec<String>,
    expected_value: Option<f64>,
    method: Method,
}

/// One feature's contribution to a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub name: String,
    /// The record's value for this feature.
    pub value: f64,
    /// How far this feature pushes the output away from the base value.
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub base_value: f64,
    pub attributions: Vec<Attribution>,
}

impl Explanation {
    pub fn output_value(&self) -> f64 {
        self.base_value + self.attributions.iter().map(|a| a.contribution).sum::<f64>()
    }
}

impl Explainer {
    /// Decode an artifact, decompressing it first when it is a bzip2 stream.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let json = if bytes.starts_with(BZIP2_MAGIC) {
            let mut decoded = Vec::new();
            BzDecoder::new(bytes)
                .read_to_end(&mut decoded)
                .context("explainer is not a valid bzip2 stream")?;
            decoded
        } else {
            bytes.to_vec()
        };

        let doc: ExplainerDocument =
            serde_json::from_slice(&json).context("explainer document is not valid JSON")?;
        Self::from_document(doc)
    }

    fn from_document(doc: ExplainerDocument) -> anyhow::Result<Self> {
        match doc {
            ExplainerDocument::Linear {
                feature_names,
                expected_value,
                coefficients,
                means,
            } => {
                check_feature_names(&feature_names)?;
                let n = feature_names.len();
                ensure!(
                    coefficients.len() == n && means.len() == n,
                    "linear explainer needs {} coefficients and means, got {} and {}",
                    n,
                    coefficients.len(),
                    means.len()
                );
                ensure!(
                    coefficients.iter().chain(&means).all(|v| v.is_finite()),
                    "linear explainer contains non-finite parameters"
                );
                let base = first_expected_value(&expected_value)?
                    .context("linear explainer needs an expected_value")?;

                Ok(Self {
                    feature_names,
                    expected_value: Some(base),
                    method: Method::Linear {
                        coefficients,
                        means,
                    },
                })
            }
            ExplainerDocument::Kernel {
                feature_names,
                expected_value,
                background,
            } => {
                check_feature_names(&feature_names)?;
                let n = feature_names.len();
                ensure!(!background.is_empty(), "kernel explainer has no background rows");
                ensure!(
                    background.len() <= MAX_BACKGROUND_ROWS,
                    "kernel explainer background has {} rows, limit is {}",
                    background.len(),
                    MAX_BACKGROUND_ROWS
                );

                let rows = background.len();
                let mut flat = Vec::with_capacity(rows * n);
                for (idx, row) in background.into_iter().enumerate() {
                    ensure!(
                        row.len() == n,
                        "background row {} has {} values, expected {}",
                        idx,
                        row.len(),
                        n
                    );
                    ensure!(
                        row.iter().all(|v| v.is_finite()),
                        "background row {} contains non-finite values",
                        idx
                    );
                    flat.extend(row.into_iter().map(|v| v as f32));
                }

                Ok(Self {
                    feature_names,
                    expected_value: first_expected_value(&expected_value)?,
                    method: Method::Kernel {
                        background: Array2::from_shape_vec((rows, n), flat)?,
                    },
                })
            }
        }
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn kind(&self) -> &'static str {
        match self.method {
            Method::Linear { .. } => "linear",
            Method::Kernel { .. } => "kernel",
        }
    }

    /// Attributions for `record`, in the explainer's feature order.
    pub fn explain(
        &self,
        record: &FeatureRecord,
        model: &dyn Classifier,
    ) -> Result<Explanation, PredictionError> {
        let values = record
            .project(&self.feature_names)
            .map_err(PredictionError::Inference)?;

        let (base_value, contributions) = match &self.method {
            Method::Linear {
                coefficients,
                means,
            } => {
                let contributions: Vec<f64> = values
                    .iter()
                    .zip(coefficients.iter().zip(means))
                    .map(|(x, (coef, mean))| coef * (x - mean))
                    .collect();
                // Linear explainers always carry a base value.
                (self.expected_value.unwrap_or_default(), contributions)
            }
            Method::Kernel { background } => {
                self.check_model_columns(model)?;
                let (expected, contributions) = shapley_values(&values, background, model)?;
                (self.expected_value.unwrap_or(expected), contributions)
            }
        };

        let attributions = self
            .feature_names
            .iter()
            .zip(values)
            .zip(contributions)
            .map(|((name, value), contribution)| Attribution {
                name: name.clone(),
                value,
                contribution,
            })
            .collect();

        Ok(Explanation {
            base_value,
            attributions,
        })
    }

    /// Kernel attributions feed explainer-ordered rows straight into the
    /// model, so both must agree on column order.
    fn check_model_columns(&self, model: &dyn Classifier) -> Result<(), PredictionError> {
        let matches = match model.columns() {
            Some(columns) => columns == self.feature_names.as_slice(),
            None => self.feature_names.iter().zip(FEATURE_NAMES).all(|(a, b)| a == b),
        };

        if matches {
            Ok(())
        } else {
            Err(PredictionError::Inference(
                "explainer feature order does not match the model inputs".to_string(),
            ))
        }
    }
}

fn check_feature_names(names: &[String]) -> anyhow::Result<()> {
    ensure!(
        names.len() == FEATURE_NAMES.len(),
        "explainer declares {} features, expected {}",
        names.len(),
        FEATURE_NAMES.len()
    );
    for expected in FEATURE_NAMES {
        let count = names.iter().filter(|n| *n == expected).count();
        if count != 1 {
            bail!("explainer must declare feature '{}' exactly once", expected);
        }
    }
    Ok(())
}

fn first_expected_value(values: &[f64]) -> anyhow::Result<Option<f64>> {
    match values.first() {
        Some(v) if !v.is_finite() => bail!("expected_value must be finite"),
        other => Ok(other.copied()),
    }
}

/// Exact Shapley values with interventional (background) masking.
///
/// Returns the mean model output over the background together with one
/// attribution per feature. The attributions sum to
/// `f(x) - E[f(background)]`.
fn shapley_values(
    x: &[f64],
    background: &Array2<f32>,
    model: &dyn Classifier,
) -> Result<(f64, Vec<f64>), PredictionError> {
    let n = x.len();
    let n_background = background.nrows();
    let coalitions = 1usize << n;

    let mut batch = Array2::<f32>::zeros((coalitions * n_background, n));
    for mask in 0..coalitions {
        for (b, bg_row) in background.rows().into_iter().enumerate() {
            let mut row = batch.row_mut(mask * n_background + b);
            for j in 0..n {
                row[j] = if mask & (1 << j) != 0 {
                    x[j] as f32
                } else {
                    bg_row[j]
                };
            }
        }
    }

    let outputs = model.predict(batch.view())?;
    if outputs.len() != batch.nrows() {
        return Err(PredictionError::Inference(format!(
            "model returned {} outputs for {} rows",
            outputs.len(),
            batch.nrows()
        )));
    }

    let coalition_value: Vec<f64> = outputs
        .chunks(n_background)
        .map(|chunk| chunk.iter().map(|&v| v as f64).sum::<f64>() / n_background as f64)
        .collect();

    // weight[s] = s! (n - s - 1)! / n!
    let factorial = |k: usize| (1..=k).map(|i| i as f64).product::<f64>();
    let weights: Vec<f64> = (0..n)
        .map(|s| factorial(s) * factorial(n - s - 1) / factorial(n))
        .collect();

    let mut phi = vec![0.0f64; n];
    for (i, phi_i) in phi.iter_mut().enumerate() {
        let bit = 1usize << i;
        for mask in (0..coalitions).filter(|m| m & bit == 0) {
            let size = mask.count_ones() as usize;
            *phi_i += weights[size] * (coalition_value[mask | bit] - coalition_value[mask]);
        }
    }

    if phi.iter().any(|v| !v.is_finite()) {
        return Err(PredictionError::Inference(
            "attribution produced non-finite values".to_string(),
        ));
    }

    Ok((coalition_value[0], phi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::DenseClassifier;
    use bzip2::write::BzEncoder;
    use bzip2::Compression;
    use serde_json::json;
    use std::io::Write;

    const COEFS: [f64; 8] = [0.05, 0.9, 0.8, 0.08, 2.2, 0.03, 0.2, 0.1];

    fn record() -> FeatureRecord {
        FeatureRecord {
            age: 45.0,
            hypertension: 0.0,
            heart_disease: 0.0,
            bmi: 27.3,
            hba1c_level: 5.8,
            blood_glucose_level: 140.0,
            gender_encoded: 1.0,
            smoking_history_encoded: 0.0,
        }
    }

    /// Linear (identity output) model over the canonical columns.
    fn linear_model() -> DenseClassifier {
        let weights: Vec<Vec<f64>> = COEFS.iter().map(|c| vec![*c]).collect();
        let doc = json!({
            "format": "dense",
            "layers": [{ "weights": weights, "bias": [-20.0] }]
        });
        DenseClassifier::from_slice(doc.to_string().as_bytes()).unwrap()
    }

    fn logistic_model() -> DenseClassifier {
        let weights: Vec<Vec<f64>> = COEFS.iter().map(|c| vec![*c]).collect();
        let doc = json!({
            "format": "dense",
            "layers": [{ "weights": weights, "bias": [-20.0], "activation": "sigmoid" }]
        });
        DenseClassifier::from_slice(doc.to_string().as_bytes()).unwrap()
    }

    fn background() -> Vec<Vec<f64>> {
        vec![
            vec![30.0, 0.0, 0.0, 22.0, 5.0, 100.0, 0.0, 0.0],
            vec![60.0, 1.0, 0.0, 31.0, 6.5, 160.0, 1.0, 2.0],
            vec![50.0, 0.0, 1.0, 26.0, 5.5, 120.0, 1.0, 1.0],
        ]
    }

    fn kernel_doc() -> serde_json::Value {
        json!({
            "kind": "kernel",
            "feature_names": FEATURE_NAMES,
            "background": background()
        })
    }

    #[test]
    fn test_linear_closed_form() {
        let means = [40.0, 0.1, 0.05, 27.0, 5.5, 138.0, 0.4, 1.0];
        let doc = json!({
            "kind": "linear",
            "feature_names": FEATURE_NAMES,
            "expected_value": [0.12, 0.88],
            "coefficients": COEFS,
            "means": means
        });
        let explainer = Explainer::from_bytes(doc.to_string().as_bytes()).unwrap();
        let explanation = explainer.explain(&record(), &linear_model()).unwrap();

        assert_eq!(explanation.base_value, 0.12);
        for (i, attribution) in explanation.attributions.iter().enumerate() {
            let expected = COEFS[i] * (record().values()[i] - means[i]);
            assert!((attribution.contribution - expected).abs() < 1e-12);
            assert_eq!(attribution.name, FEATURE_NAMES[i]);
        }
    }

    #[test]
    fn test_kernel_matches_linear_model() {
        let explainer = Explainer::from_bytes(kernel_doc().to_string().as_bytes()).unwrap();
        let explanation = explainer.explain(&record(), &linear_model()).unwrap();

        // For a linear model interventional Shapley values reduce to
        // coef * (x - mean(background)).
        let bg = background();
        for (j, attribution) in explanation.attributions.iter().enumerate() {
            let mean = bg.iter().map(|r| r[j]).sum::<f64>() / bg.len() as f64;
            let expected = COEFS[j] * (record().values()[j] - mean);
            assert!(
                (attribution.contribution - expected).abs() < 1e-3,
                "feature {}: {} vs {}",
                attribution.name,
                attribution.contribution,
                expected
            );
        }
    }

    #[test]
    fn test_kernel_efficiency_for_nonlinear_model() {
        let model = logistic_model();
        let explainer = Explainer::from_bytes(kernel_doc().to_string().as_bytes()).unwrap();
        let explanation = explainer.explain(&record(), &model).unwrap();

        let x: Vec<f32> = record().values().iter().map(|v| *v as f32).collect();
        let fx = model
            .predict(Array2::from_shape_vec((1, 8), x).unwrap().view())
            .unwrap()[0] as f64;

        assert!((explanation.output_value() - fx).abs() < 1e-4);
        assert!(explanation.base_value > 0.0 && explanation.base_value < 1.0);
    }

    #[test]
    fn test_explicit_expected_value_is_used() {
        let mut doc = kernel_doc();
        doc["expected_value"] = json!([0.25]);
        let explainer = Explainer::from_bytes(doc.to_string().as_bytes()).unwrap();
        let explanation = explainer.explain(&record(), &logistic_model()).unwrap();
        assert_eq!(explanation.base_value, 0.25);
    }

    #[test]
    fn test_bzip2_artifact_is_decompressed() {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(kernel_doc().to_string().as_bytes())
            .unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.starts_with(BZIP2_MAGIC));

        let explainer = Explainer::from_bytes(&compressed).unwrap();
        assert_eq!(explainer.kind(), "kernel");
    }

    #[test]
    fn test_truncated_bzip2_stream_fails() {
        let err = Explainer::from_bytes(b"BZh9 this is not a compressed block").unwrap_err();
        assert!(format!("{:#}", err).contains("bzip2"));
    }

    #[test]
    fn test_feature_names_must_cover_schema() {
        let mut doc = kernel_doc();
        doc["feature_names"][0] = json!("insulin");
        assert!(Explainer::from_bytes(doc.to_string().as_bytes()).is_err());

        let mut doc = kernel_doc();
        doc["background"][1] = json!([1.0, 2.0]);
        assert!(Explainer::from_bytes(doc.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_kernel_background_is_bounded() {
        let mut doc = kernel_doc();
        doc["background"] = json!(vec![background()[0].clone(); MAX_BACKGROUND_ROWS + 1]);
        let err = Explainer::from_bytes(doc.to_string().as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("limit"));

        let mut doc = kernel_doc();
        doc["background"] = json!([]);
        assert!(Explainer::from_bytes(doc.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_linear_requires_expected_value() {
        let doc = json!({
            "kind": "linear",
            "feature_names": FEATURE_NAMES,
            "expected_value": [],
            "coefficients": COEFS,
            "means": COEFS
        });
        assert!(Explainer::from_bytes(doc.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_kernel_rejects_column_order_mismatch() {
        let mut names: Vec<&str> = FEATURE_NAMES.to_vec();
        names.swap(0, 3);
        let mut doc = kernel_doc();
        doc["feature_names"] = json!(names);
        let explainer = Explainer::from_bytes(doc.to_string().as_bytes()).unwrap();

        let result = explainer.explain(&record(), &linear_model());
        assert!(matches!(result, Err(PredictionError::Inference(_))));
    }
}
