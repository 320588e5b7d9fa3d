//! Per-variant model and explainer loading.
//!
//! Loaded pairs are cached by variant and reused for as long as both files
//! keep the same modification time and length. Variants never share cache
//! entries.

use crate::config::{PredictionConfig, VariantConfig};
use crate::error::PredictionError;
use crate::models::{Variant, FEATURE_NAMES};
use crate::services::classifier::{load_classifier, Classifier};
use crate::services::explainer::Explainer;
use crate::services::metrics::{record_artifact_load, record_cache_hit};
use anyhow::{anyhow, Context};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

pub struct ArtifactPair {
    pub classifier: Arc<dyn Classifier>,
    pub explainer: Explainer,
    /// Hex SHA-256 of the explainer file as read from disk.
    pub explainer_sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> anyhow::Result<Self> {
        let meta = fs::metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?;
        if !meta.is_file() {
            return Err(anyhow!("{} is not a regular file", path.display()));
        }
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

struct CacheEntry {
    model: Fingerprint,
    explainer: Fingerprint,
    pair: Arc<ArtifactPair>,
}

pub struct ArtifactStore {
    good: VariantConfig,
    bad: VariantConfig,
    cache_enabled: bool,
    cache: DashMap<Variant, CacheEntry>,
}

impl ArtifactStore {
    pub fn new(config: &PredictionConfig) -> Self {
        Self {
            good: config.good.clone(),
            bad: config.bad.clone(),
            cache_enabled: config.artifact_cache_enabled,
            cache: DashMap::new(),
        }
    }

    fn settings(&self, variant: Variant) -> &VariantConfig {
        match variant {
            Variant::Good => &self.good,
            Variant::Bad => &self.bad,
        }
    }

    /// Artifacts for `variant`, from the cache when both files are
    /// unchanged. A failed load evicts that variant's cached pair.
    pub fn get(&self, variant: Variant) -> Result<Arc<ArtifactPair>, PredictionError> {
        let result = self.resolve(variant);
        if result.is_err() {
            self.cache.remove(&variant);
        }
        result
    }

    fn resolve(&self, variant: Variant) -> Result<Arc<ArtifactPair>, PredictionError> {
        let settings = self.settings(variant);

        let model_fp = Fingerprint::of(&settings.model_path)
            .map_err(|reason| PredictionError::ModelLoad { variant, reason })?;
        let explainer_fp = Fingerprint::of(&settings.explainer_path)
            .map_err(|reason| PredictionError::ExplainerLoad { variant, reason })?;

        if self.cache_enabled {
            if let Some(entry) = self.cache.get(&variant) {
                if entry.model == model_fp && entry.explainer == explainer_fp {
                    record_cache_hit(variant);
                    return Ok(Arc::clone(&entry.pair));
                }
                tracing::info!(%variant, "Artifacts changed on disk, reloading");
            }
        }

        let pair = Arc::new(load_pair(variant, settings)?);

        if self.cache_enabled {
            self.cache.insert(
                variant,
                CacheEntry {
                    model: model_fp,
                    explainer: explainer_fp,
                    pair: Arc::clone(&pair),
                },
            );
        }

        Ok(pair)
    }

    /// Whether both artifact files for `variant` are present.
    pub fn is_ready(&self, variant: Variant) -> bool {
        let settings = self.settings(variant);
        settings.model_path.is_file() && settings.explainer_path.is_file()
    }

    /// Debug lines for variants with diagnostics enabled. A notes file that
    /// cannot be read only produces a warning.
    pub fn emit_diagnostics(&self, variant: Variant, pair: &ArtifactPair) {
        let settings = self.settings(variant);
        if !settings.diagnostics {
            return;
        }

        tracing::debug!(%variant, backend = pair.classifier.backend(), "artifacts ready");

        if let Some(notes_path) = &settings.notes_path {
            match fs::read_to_string(notes_path) {
                Ok(notes) => tracing::debug!(%variant, notes = %notes.trim_end(), "artifact notes"),
                Err(e) => tracing::warn!(
                    %variant,
                    path = %notes_path.display(),
                    error = %e,
                    "Failed to read artifact notes"
                ),
            }
        }

        tracing::debug!(
            %variant,
            sha256 = %pair.explainer_sha256,
            explainer = pair.explainer.kind(),
            "explainer digest"
        );
    }
}

fn load_pair(variant: Variant, settings: &VariantConfig) -> Result<ArtifactPair, PredictionError> {
    tracing::info!(
        %variant,
        model = %settings.model_path.display(),
        explainer = %settings.explainer_path.display(),
        "Loading artifacts"
    );

    let classifier = load_classifier(&settings.model_path)
        .and_then(|classifier| {
            check_columns(classifier.as_ref())?;
            Ok(classifier)
        })
        .map_err(|reason| PredictionError::ModelLoad { variant, reason })?;

    let bytes = fs::read(&settings.explainer_path)
        .with_context(|| format!("failed to read explainer {}", settings.explainer_path.display()))
        .map_err(|reason| PredictionError::ExplainerLoad { variant, reason })?;
    let explainer = Explainer::from_bytes(&bytes)
        .with_context(|| format!("invalid explainer {}", settings.explainer_path.display()))
        .map_err(|reason| PredictionError::ExplainerLoad { variant, reason })?;

    record_artifact_load(variant);

    Ok(ArtifactPair {
        classifier,
        explainer,
        explainer_sha256: hex::encode(Sha256::digest(&bytes)),
    })
}

fn check_columns(classifier: &dyn Classifier) -> anyhow::Result<()> {
    if let Some(columns) = classifier.columns() {
        if let Some(unknown) = columns.iter().find(|c| !FEATURE_NAMES.contains(&c.as_str())) {
            return Err(anyhow!("model declares unknown input column '{}'", unknown));
        }
    }
    Ok(())
}
