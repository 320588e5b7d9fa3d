use crate::models::Variant;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub common: core_config::Config,
    pub good: VariantConfig,
    pub bad: VariantConfig,
    /// Reuse loaded artifacts until their files change on disk.
    pub artifact_cache_enabled: bool,
    /// Directory holding `index.html` and other static assets.
    pub static_dir: PathBuf,
    pub plot: PlotConfig,
}

#[derive(Debug, Clone)]
pub struct VariantConfig {
    pub model_path: PathBuf,
    pub explainer_path: PathBuf,
    /// Companion text file echoed into the diagnostic log.
    pub notes_path: Option<PathBuf>,
    pub diagnostics: bool,
}

#[derive(Debug, Clone)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
    pub increase_color: String,
    pub decrease_color: String,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 300,
            increase_color: "#77dd77".to_string(),
            decrease_color: "#f99191".to_string(),
        }
    }
}

impl PredictionConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Self::from_lookup(common_config, is_prod, |key| env::var(key).ok())
    }

    /// Build the service settings from `lookup`. Artifact paths have dev
    /// defaults but must be set explicitly in production.
    pub fn from_lookup<F>(
        common: core_config::Config,
        is_prod: bool,
        lookup: F,
    ) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let plot_defaults = PlotConfig::default();

        Ok(PredictionConfig {
            common,
            good: variant_config(&lookup, Variant::Good, is_prod)?,
            bad: variant_config(&lookup, Variant::Bad, is_prod)?,
            artifact_cache_enabled: parse_env(&lookup, "ARTIFACT_CACHE_ENABLED", true)?,
            static_dir: get_env(&lookup, "STATIC_DIR", Some("static"), false)?.into(),
            plot: PlotConfig {
                width: parse_env(&lookup, "PLOT_WIDTH", plot_defaults.width)?,
                height: parse_env(&lookup, "PLOT_HEIGHT", plot_defaults.height)?,
                increase_color: lookup("PLOT_INCREASE_COLOR")
                    .unwrap_or(plot_defaults.increase_color),
                decrease_color: lookup("PLOT_DECREASE_COLOR")
                    .unwrap_or(plot_defaults.decrease_color),
            },
        })
    }

    pub fn variant(&self, variant: Variant) -> &VariantConfig {
        match variant {
            Variant::Good => &self.good,
            Variant::Bad => &self.bad,
        }
    }
}

fn variant_config<F>(
    lookup: &F,
    variant: Variant,
    is_prod: bool,
) -> Result<VariantConfig, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = variant.as_str().to_uppercase();
    let default_model = format!("artifacts/diabetes_{}_model.json", variant);
    let default_explainer = format!("artifacts/explainer_{}.json.bz2", variant);

    Ok(VariantConfig {
        model_path: get_env(
            lookup,
            &format!("{}_MODEL_PATH", prefix),
            Some(&default_model),
            is_prod,
        )?
        .into(),
        explainer_path: get_env(
            lookup,
            &format!("{}_EXPLAINER_PATH", prefix),
            Some(&default_explainer),
            is_prod,
        )?
        .into(),
        notes_path: lookup(&format!("{}_NOTES_PATH", prefix))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from),
        diagnostics: parse_env(
            lookup,
            &format!("{}_DIAGNOSTICS", prefix),
            variant == Variant::Good,
        )?,
    })
}

fn get_env<F>(
    lookup: &F,
    key: &str,
    default: Option<&str>,
    is_prod: bool,
) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => Ok(val),
        None => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("invalid value for {}: {}", key, e))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)], is_prod: bool) -> Result<PredictionConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PredictionConfig::from_lookup(core_config::Config::default(), is_prod, |key| {
            vars.get(key).cloned()
        })
    }

    #[test]
    fn test_dev_defaults() {
        let config = load(&[], false).unwrap();

        assert_eq!(
            config.good.model_path,
            PathBuf::from("artifacts/diabetes_good_model.json")
        );
        assert_eq!(
            config.bad.explainer_path,
            PathBuf::from("artifacts/explainer_bad.json.bz2")
        );
        assert!(config.good.diagnostics);
        assert!(!config.bad.diagnostics);
        assert!(config.good.notes_path.is_none());
        assert!(config.artifact_cache_enabled);
        assert_eq!(config.static_dir, PathBuf::from("static"));
        assert_eq!((config.plot.width, config.plot.height), (1200, 300));
        assert_eq!(config.plot.increase_color, "#77dd77");
    }

    #[test]
    fn test_overrides() {
        let config = load(
            &[
                ("BAD_MODEL_PATH", "/models/bad.onnx"),
                ("BAD_DIAGNOSTICS", "true"),
                ("GOOD_NOTES_PATH", "/models/notes.txt"),
                ("ARTIFACT_CACHE_ENABLED", "false"),
                ("PLOT_WIDTH", "800"),
            ],
            false,
        )
        .unwrap();

        assert_eq!(config.variant(Variant::Bad).model_path, PathBuf::from("/models/bad.onnx"));
        assert!(config.bad.diagnostics);
        assert_eq!(config.good.notes_path, Some(PathBuf::from("/models/notes.txt")));
        assert!(!config.artifact_cache_enabled);
        assert_eq!(config.plot.width, 800);
    }

    #[test]
    fn test_prod_requires_artifact_paths() {
        let err = load(&[], true).unwrap_err();
        assert!(err.to_string().contains("GOOD_MODEL_PATH"));

        let config = load(
            &[
                ("GOOD_MODEL_PATH", "g.json"),
                ("GOOD_EXPLAINER_PATH", "g.json.bz2"),
                ("BAD_MODEL_PATH", "b.json"),
                ("BAD_EXPLAINER_PATH", "b.json.bz2"),
            ],
            true,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = load(&[("PLOT_HEIGHT", "tall")], false).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
