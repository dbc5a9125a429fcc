//! Pipeline settings.
//!
//! Defaults reproduce the fixed-path batch run. A TOML file may override any
//! subset of fields; unknown keys are rejected so typos surface early.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::ml::forest::ForestOptions;
use crate::onnx::ExportOptions;

pub const DEFAULT_INPUT: &str = "Testing_AI_Data.csv";
pub const DEFAULT_OUTPUT: &str = "bat_model.onnx";
pub const DEFAULT_LABEL_COLUMN: &str = "Species";
/// Stand-in for "no measurement available".
pub const MISSING_SENTINEL: f64 = -1.0;
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_SEED: u64 = 42;

/// Errors that may occur while loading pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// CSV file with a header row.
    pub input_path: PathBuf,
    /// Destination of the ONNX model; overwritten if present.
    pub output_path: PathBuf,
    /// Column holding the class label.
    pub label_column: String,
    /// Value written into every missing cell.
    pub missing_sentinel: f64,
    /// Share of rows held out for evaluation.
    pub test_fraction: f64,
    /// Seed for the split and the forest.
    pub seed: u64,
    pub forest: ForestOptions,
    pub export: ExportOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT),
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            missing_sentinel: MISSING_SENTINEL,
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SEED,
            forest: ForestOptions::default(),
            export: ExportOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a TOML file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.label_column.is_empty() {
            return Err(ConfigError::Invalid("label_column must not be empty".into()));
        }
        if self.export.input_name.is_empty() {
            return Err(ConfigError::Invalid("export.input_name must not be empty".into()));
        }
        if !self.missing_sentinel.is_finite() {
            return Err(ConfigError::Invalid("missing_sentinel must be finite".into()));
        }
        self.forest
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Forest options carrying the pipeline seed.
    pub fn forest_options(&self) -> ForestOptions {
        ForestOptions {
            seed: self.seed,
            ..self.forest.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::forest::MaxFeatures;

    #[test]
    fn defaults_match_fixed_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.input_path, PathBuf::from("Testing_AI_Data.csv"));
        assert_eq!(config.output_path, PathBuf::from("bat_model.onnx"));
        assert_eq!(config.label_column, "Species");
        assert_eq!(config.missing_sentinel, -1.0);
        assert_eq!(config.test_fraction, 0.2);
        assert_eq!(config.seed, 42);
        assert_eq!(config.forest.n_trees, 100);
        assert_eq!(config.forest.max_features, MaxFeatures::Sqrt);
        assert!(config.forest.bootstrap);
        assert_eq!(config.export.input_name, "float_input");
        assert!(!config.export.zipmap);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batclass.toml");
        std::fs::write(
            &path,
            r#"
seed = 7
output_path = "out/model.onnx"

[forest]
n_trees = 25
max_depth = 6
max_features = { count = 3 }

[export]
zipmap = true
"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.output_path, PathBuf::from("out/model.onnx"));
        assert_eq!(config.input_path, PathBuf::from(DEFAULT_INPUT));
        assert_eq!(config.forest.n_trees, 25);
        assert_eq!(config.forest.max_depth, Some(6));
        assert_eq!(config.forest.max_features, MaxFeatures::Count(3));
        assert_eq!(config.forest.min_samples_leaf, 1);
        assert!(config.export.zipmap);
        assert_eq!(config.forest_options().seed, 7);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batclass.toml");
        std::fs::write(&path, "n_estimators = 10\n").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batclass.toml");
        std::fs::write(&path, "test_fraction = 1.5\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[forest]\nn_trees = 0\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
