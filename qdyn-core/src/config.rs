// Copyright 2025 Gibran Rodriguez <brangi000@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration management for qdyn

use crate::model::ModelFormat;
use crate::quantization::{QuantType, QuantizationConfig};
use crate::{QdynError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global configuration for qdyn runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub quantization: QuantizationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output-side configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Appended to the input file stem when no output path is given
    pub suffix: String,
    /// Check the rewritten graph before writing it
    pub validate: bool,
    /// Fail when any weight's reconstruction error exceeds `max_error_steps`
    pub strict_error_check: bool,
    /// Reconstruction bound in quantization steps for `strict_error_check`
    pub max_error_steps: f32,
    /// Write the quantization report as JSON to this path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            suffix: "_q8".to_string(),
            validate: true,
            strict_error_check: false,
            max_error_steps: 0.5,
            report_path: None,
        }
    }
}

impl OutputConfig {
    /// Derive an output path next to `input`: `model.onnx` -> `model_q8.onnx`
    pub fn output_path_for<P: AsRef<Path>>(&self, input: P) -> PathBuf {
        let input = input.as_ref();
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model");
        input.with_file_name(format!(
            "{}{}.{}",
            stem,
            self.suffix,
            ModelFormat::Onnx.extension()
        ))
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        self.quantization.validate()?;

        if self.output.suffix.is_empty() {
            return Err(QdynError::Configuration(
                "output suffix must not be empty (input would be overwritten)".to_string(),
            ));
        }
        if self.output.suffix.contains(std::path::MAIN_SEPARATOR) {
            return Err(QdynError::Configuration(
                "output suffix must not contain a path separator".to_string(),
            ));
        }
        if !self.output.max_error_steps.is_finite() || self.output.max_error_steps < 0.0 {
            return Err(QdynError::Configuration(format!(
                "max_error_steps must be a non-negative number, got {}",
                self.output.max_error_steps
            )));
        }

        Ok(())
    }

    /// Named preset configurations
    pub fn preset(name: &str) -> Result<Self> {
        let mut config = Self::default();

        match name.to_lowercase().as_str() {
            "default" | "uint8" | "quint8" => {}
            "int8" | "qint8" => {
                config.quantization.weight_type = QuantType::QInt8;
                config.output.suffix = "_s8".to_string();
            }
            "reduce-range" | "reduce_range" => {
                // 7-bit weights avoid overflow on CPUs without VNNI
                config.quantization.reduce_range = true;
            }
            "per-channel" | "per_channel" => {
                config.quantization.per_channel = true;
            }
            _ => {
                return Err(QdynError::Configuration(format!("unknown preset '{}'", name)));
            }
        }

        Ok(config)
    }

    /// Names accepted by [`Config::preset`]
    pub fn preset_names() -> &'static [&'static str] {
        &["default", "int8", "reduce-range", "per-channel"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantization.weight_type, QuantType::QUInt8);
        assert_eq!(config.output.suffix, "_q8");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::preset("per-channel").unwrap();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [quantization]
            weight_type = "QInt8"
            nodes_to_exclude = ["head"]
            "#,
        )
        .unwrap();
        assert_eq!(config.quantization.weight_type, QuantType::QInt8);
        assert_eq!(config.quantization.nodes_to_exclude, vec!["head".to_string()]);
        assert!(!config.quantization.per_channel);
        assert!(config.output.validate);
    }

    #[test]
    fn test_negative_error_bound_rejected() {
        let mut config = Config::default();
        assert_eq!(config.output.max_error_steps, 0.5);
        config.output.max_error_steps = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::preset("reduce-range").unwrap();
        let temp_file = NamedTempFile::new().unwrap();

        config.save(temp_file.path()).unwrap();
        let loaded = Config::load(temp_file.path()).unwrap();

        assert!(loaded.quantization.reduce_range);
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_preset_configs() {
        let int8 = Config::preset("int8").unwrap();
        assert_eq!(int8.quantization.weight_type, QuantType::QInt8);

        let per_channel = Config::preset("PER-CHANNEL").unwrap();
        assert!(per_channel.quantization.per_channel);

        for name in Config::preset_names() {
            assert!(Config::preset(name).unwrap().validate().is_ok());
        }
    }

    #[test]
    fn test_invalid_preset() {
        assert!(Config::preset("int4").is_err());
    }

    #[test]
    fn test_empty_suffix_rejected() {
        let mut config = Config::default();
        config.output.suffix.clear();
        assert!(matches!(config.validate(), Err(QdynError::Configuration(_))));
    }

    #[test]
    fn test_output_path_for() {
        let output = OutputConfig::default();
        assert_eq!(
            output.output_path_for("models/common.onnx"),
            PathBuf::from("models/common_q8.onnx")
        );
    }
}
