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

//! Command implementations

use crate::cli::{InfoArgs, QuantizeArgs, ValidateArgs};
use qdyn_core::{
    Config, DynamicQuantizer, GraphValidator, Model, QdynError, Result, ValidationConfig,
};
use std::path::Path;

/// Resolve the effective configuration: file or preset, then flags
pub fn resolve_config(args: &QuantizeArgs) -> Result<Config> {
    let mut config = match (&args.config, &args.preset) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(preset)) => Config::preset(preset)?,
        (None, None) => Config::default(),
    };

    let quant = &mut config.quantization;
    if let Some(weight_type) = args.weight_type {
        quant.weight_type = weight_type;
    }
    quant.per_channel |= args.per_channel;
    quant.reduce_range |= args.reduce_range;
    if !args.op_types.is_empty() {
        quant.op_types_to_quantize = args.op_types.clone();
    }
    if !args.nodes.is_empty() {
        quant.nodes_to_quantize = args.nodes.clone();
    }
    quant.nodes_to_exclude.extend(args.exclude.iter().cloned());

    if args.no_validate {
        config.output.validate = false;
    }
    if let Some(report) = &args.report {
        config.output.report_path = Some(report.display().to_string());
    }

    config.validate()?;
    Ok(config)
}

/// True when writing `output` would replace the file at `input`
///
/// Paths are compared after resolving symlinks and `..` components; an output
/// that does not exist yet is resolved through its parent directory.
fn is_same_file(input: &Path, output: &Path) -> bool {
    if input == output {
        return true;
    }
    let input = match std::fs::canonicalize(input) {
        Ok(path) => path,
        Err(_) => return false,
    };
    if let Ok(existing) = std::fs::canonicalize(output) {
        return existing == input;
    }
    let parent = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(parent), output.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name) == input,
        _ => false,
    }
}

pub fn quantize(args: &QuantizeArgs, quiet: bool) -> Result<()> {
    let config = resolve_config(args)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.output.output_path_for(&args.input));
    if is_same_file(&args.input, &output) {
        return Err(QdynError::Configuration(format!(
            "output path {} would overwrite the input",
            output.display()
        )));
    }

    let quantizer = DynamicQuantizer::new(config.quantization.clone())?
        .with_validation(config.output.validate);
    let model = Model::load(&args.input)?;
    let (quantized, mut report) = quantizer.quantize_model(&model)?;

    if config.output.strict_error_check {
        GraphValidator::with_config(ValidationConfig {
            max_error_steps: config.output.max_error_steps,
            ..Default::default()
        })
        .check_reconstruction(&report.weights)?;
    }

    report.record_saved_size(quantized.save(&output)?);

    #[cfg(feature = "onnx")]
    if config.output.validate {
        GraphValidator::new().check_loadable(&output)?;
    }

    if let Some(path) = &config.output.report_path {
        report.save_json(path)?;
        log::info!("Wrote quantization report to {}", path);
    }

    if !quiet {
        println!("{}", report.summary());
        println!("Wrote {}", output.display());
    }
    Ok(())
}

pub fn info(args: &InfoArgs) -> Result<()> {
    let info = Model::load(&args.model)?.info();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("{}", info.summary());
    }
    Ok(())
}

pub fn validate(args: &ValidateArgs, quiet: bool) -> Result<()> {
    let model = Model::load(&args.model)?;
    let validator = GraphValidator::new();
    let result = validator.validate(&model);

    if !quiet {
        println!(
            "{}: {} nodes, {} initializers",
            args.model.display(),
            result.node_count,
            result.initializer_count
        );
        for issue in &result.issues {
            println!("  - {}", issue);
        }
    }

    #[cfg(feature = "onnx")]
    validator.check_loadable(&args.model)?;

    if result.passed() {
        if !quiet {
            println!("Model is valid");
        }
        Ok(())
    } else {
        Err(QdynError::ValidationFailed {
            message: format!("{} issue(s) found", result.issues.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{parse_args, Command};
    use qdyn_core::onnx::{make_model, make_node, make_tensor_value_info, DataType, GraphProto};
    use qdyn_core::quantization::QuantType;
    use qdyn_core::tensor;
    use tempfile::TempDir;

    fn quantize_args(argv: &[&str]) -> QuantizeArgs {
        match parse_args(argv.iter().copied()).unwrap().command {
            Command::Quantize(args) => args,
            _ => panic!("Expected Quantize command"),
        }
    }

    fn write_model(dir: &TempDir) -> std::path::PathBuf {
        let graph = GraphProto {
            node: vec![make_node("MatMul", &["x", "W"], &["y"], "mm", vec![])],
            initializer: vec![tensor::from_f32("W", &[2, 2], &[0.123, -0.771, 0.456, 0.987])],
            input: vec![make_tensor_value_info("x", DataType::Float, &[1, 2])],
            output: vec![make_tensor_value_info("y", DataType::Float, &[1, 2])],
            ..Default::default()
        };
        let path = dir.path().join("common.onnx");
        Model::from_proto(make_model(graph, 13))
            .unwrap()
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_flags_override_preset() {
        let args = quantize_args(&[
            "qdyn",
            "quantize",
            "m.onnx",
            "--preset",
            "int8",
            "--weight-type",
            "quint8",
            "--reduce-range",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.quantization.weight_type, QuantType::QUInt8);
        assert!(config.quantization.reduce_range);
        assert_eq!(config.output.suffix, "_s8");
    }

    #[test]
    fn test_unknown_op_type_rejected() {
        let args = quantize_args(&["qdyn", "quantize", "m.onnx", "--op-types", "LSTM"]);
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn test_quantize_default_output_and_report() {
        let dir = TempDir::new().unwrap();
        let input = write_model(&dir);
        let report = dir.path().join("report.json");

        let args = quantize_args(&[
            "qdyn",
            "quantize",
            input.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ]);
        quantize(&args, true).unwrap();

        let output = dir.path().join("common_q8.onnx");
        assert!(output.exists());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(json["quantized_nodes"]["MatMul"], 1);

        validate(&ValidateArgs { model: output }, true).unwrap();
    }

    #[test]
    fn test_refuses_to_overwrite_input_through_alias() {
        let dir = TempDir::new().unwrap();
        let input = write_model(&dir);
        let original = std::fs::read(&input).unwrap();

        let dir_name = dir.path().file_name().unwrap();
        let alias = dir.path().join("..").join(dir_name).join("common.onnx");
        let args = quantize_args(&[
            "qdyn",
            "quantize",
            input.to_str().unwrap(),
            "-o",
            alias.to_str().unwrap(),
        ]);

        let err = quantize(&args, true).unwrap_err();
        assert!(matches!(err, QdynError::Configuration(_)));
        assert_eq!(std::fs::read(&input).unwrap(), original);
    }

    #[test]
    fn test_same_file_detection() {
        let dir = TempDir::new().unwrap();
        let input = write_model(&dir);
        assert!(is_same_file(&input, &input));
        assert!(is_same_file(&input, &dir.path().join(".").join("common.onnx")));
        assert!(!is_same_file(&input, &dir.path().join("common_q8.onnx")));
        assert!(!is_same_file(&input, &dir.path().join("missing").join("common.onnx")));
    }

    #[test]
    fn test_strict_error_check_passes_within_half_step() {
        let dir = TempDir::new().unwrap();
        let input = write_model(&dir);
        let config = dir.path().join("strict.toml");
        std::fs::write(&config, "[output]\nstrict_error_check = true\n").unwrap();

        let args = quantize_args(&[
            "qdyn",
            "quantize",
            input.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ]);
        quantize(&args, true).unwrap();
        assert!(dir.path().join("common_q8.onnx").exists());
    }

    #[test]
    fn test_strict_error_check_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = write_model(&dir);
        let config = dir.path().join("strict.toml");
        std::fs::write(
            &config,
            "[output]\nstrict_error_check = true\nmax_error_steps = 0.0\n",
        )
        .unwrap();

        let args = quantize_args(&[
            "qdyn",
            "quantize",
            input.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ]);
        let err = quantize(&args, true).unwrap_err();
        assert!(matches!(err, QdynError::ValidationFailed { .. }));
        assert!(!dir.path().join("common_q8.onnx").exists());
    }

    #[test]
    fn test_info_missing_file() {
        let args = InfoArgs {
            model: "missing.onnx".into(),
            json: false,
        };
        assert!(info(&args).is_err());
    }
}
