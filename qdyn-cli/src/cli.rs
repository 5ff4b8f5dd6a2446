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

//! Command line argument types

use clap::{Parser, Subcommand};
use qdyn_core::quantization::QuantType;
use std::path::PathBuf;

/// qdyn: dynamic 8-bit quantization for ONNX models
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "qdyn")]
#[command(version)]
#[command(about = "Dynamic 8-bit weight quantization for ONNX models")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Quantize the weights of an ONNX model
    Quantize(QuantizeArgs),

    /// Display information about an ONNX model
    Info(InfoArgs),

    /// Check an ONNX model for structural problems
    Validate(ValidateArgs),
}

/// Arguments for the quantize command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct QuantizeArgs {
    /// Path to the FP32 ONNX model
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output path (defaults to `<stem>_q8.onnx` next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Weight type: QUInt8 or QInt8
    #[arg(short, long, value_parser = parse_weight_type)]
    pub weight_type: Option<QuantType>,

    /// One scale and zero point per output channel
    #[arg(long)]
    pub per_channel: bool,

    /// Quantize weights to 7 bits
    #[arg(long)]
    pub reduce_range: bool,

    /// Operator types to quantize (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub op_types: Vec<String>,

    /// Only quantize these nodes (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Never quantize these nodes (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Named configuration preset
    #[arg(long, conflicts_with = "config")]
    pub preset: Option<String>,

    /// Write the quantization report as JSON
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Skip the graph check before writing
    #[arg(long)]
    pub no_validate: bool,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to the ONNX model
    #[arg(value_name = "MODEL")]
    pub model: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to the ONNX model
    #[arg(value_name = "MODEL")]
    pub model: PathBuf,
}

fn parse_weight_type(s: &str) -> Result<QuantType, String> {
    s.parse::<QuantType>().map_err(|e| e.to_string())
}

/// Parse command line arguments from an iterator
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantize_defaults() {
        let cli = parse_args(["qdyn", "quantize", "common.onnx"]).unwrap();
        match cli.command {
            Command::Quantize(args) => {
                assert_eq!(args.input, PathBuf::from("common.onnx"));
                assert_eq!(args.output, None);
                assert_eq!(args.weight_type, None);
                assert!(!args.per_channel);
                assert!(args.op_types.is_empty());
            }
            _ => panic!("Expected Quantize command"),
        }
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_quantize_options() {
        let cli = parse_args([
            "qdyn",
            "-vv",
            "quantize",
            "model.onnx",
            "-o",
            "out.onnx",
            "--weight-type",
            "qint8",
            "--per-channel",
            "--op-types",
            "MatMul,Gather",
            "--exclude",
            "head",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Quantize(args) => {
                assert_eq!(args.output, Some(PathBuf::from("out.onnx")));
                assert_eq!(args.weight_type, Some(QuantType::QInt8));
                assert!(args.per_channel);
                assert_eq!(args.op_types, vec!["MatMul", "Gather"]);
                assert_eq!(args.exclude, vec!["head"]);
            }
            _ => panic!("Expected Quantize command"),
        }
    }

    #[test]
    fn test_invalid_weight_type() {
        assert!(parse_args(["qdyn", "quantize", "m.onnx", "--weight-type", "int4"]).is_err());
    }

    #[test]
    fn test_config_and_preset_conflict() {
        let result = parse_args([
            "qdyn", "quantize", "m.onnx", "--config", "c.toml", "--preset", "int8",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_info_and_validate() {
        let cli = parse_args(["qdyn", "info", "m.onnx", "--json"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Info(InfoArgs {
                model: PathBuf::from("m.onnx"),
                json: true
            })
        );

        let cli = parse_args(["qdyn", "validate", "m.onnx"]).unwrap();
        assert!(matches!(cli.command, Command::Validate(_)));
    }
}
