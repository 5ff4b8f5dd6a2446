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

//! Basic integration tests for qdyn

use qdyn_core::{
    init,
    quantization::{registry, QuantType, QuantizationConfig, WeightQuantizer},
    Config, DynamicQuantizer, VERSION,
};

#[test]
fn test_library_initialization() {
    assert!(init().is_ok());
    assert!(!VERSION.is_empty());
}

#[test]
fn test_config_creation() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.output.suffix, "_q8");

    // Test preset configs
    for name in Config::preset_names() {
        let preset = Config::preset(name).unwrap();
        assert!(preset.validate().is_ok(), "preset {} should validate", name);
    }
    let int8 = Config::preset("int8").unwrap();
    assert_eq!(int8.quantization.weight_type, QuantType::QInt8);
}

#[test]
fn test_quantization_config() {
    let config = QuantizationConfig::default();
    assert_eq!(config.weight_type, QuantType::QUInt8);
    assert!(!config.is_symmetric());
    assert!(!config.per_channel);
    assert!(!config.reduce_range);

    let signed = QuantizationConfig::with_weight_type(QuantType::QInt8);
    assert!(signed.is_symmetric());
    assert_eq!(signed.weight_range().qmin, -127);
}

#[test]
fn test_supported_operators() {
    let ops = registry::supported_op_types();
    assert!(ops.contains(&"MatMul"));
    assert!(ops.contains(&"Conv"));
    assert!(ops.contains(&"Gather"));
    assert!(!ops.contains(&"LSTM"));
}

#[test]
fn test_quantizer_creation() {
    let quantizer = DynamicQuantizer::new(QuantizationConfig::default()).unwrap();
    assert_eq!(quantizer.config().weight_type, QuantType::QUInt8);

    let weights = WeightQuantizer::from_config(quantizer.config());
    assert_eq!(weights.range().qmax, 255);
}
