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

//! Dynamic weight quantization
//!
//! Weights of eligible operators are converted to 8-bit integers ahead of
//! time; activations are quantized at inference time by
//! `DynamicQuantizeLinear` nodes inserted into the graph.

pub mod dynamic;
pub mod operators;
pub mod params;
pub mod quantizer;
pub mod registry;
pub mod stats;

pub use dynamic::{
    quantize_dynamic, DynamicQuantizer, QuantizationReport, SkippedNode, WeightReport,
};
pub use operators::{rewriter_for, OperatorRewrite, RewriteContext};
pub use params::{QuantRange, QuantizationParam};
pub use quantizer::{QuantizedTensor, ReconstructionError, WeightQuantizer};
pub use registry::{Decision, NodeClassifier, OpSpec, SkipReason};
pub use stats::WeightStats;

use crate::onnx::DataType;
use crate::{QdynError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 8-bit weight types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuantType {
    /// Unsigned 8-bit, range [0, 255]
    #[default]
    QUInt8,
    /// Signed 8-bit, range [-128, 127]
    QInt8,
}

impl QuantType {
    /// ONNX element type of quantized tensors
    pub fn data_type(&self) -> DataType {
        match self {
            Self::QUInt8 => DataType::Uint8,
            Self::QInt8 => DataType::Int8,
        }
    }

    /// Symmetric quantization is the default for signed weights only
    pub fn default_symmetric(&self) -> bool {
        matches!(self, Self::QInt8)
    }

    /// Integer range for this type
    pub fn range(&self, symmetric: bool, reduce_range: bool) -> QuantRange {
        let (qmin, qmax) = match (self, symmetric, reduce_range) {
            (Self::QUInt8, _, false) => (0, 255),
            (Self::QUInt8, _, true) => (0, 127),
            (Self::QInt8, _, true) => (-64, 64),
            (Self::QInt8, true, false) => (-127, 127),
            (Self::QInt8, false, false) => (-128, 127),
        };
        QuantRange { qmin, qmax }
    }

    /// Store a clamped integer as its 8-bit two's complement byte
    pub(crate) fn to_byte(self, q: i32) -> u8 {
        match self {
            Self::QUInt8 => q as u8,
            Self::QInt8 => q as i8 as u8,
        }
    }

    /// Inverse of [`QuantType::to_byte`]
    pub(crate) fn from_byte(self, b: u8) -> i32 {
        match self {
            Self::QUInt8 => b as i32,
            Self::QInt8 => b as i8 as i32,
        }
    }
}

impl fmt::Display for QuantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QUInt8 => write!(f, "QUInt8"),
            Self::QInt8 => write!(f, "QInt8"),
        }
    }
}

impl FromStr for QuantType {
    type Err = QdynError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "quint8" | "uint8" | "u8" => Ok(Self::QUInt8),
            "qint8" | "int8" | "s8" | "i8" => Ok(Self::QInt8),
            _ => Err(QdynError::Configuration(format!(
                "unknown weight type '{}' (expected QUInt8 or QInt8)",
                s
            ))),
        }
    }
}

/// Configuration for dynamic quantization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    pub weight_type: QuantType,
    /// One scale/zero point per output channel (Conv) or column (MatMul)
    pub per_channel: bool,
    /// Use 7-bit weight ranges
    pub reduce_range: bool,
    /// Override the weight type's default symmetry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symmetric: Option<bool>,
    /// Operator types to quantize; empty means every supported type
    pub op_types_to_quantize: Vec<String>,
    /// Node names to quantize; empty means every eligible node
    pub nodes_to_quantize: Vec<String>,
    /// Node names never quantized
    pub nodes_to_exclude: Vec<String>,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            weight_type: QuantType::QUInt8,
            per_channel: false,
            reduce_range: false,
            symmetric: None,
            op_types_to_quantize: Vec::new(),
            nodes_to_quantize: Vec::new(),
            nodes_to_exclude: Vec::new(),
        }
    }
}

impl QuantizationConfig {
    /// Configuration for a given weight type with all other options defaulted
    pub fn with_weight_type(weight_type: QuantType) -> Self {
        Self {
            weight_type,
            ..Default::default()
        }
    }

    /// Whether weights are quantized symmetrically
    pub fn is_symmetric(&self) -> bool {
        self.symmetric
            .unwrap_or_else(|| self.weight_type.default_symmetric())
    }

    /// Integer range used for weights
    pub fn weight_range(&self) -> QuantRange {
        self.weight_type
            .range(self.is_symmetric(), self.reduce_range)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        for op_type in &self.op_types_to_quantize {
            if registry::lookup(op_type).is_none() {
                return Err(QdynError::Configuration(format!(
                    "operator '{}' cannot be dynamically quantized (supported: {})",
                    op_type,
                    registry::supported_op_types().join(", ")
                )));
            }
        }

        if let Some(name) = self
            .nodes_to_quantize
            .iter()
            .find(|n| self.nodes_to_exclude.contains(n))
        {
            return Err(QdynError::Configuration(format!(
                "node '{}' is both selected and excluded",
                name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_config_default() {
        let config = QuantizationConfig::default();
        assert_eq!(config.weight_type, QuantType::QUInt8);
        assert!(!config.is_symmetric());
        assert!(!config.per_channel);
        assert_eq!(config.weight_range(), QuantRange { qmin: 0, qmax: 255 });
    }

    #[test]
    fn test_int8_is_symmetric_by_default() {
        let config = QuantizationConfig::with_weight_type(QuantType::QInt8);
        assert!(config.is_symmetric());
        assert_eq!(config.weight_range(), QuantRange { qmin: -127, qmax: 127 });
    }

    #[test]
    fn test_reduced_ranges() {
        assert_eq!(
            QuantType::QUInt8.range(false, true),
            QuantRange { qmin: 0, qmax: 127 }
        );
        assert_eq!(
            QuantType::QInt8.range(true, true),
            QuantRange { qmin: -64, qmax: 64 }
        );
        assert_eq!(
            QuantType::QInt8.range(false, false),
            QuantRange { qmin: -128, qmax: 127 }
        );
    }

    #[test]
    fn test_quant_type_parsing() {
        assert_eq!("QUInt8".parse::<QuantType>().unwrap(), QuantType::QUInt8);
        assert_eq!("int8".parse::<QuantType>().unwrap(), QuantType::QInt8);
        assert!("int4".parse::<QuantType>().is_err());
        assert_eq!(QuantType::QInt8.to_string(), "QInt8");
    }

    #[test]
    fn test_byte_encoding() {
        assert_eq!(QuantType::QInt8.to_byte(-1), 0xFF);
        assert_eq!(QuantType::QInt8.from_byte(0xFF), -1);
        assert_eq!(QuantType::QUInt8.from_byte(0xFF), 255);
    }

    #[test]
    fn test_validate_rejects_unknown_op_type() {
        let config = QuantizationConfig {
            op_types_to_quantize: vec!["LSTM".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(QdynError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_conflicting_node_lists() {
        let config = QuantizationConfig {
            nodes_to_quantize: vec!["fc".to_string()],
            nodes_to_exclude: vec!["fc".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
