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

//! Operator eligibility for dynamic quantization

use super::QuantizationConfig;
use crate::onnx::{self, DataType, NodeProto, TensorProto};
use crate::tensor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How an operator type is dynamically quantized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSpec {
    pub op_type: &'static str,
    /// Input index holding the weight
    pub weight_input: usize,
    pub min_weight_rank: usize,
    pub max_weight_rank: Option<usize>,
    /// Weight axis used when per-channel quantization is enabled
    pub channel_axis: Option<usize>,
}

/// Operators with an integer or quantized-data rewrite
pub const DYNAMIC_OPS: &[OpSpec] = &[
    OpSpec {
        op_type: "MatMul",
        weight_input: 1,
        min_weight_rank: 2,
        max_weight_rank: Some(2),
        channel_axis: Some(1),
    },
    OpSpec {
        op_type: "Conv",
        weight_input: 1,
        min_weight_rank: 3,
        max_weight_rank: None,
        channel_axis: Some(0),
    },
    OpSpec {
        op_type: "Gather",
        weight_input: 0,
        min_weight_rank: 1,
        max_weight_rank: None,
        channel_axis: None,
    },
];

/// Spec for an operator type, if it can be quantized
pub fn lookup(op_type: &str) -> Option<&'static OpSpec> {
    DYNAMIC_OPS.iter().find(|spec| spec.op_type == op_type)
}

/// Names of all supported operator types
pub fn supported_op_types() -> Vec<&'static str> {
    DYNAMIC_OPS.iter().map(|spec| spec.op_type).collect()
}

/// Why a supported node was left in floating point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    OpTypeNotSelected,
    NodeNotSelected,
    Excluded,
    NonDefaultDomain(String),
    MissingWeightInput,
    WeightNotInitializer,
    WeightNotFloat(i32),
    UnsupportedWeightRank(usize),
    EmptyWeight,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpTypeNotSelected => write!(f, "operator type not selected"),
            Self::NodeNotSelected => write!(f, "node not in nodes_to_quantize"),
            Self::Excluded => write!(f, "node in nodes_to_exclude"),
            Self::NonDefaultDomain(domain) => write!(f, "operator domain '{}'", domain),
            Self::MissingWeightInput => write!(f, "weight input missing"),
            Self::WeightNotInitializer => write!(f, "weight is not a constant initializer"),
            Self::WeightNotFloat(dt) => write!(f, "weight data type {} is not FLOAT", dt),
            Self::UnsupportedWeightRank(rank) => write!(f, "weight rank {} not supported", rank),
            Self::EmptyWeight => write!(f, "weight has no elements"),
        }
    }
}

/// Classification outcome for one node
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Quantize(&'static OpSpec),
    Skip(SkipReason),
}

/// Decides which nodes of a graph are quantized
pub struct NodeClassifier<'a> {
    config: &'a QuantizationConfig,
    initializers: HashMap<&'a str, &'a TensorProto>,
}

impl<'a> NodeClassifier<'a> {
    pub fn new(config: &'a QuantizationConfig, initializers: &'a [TensorProto]) -> Self {
        Self {
            config,
            initializers: initializers
                .iter()
                .map(|t| (t.name.as_str(), t))
                .collect(),
        }
    }

    /// `None` for operator types that have no dynamic rewrite at all
    pub fn classify(&self, node: &NodeProto) -> Option<Decision> {
        let spec = lookup(&node.op_type)?;
        Some(match self.check(node, spec) {
            Ok(()) => Decision::Quantize(spec),
            Err(reason) => Decision::Skip(reason),
        })
    }

    fn check(&self, node: &NodeProto, spec: &OpSpec) -> std::result::Result<(), SkipReason> {
        if !onnx::is_default_domain(&node.domain) {
            return Err(SkipReason::NonDefaultDomain(node.domain.clone()));
        }
        if !self.config.op_types_to_quantize.is_empty()
            && !self
                .config
                .op_types_to_quantize
                .iter()
                .any(|op| op == &node.op_type)
        {
            return Err(SkipReason::OpTypeNotSelected);
        }
        if !self.config.nodes_to_quantize.is_empty()
            && !self.config.nodes_to_quantize.contains(&node.name)
        {
            return Err(SkipReason::NodeNotSelected);
        }
        if self.config.nodes_to_exclude.contains(&node.name) {
            return Err(SkipReason::Excluded);
        }

        let weight_name = node
            .input
            .get(spec.weight_input)
            .filter(|name| !name.is_empty())
            .ok_or(SkipReason::MissingWeightInput)?;
        let weight = self
            .initializers
            .get(weight_name.as_str())
            .ok_or(SkipReason::WeightNotInitializer)?;

        if tensor::data_type(weight) != Some(DataType::Float) {
            return Err(SkipReason::WeightNotFloat(weight.data_type));
        }

        let rank = weight.dims.len();
        if rank < spec.min_weight_rank || spec.max_weight_rank.is_some_and(|max| rank > max) {
            return Err(SkipReason::UnsupportedWeightRank(rank));
        }
        if tensor::element_count(&weight.dims).unwrap_or(0) == 0 {
            return Err(SkipReason::EmptyWeight);
        }

        Ok(())
    }
}
