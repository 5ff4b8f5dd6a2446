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

//! Model representation, loading and serialization

use crate::onnx::{self, proto::ModelProto, GraphProto, OperatorSetIdProto, TensorProto};
use crate::tensor;
use crate::{QdynError, Result};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Model formats recognised by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    Onnx,
}

impl ModelFormat {
    /// Detect format from file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            ext if ext.eq_ignore_ascii_case("onnx") => Some(Self::Onnx),
            _ => None,
        }
    }

    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
        }
    }
}

/// Graph input or output summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSummary {
    pub name: String,
    pub elem_type: i32,
    /// `None` entries are symbolic or unknown dimensions
    pub dims: Option<Vec<Option<i64>>>,
}

/// Model metadata and information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub format: ModelFormat,
    pub ir_version: i64,
    pub producer_name: String,
    pub producer_version: String,
    pub graph_name: String,
    pub opsets: Vec<(String, i64)>,
    pub inputs: Vec<ValueSummary>,
    pub outputs: Vec<ValueSummary>,
    pub node_count: usize,
    pub initializer_count: usize,
    pub operator_counts: BTreeMap<String, usize>,
    /// Elements held in FLOAT initializers
    pub parameter_count: usize,
    pub float_weight_bytes: usize,
    /// Bytes held in UINT8/INT8 initializers
    pub quantized_weight_bytes: usize,
    pub model_size_bytes: usize,
}

impl ModelInfo {
    /// Human readable multi-line summary
    pub fn summary(&self) -> String {
        let opsets = self
            .opsets
            .iter()
            .map(|(domain, version)| {
                let domain = if domain.is_empty() { "ai.onnx" } else { domain };
                format!("{}:{}", domain, version)
            })
            .collect::<Vec<_>>()
            .join(", ");
        let operators = self
            .operator_counts
            .iter()
            .map(|(op, count)| format!("{}x{}", op, count))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Model Summary:\n\
             - Producer: {} {}\n\
             - IR version: {}, opsets: {}\n\
             - Graph '{}': {} nodes, {} initializers\n\
             - Inputs: {}, outputs: {}\n\
             - Float parameters: {} ({:.2} MB)\n\
             - 8-bit weights: {:.2} MB\n\
             - File size: {:.2} MB\n\
             - Operators: {}",
            self.producer_name,
            self.producer_version,
            self.ir_version,
            opsets,
            self.graph_name,
            self.node_count,
            self.initializer_count,
            self.inputs.len(),
            self.outputs.len(),
            self.parameter_count,
            self.float_weight_bytes as f32 / (1024.0 * 1024.0),
            self.quantized_weight_bytes as f32 / (1024.0 * 1024.0),
            self.model_size_bytes as f32 / (1024.0 * 1024.0),
            operators
        )
    }
}

/// In-memory ONNX model
///
/// The graph is held apart from the model header so that it is always
/// present; construction fails for protobufs without a graph.
#[derive(Debug, Clone)]
pub struct Model {
    header: ModelProto,
    pub graph: GraphProto,
    size_bytes: usize,
}

impl Model {
    /// Load a model from file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ModelFormat::from_path(path).ok_or_else(|| QdynError::UnsupportedFormat {
            format: path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("unknown")
                .to_string(),
        })?;

        let bytes = std::fs::read(path)
            .map_err(|e| QdynError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let model = Self::from_bytes(&bytes)?;

        log::info!(
            "Loaded ONNX model {}: {} nodes, {} initializers, {:.2} MB",
            path.display(),
            model.graph.node.len(),
            model.graph.initializer.len(),
            bytes.len() as f32 / (1024.0 * 1024.0)
        );

        Ok(model)
    }

    /// Decode a model from protobuf bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let proto = ModelProto::decode(bytes)
            .map_err(|e| QdynError::ModelLoad(format!("invalid ONNX protobuf: {}", e)))?;
        let mut model = Self::from_proto(proto)?;
        model.size_bytes = bytes.len();
        Ok(model)
    }

    /// Wrap a decoded protobuf
    pub fn from_proto(mut proto: ModelProto) -> Result<Self> {
        let graph = proto
            .graph
            .take()
            .ok_or_else(|| QdynError::ModelLoad("ONNX model has no graph".to_string()))?;

        if let Some(external) = graph.initializer.iter().find(|t| tensor::is_external(t)) {
            return Err(QdynError::UnsupportedFormat {
                format: format!("external data for initializer '{}'", external.name),
            });
        }

        let mut model = Self {
            header: proto,
            graph,
            size_bytes: 0,
        };
        model.size_bytes = model.encoded_len();
        Ok(model)
    }

    /// Reassemble the full protobuf
    pub fn to_proto(&self) -> ModelProto {
        let mut proto = self.header.clone();
        proto.graph = Some(self.graph.clone());
        proto
    }

    /// Encode to protobuf bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Encoded size without materialising the bytes
    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + prost::encoding::message::encoded_len(7, &self.graph)
    }

    /// Write the model to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let bytes = self.to_bytes();
        std::fs::write(path, &bytes)?;
        log::info!(
            "Saved ONNX model {} ({:.2} MB)",
            path.display(),
            bytes.len() as f32 / (1024.0 * 1024.0)
        );
        Ok(bytes.len())
    }

    /// Size of the serialized form this model was read from (or would encode to)
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn ir_version(&self) -> i64 {
        self.header.ir_version
    }

    pub fn set_ir_version(&mut self, version: i64) {
        self.header.ir_version = version;
    }

    pub fn producer_name(&self) -> &str {
        &self.header.producer_name
    }

    /// Imported opset version for `domain`
    pub fn opset_version(&self, domain: &str) -> Option<i64> {
        self.header
            .opset_import
            .iter()
            .find(|o| same_domain(&o.domain, domain))
            .map(|o| o.version)
    }

    /// Set (or add) the imported opset version for `domain`
    pub fn set_opset_version(&mut self, domain: &str, version: i64) {
        match self
            .header
            .opset_import
            .iter_mut()
            .find(|o| same_domain(&o.domain, domain))
        {
            Some(opset) => opset.version = version,
            None => self.header.opset_import.push(OperatorSetIdProto {
                domain: domain.to_string(),
                version,
            }),
        }
    }

    /// Look up an initializer by name
    pub fn initializer(&self, name: &str) -> Option<&TensorProto> {
        self.graph.initializer.iter().find(|t| t.name == name)
    }

    /// Map from initializer name to its index in the graph
    pub fn initializer_index(&self) -> HashMap<String, usize> {
        self.graph
            .initializer
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect()
    }

    /// Number of references to each value: node inputs plus graph outputs
    pub fn consumer_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for name in self
            .graph
            .node
            .iter()
            .flat_map(|n| n.input.iter())
            .chain(self.graph.output.iter().map(|o| &o.name))
        {
            if !name.is_empty() {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Every value and node name currently in use in the main graph
    pub fn used_names(&self) -> HashSet<String> {
        let graph = &self.graph;
        graph
            .input
            .iter()
            .map(|v| v.name.clone())
            .chain(graph.output.iter().map(|v| v.name.clone()))
            .chain(graph.value_info.iter().map(|v| v.name.clone()))
            .chain(graph.initializer.iter().map(|t| t.name.clone()))
            .chain(graph.sparse_initializer_names().map(str::to_string))
            .chain(graph.node.iter().flat_map(|n| n.output.iter().cloned()))
            .chain(graph.node.iter().map(|n| n.name.clone()))
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Collect model information
    pub fn info(&self) -> ModelInfo {
        let mut operator_counts = BTreeMap::new();
        for node in &self.graph.node {
            *operator_counts.entry(node.op_type.clone()).or_insert(0) += 1;
        }

        let mut parameter_count = 0usize;
        let mut float_weight_bytes = 0usize;
        let mut quantized_weight_bytes = 0usize;
        for init in &self.graph.initializer {
            match tensor::data_type(init) {
                Some(onnx::DataType::Float) => {
                    parameter_count = parameter_count
                        .saturating_add(tensor::element_count(&init.dims).unwrap_or(0));
                    float_weight_bytes =
                        float_weight_bytes.saturating_add(tensor::payload_bytes(init));
                }
                Some(onnx::DataType::Uint8) | Some(onnx::DataType::Int8) => {
                    quantized_weight_bytes =
                        quantized_weight_bytes.saturating_add(tensor::payload_bytes(init));
                }
                _ => {}
            }
        }

        let summarize = |v: &onnx::ValueInfoProto| ValueSummary {
            name: v.name.clone(),
            elem_type: match v.r#type.as_ref().and_then(|t| t.value.as_ref()) {
                Some(onnx::proto::type_proto::Value::TensorType(t)) => t.elem_type,
                _ => 0,
            },
            dims: onnx::value_info_dims(v),
        };

        ModelInfo {
            format: ModelFormat::Onnx,
            ir_version: self.header.ir_version,
            producer_name: self.header.producer_name.clone(),
            producer_version: self.header.producer_version.clone(),
            graph_name: self.graph.name.clone(),
            opsets: self
                .header
                .opset_import
                .iter()
                .map(|o| (o.domain.clone(), o.version))
                .collect(),
            inputs: self.graph.input.iter().map(summarize).collect(),
            outputs: self.graph.output.iter().map(summarize).collect(),
            node_count: self.graph.node.len(),
            initializer_count: self.graph.initializer.len(),
            operator_counts,
            parameter_count,
            float_weight_bytes,
            quantized_weight_bytes,
            model_size_bytes: self.size_bytes,
        }
    }

    /// Recompute the serialized size after the graph was rewritten
    pub(crate) fn refresh_size(&mut self) {
        self.size_bytes = self.encoded_len();
    }
}

fn same_domain(a: &str, b: &str) -> bool {
    a == b || (onnx::is_default_domain(a) && onnx::is_default_domain(b))
}

/// Generates value and node names that do not collide with existing ones
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    used: HashSet<String>,
}

impl NameGenerator {
    pub fn new(used: HashSet<String>) -> Self {
        Self { used }
    }

    /// Return `base` if free, otherwise `base_1`, `base_2`, ...
    pub fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 1;
        while self.used.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}
