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

//! Dynamic quantization pipeline
//!
//! Classifies nodes, quantizes the weights of eligible ones, rewrites the
//! graph around integer operators and prunes the float weights that are
//! no longer referenced.

use super::operators::{rewriter_for, RewriteContext};
use super::quantizer::{QuantizedTensor, ReconstructionError, WeightQuantizer};
use super::registry::{Decision, NodeClassifier, OpSpec, SkipReason};
use super::{QuantType, QuantizationConfig};
use crate::model::{Model, NameGenerator};
use crate::onnx::{self, GraphProto, TensorProto};
use crate::validation::GraphValidator;
use crate::{QdynError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Lowest default-domain opset providing `DynamicQuantizeLinear`
pub const MIN_OPSET_VERSION: i64 = 11;

/// IR version required alongside [`MIN_OPSET_VERSION`]
pub const MIN_IR_VERSION: i64 = 7;

/// Per-weight entry of a [`QuantizationReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightReport {
    pub name: String,
    pub dims: Vec<i64>,
    pub axis: Option<usize>,
    pub scales: Vec<f32>,
    pub zero_points: Vec<i32>,
    pub error: ReconstructionError,
}

/// A supported node left in floating point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedNode {
    pub name: String,
    pub op_type: String,
    pub reason: SkipReason,
}

/// Outcome of one quantization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizationReport {
    pub weight_type: QuantType,
    pub per_channel: bool,
    pub reduce_range: bool,
    pub original_size: usize,
    pub quantized_size: usize,
    /// Quantized size over original size
    pub compression_ratio: f32,
    pub quantized_nodes: BTreeMap<String, usize>,
    pub weights: Vec<WeightReport>,
    pub skipped_nodes: Vec<SkippedNode>,
    pub removed_initializers: Vec<String>,
    pub mean_reconstruction_error: f32,
    pub max_reconstruction_error: f32,
    pub opset_version: i64,
    pub quantization_time_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl QuantizationReport {
    /// Total number of rewritten nodes
    pub fn nodes_quantized(&self) -> usize {
        self.quantized_nodes.values().sum()
    }

    /// Replace the estimated output size with the size actually written
    pub fn record_saved_size(&mut self, bytes: usize) {
        self.quantized_size = bytes;
        if self.original_size > 0 {
            self.compression_ratio = bytes as f32 / self.original_size as f32;
        }
    }

    /// Generate quantization summary
    pub fn summary(&self) -> String {
        let ops = self
            .quantized_nodes
            .iter()
            .map(|(op, count)| format!("{}x{}", op, count))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Quantization Summary:\n\
             - Weight type: {}{}{}\n\
             - Size: {:.2} MB -> {:.2} MB ({:.1}% of original)\n\
             - Nodes quantized: {} [{}]\n\
             - Nodes skipped: {}\n\
             - Weights quantized: {}\n\
             - Reconstruction error: mean {:.3e}, max {:.3e}\n\
             - Opset: {}\n\
             - Quantization time: {} ms",
            self.weight_type,
            if self.per_channel { ", per-channel" } else { "" },
            if self.reduce_range { ", reduced range" } else { "" },
            self.original_size as f32 / (1024.0 * 1024.0),
            self.quantized_size as f32 / (1024.0 * 1024.0),
            self.compression_ratio * 100.0,
            self.nodes_quantized(),
            ops,
            self.skipped_nodes.len(),
            self.weights.len(),
            self.mean_reconstruction_error,
            self.max_reconstruction_error,
            self.opset_version,
            self.quantization_time_ms
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// A node selected for rewriting and the weight it reads
struct PlannedNode {
    index: usize,
    spec: &'static OpSpec,
    weight: String,
}

/// Dynamic quantizer for ONNX models
pub struct DynamicQuantizer {
    config: QuantizationConfig,
    quantizer: WeightQuantizer,
    validate: bool,
}

impl DynamicQuantizer {
    /// Create a quantizer, rejecting invalid configurations
    pub fn new(config: QuantizationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            quantizer: WeightQuantizer::from_config(&config),
            config,
            validate: true,
        })
    }

    /// Toggle the graph check run on every rewritten model
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn config(&self) -> &QuantizationConfig {
        &self.config
    }

    /// Quantize `model`, returning the rewritten copy and a report
    pub fn quantize_model(&self, model: &Model) -> Result<(Model, QuantizationReport)> {
        let start_time = std::time::Instant::now();
        log::info!(
            "Starting dynamic quantization ({}{}{}) for model with {} nodes",
            self.config.weight_type,
            if self.config.per_channel { ", per-channel" } else { "" },
            if self.config.reduce_range { ", reduce_range" } else { "" },
            model.graph.node.len()
        );

        let (plan, skipped_nodes) = self.plan(model);
        let axes = self.weight_axes(&plan);

        let initializers = model.initializer_index();
        let mut requests = Vec::with_capacity(axes.len());
        for (name, axis) in &axes {
            let index = initializers.get(name).ok_or_else(|| {
                QdynError::Internal(format!("initializer '{}' disappeared", name))
            })?;
            requests.push((&model.graph.initializer[*index], *axis));
        }
        let quantized = self.quantizer.quantize_all(&requests)?;

        let weights: Vec<WeightReport> = quantized
            .iter()
            .map(|(q, error)| WeightReport {
                name: q.name.clone(),
                dims: q.dims.clone(),
                axis: q.axis,
                scales: q.scales(),
                zero_points: q.zero_points(),
                error: *error,
            })
            .collect();
        let tensors: HashMap<String, QuantizedTensor> = quantized
            .into_iter()
            .map(|(q, _)| (q.name.clone(), q))
            .collect();

        let mut output = model.clone();
        let mut quantized_nodes = BTreeMap::new();
        let removed_initializers = if plan.is_empty() {
            log::info!("No eligible nodes found; model left unchanged");
            Vec::new()
        } else {
            let nodes = std::mem::take(&mut output.graph.node);
            let mut ctx = RewriteContext::new(
                NameGenerator::new(model.used_names()),
                &output.graph.initializer,
                tensors,
            );

            let mut rewritten = Vec::with_capacity(nodes.len() + plan.len() * 4);
            let mut plan = plan.iter().peekable();
            for (index, node) in nodes.into_iter().enumerate() {
                match plan.next_if(|p| p.index == index) {
                    Some(planned) => {
                        let rewrite = rewriter_for(planned.spec.op_type).ok_or_else(|| {
                            QdynError::quantization(format!(
                                "no rewrite registered for {}",
                                planned.spec.op_type
                            ))
                        })?;
                        log::debug!(
                            "Quantizing {} node '{}' (weight '{}')",
                            node.op_type,
                            node.display_name(),
                            planned.weight
                        );
                        rewritten.extend(rewrite.rewrite(&node, &mut ctx)?);
                        *quantized_nodes.entry(node.op_type.clone()).or_insert(0) += 1;
                    }
                    None => rewritten.push(node),
                }
            }

            let added = ctx.into_initializers();
            output.graph.node = rewritten;
            output.graph.initializer.extend(added);

            let removed = remove_unused_initializers(model, &mut output.graph);
            self.raise_opset(&mut output);
            removed
        };
        output.refresh_size();

        if self.validate {
            GraphValidator::new().ensure_valid(&output)?;
        }

        let (mean_error, max_error) = error_totals(&weights);
        let original_size = model.size_bytes();
        let quantized_size = output.size_bytes();
        let report = QuantizationReport {
            weight_type: self.config.weight_type,
            per_channel: self.config.per_channel,
            reduce_range: self.config.reduce_range,
            original_size,
            quantized_size,
            compression_ratio: if original_size == 0 {
                1.0
            } else {
                quantized_size as f32 / original_size as f32
            },
            quantized_nodes,
            weights,
            skipped_nodes,
            removed_initializers,
            mean_reconstruction_error: mean_error,
            max_reconstruction_error: max_error,
            opset_version: output
                .opset_version(onnx::DEFAULT_DOMAIN)
                .unwrap_or_default(),
            quantization_time_ms: start_time.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        };

        log::info!(
            "Quantized {} nodes and {} weights: {} -> {} bytes",
            report.nodes_quantized(),
            report.weights.len(),
            report.original_size,
            report.quantized_size
        );

        Ok((output, report))
    }

    /// Quantize the model at `input` and write the result to `output`
    pub fn quantize_file<P1, P2>(&self, input: P1, output: P2) -> Result<QuantizationReport>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        let model = Model::load(input)?;
        let (quantized, mut report) = self.quantize_model(&model)?;
        report.record_saved_size(quantized.save(output)?);
        Ok(report)
    }

    fn plan(&self, model: &Model) -> (Vec<PlannedNode>, Vec<SkippedNode>) {
        let classifier = NodeClassifier::new(&self.config, &model.graph.initializer);
        let mut plan = Vec::new();
        let mut skipped = Vec::new();

        for (index, node) in model.graph.node.iter().enumerate() {
            match classifier.classify(node) {
                Some(Decision::Quantize(spec)) => plan.push(PlannedNode {
                    index,
                    spec,
                    weight: node.input[spec.weight_input].clone(),
                }),
                Some(Decision::Skip(reason)) => {
                    log::debug!(
                        "Skipping {} node '{}': {}",
                        node.op_type,
                        node.display_name(),
                        reason
                    );
                    skipped.push(SkippedNode {
                        name: node.display_name(),
                        op_type: node.op_type.clone(),
                        reason,
                    });
                }
                None => {}
            }
        }

        (plan, skipped)
    }

    /// Quantization axis per weight; disagreeing consumers force per-tensor
    fn weight_axes(&self, plan: &[PlannedNode]) -> BTreeMap<String, Option<usize>> {
        let mut axes: BTreeMap<String, Option<usize>> = BTreeMap::new();
        for planned in plan {
            let axis = if self.config.per_channel {
                planned.spec.channel_axis
            } else {
                None
            };
            match axes.get(&planned.weight).copied() {
                None => {
                    axes.insert(planned.weight.clone(), axis);
                }
                Some(existing) if existing != axis => {
                    log::warn!(
                        "Weight '{}' is shared by operators needing different channel axes; using per-tensor quantization",
                        planned.weight
                    );
                    axes.insert(planned.weight.clone(), None);
                }
                Some(_) => {}
            }
        }
        axes
    }

    fn raise_opset(&self, model: &mut Model) {
        let current = model.opset_version(onnx::DEFAULT_DOMAIN);
        if current.map_or(true, |v| v < MIN_OPSET_VERSION) {
            log::warn!(
                "Raising default opset from {} to {} for DynamicQuantizeLinear",
                current.map_or_else(|| "none".to_string(), |v| v.to_string()),
                MIN_OPSET_VERSION
            );
            model.set_opset_version(onnx::DEFAULT_DOMAIN, MIN_OPSET_VERSION);
            if model.ir_version() < MIN_IR_VERSION {
                model.set_ir_version(MIN_IR_VERSION);
            }
        }
    }
}

/// Drop initializers that were referenced before the rewrite but no longer are
fn remove_unused_initializers(original: &Model, graph: &mut GraphProto) -> Vec<String> {
    let before = referenced_names(&original.graph);
    let after = referenced_names(graph);

    let removed: Vec<String> = graph
        .initializer
        .iter()
        .filter(|t| before.contains(&t.name) && !after.contains(&t.name))
        .map(|t| t.name.clone())
        .collect();
    if removed.is_empty() {
        return removed;
    }

    let dropped: HashSet<&str> = removed.iter().map(String::as_str).collect();
    graph
        .initializer
        .retain(|t: &TensorProto| !dropped.contains(t.name.as_str()));
    graph.input.retain(|i| !dropped.contains(i.name.as_str()));

    log::debug!("Removed {} unused float initializers", removed.len());
    removed
}

/// Names read by nodes (subgraphs included) or exposed as graph outputs
fn referenced_names(graph: &GraphProto) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_references(graph, &mut names);
    names.extend(graph.output.iter().map(|o| o.name.clone()));
    names
}

fn collect_references(graph: &GraphProto, names: &mut HashSet<String>) {
    for node in &graph.node {
        names.extend(node.input.iter().filter(|n| !n.is_empty()).cloned());
        for attr in &node.attribute {
            if let Some(g) = &attr.g {
                collect_references(g, names);
            }
            for g in &attr.graphs {
                collect_references(g, names);
            }
        }
    }
}

fn error_totals(weights: &[WeightReport]) -> (f32, f32) {
    if weights.is_empty() {
        return (0.0, 0.0);
    }
    let mean = weights.iter().map(|w| w.error.mean_abs).sum::<f32>() / weights.len() as f32;
    let max = weights
        .iter()
        .map(|w| w.error.max_abs)
        .fold(0.0f32, f32::max);
    (mean, max)
}

/// Quantize `model_input` to 8-bit weights and write `model_output`
///
/// Uses the defaults for everything but the weight type: per-tensor
/// parameters, full 8-bit range, every supported operator.
pub fn quantize_dynamic<P1, P2>(
    model_input: P1,
    model_output: P2,
    weight_type: QuantType,
) -> Result<QuantizationReport>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
{
    DynamicQuantizer::new(QuantizationConfig::with_weight_type(weight_type))?
        .quantize_file(model_input, model_output)
}
