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

//! Validation of quantized models
//!
//! Structural checks on the rewritten graph, weight reconstruction error
//! bounds, and (with the `onnx` feature) a load check through ONNX Runtime.

use crate::model::Model;
use crate::quantization::dynamic::WeightReport;
use crate::{QdynError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration for model validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest acceptable reconstruction error, in quantization steps
    pub max_error_steps: f32,
    /// Slack added to `max_error_steps` for float rounding
    pub tolerance: f32,
    /// Require every graph output to be produced
    pub require_outputs: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_error_steps: 0.5,
            tolerance: 1e-3,
            require_outputs: true,
        }
    }
}

/// Structural validation results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphValidationResult {
    pub node_count: usize,
    pub initializer_count: usize,
    /// One message per problem found
    pub issues: Vec<String>,
}

impl GraphValidationResult {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Checks quantized graphs for well-formedness
#[derive(Debug, Clone, Default)]
pub struct GraphValidator {
    config: ValidationConfig,
}

impl GraphValidator {
    /// Create new validator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create validator with custom configuration
    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Check that values are defined before use and produced once
    ///
    /// Nodes inside subgraphs may read outer-scope values and are not
    /// inspected.
    pub fn validate(&self, model: &Model) -> GraphValidationResult {
        let graph = &model.graph;
        let mut result = GraphValidationResult {
            node_count: graph.node.len(),
            initializer_count: graph.initializer.len(),
            issues: Vec::new(),
        };

        let mut defined: HashSet<&str> = graph
            .input
            .iter()
            .map(|i| i.name.as_str())
            .chain(graph.initializer.iter().map(|t| t.name.as_str()))
            .chain(graph.sparse_initializer_names())
            .collect();

        let mut seen_initializers = HashSet::new();
        for init in &graph.initializer {
            if !seen_initializers.insert(init.name.as_str()) {
                result
                    .issues
                    .push(format!("initializer '{}' defined twice", init.name));
            }
        }

        for node in &graph.node {
            for input in node.input.iter().filter(|i| !i.is_empty()) {
                if !defined.contains(input.as_str()) {
                    result.issues.push(format!(
                        "{} node '{}' reads '{}' before it is defined",
                        node.op_type,
                        node.display_name(),
                        input
                    ));
                }
            }
            for output in node.output.iter().filter(|o| !o.is_empty()) {
                if !defined.insert(output.as_str()) {
                    result.issues.push(format!(
                        "value '{}' produced more than once (by {} node '{}')",
                        output,
                        node.op_type,
                        node.display_name()
                    ));
                }
            }
        }

        if self.config.require_outputs {
            for output in &graph.output {
                if !defined.contains(output.name.as_str()) {
                    result
                        .issues
                        .push(format!("graph output '{}' is never produced", output.name));
                }
            }
        }

        result
    }

    /// Like [`GraphValidator::validate`], failing on the first report with issues
    pub fn ensure_valid(&self, model: &Model) -> Result<()> {
        let result = self.validate(model);
        if result.passed() {
            log::debug!(
                "Graph validation passed: {} nodes, {} initializers",
                result.node_count,
                result.initializer_count
            );
            return Ok(());
        }

        for issue in &result.issues {
            log::error!("Graph validation: {}", issue);
        }
        Err(QdynError::ValidationFailed {
            message: format!(
                "{} issue(s), first: {}",
                result.issues.len(),
                result.issues[0]
            ),
        })
    }

    /// Check that every weight reconstructs within the configured bound
    pub fn check_reconstruction(&self, weights: &[WeightReport]) -> Result<()> {
        let limit = self.config.max_error_steps + self.config.tolerance;
        let offenders: Vec<&WeightReport> = weights
            .iter()
            .filter(|w| w.error.max_steps > limit)
            .collect();

        if offenders.is_empty() {
            return Ok(());
        }
        for w in &offenders {
            log::warn!(
                "Weight '{}' reconstruction error {:.3e} is {:.2} steps (limit {:.2})",
                w.name,
                w.error.max_abs,
                w.error.max_steps,
                limit
            );
        }
        Err(QdynError::ValidationFailed {
            message: format!(
                "{} weight(s) exceed {:.2} quantization steps of error",
                offenders.len(),
                limit
            ),
        })
    }

    /// Load the model file into an ONNX Runtime session
    #[cfg(feature = "onnx")]
    pub fn check_loadable<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let session = ort::session::Session::builder()?.commit_from_file(path)?;
        log::info!(
            "ONNX Runtime loaded {} ({} inputs, {} outputs)",
            path.display(),
            session.inputs.len(),
            session.outputs.len()
        );
        Ok(())
    }
}
