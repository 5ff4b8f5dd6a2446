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

//! Graph rewrites that replace float operators with integer ones
//!
//! Every rewrite consumes the original node and returns the nodes that
//! replace it. The last node of each replacement writes the original
//! output name, so downstream consumers are untouched.

use super::quantizer::QuantizedTensor;
use crate::model::NameGenerator;
use crate::onnx::{self, DataType, NodeProto, TensorProto};
use crate::{tensor, QdynError, Result};
use std::collections::HashMap;

/// Initializer names holding one quantized weight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightNames {
    pub quantized: String,
    pub scale: String,
    pub zero_point: String,
}

/// Outputs of the `DynamicQuantizeLinear` node for one activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicInput {
    pub quantized: String,
    pub scale: String,
    pub zero_point: String,
}

/// Shared state while rewriting one graph
pub struct RewriteContext<'a> {
    names: NameGenerator,
    float_initializers: HashMap<&'a str, &'a TensorProto>,
    weights: HashMap<String, QuantizedTensor>,
    emitted_weights: HashMap<String, WeightNames>,
    dynamic_inputs: HashMap<String, DynamicInput>,
    reshaped: HashMap<String, String>,
    initializers: Vec<TensorProto>,
}

impl<'a> RewriteContext<'a> {
    pub fn new(
        names: NameGenerator,
        float_initializers: &'a [TensorProto],
        weights: HashMap<String, QuantizedTensor>,
    ) -> Self {
        Self {
            names,
            float_initializers: float_initializers
                .iter()
                .map(|t| (t.name.as_str(), t))
                .collect(),
            weights,
            emitted_weights: HashMap::new(),
            dynamic_inputs: HashMap::new(),
            reshaped: HashMap::new(),
            initializers: Vec::new(),
        }
    }

    /// Reserve a name derived from `base`
    pub fn fresh_name(&mut self, base: &str) -> String {
        self.names.fresh(base)
    }

    /// Initializers created so far, in creation order
    pub fn initializers(&self) -> &[TensorProto] {
        &self.initializers
    }

    pub fn into_initializers(self) -> Vec<TensorProto> {
        self.initializers
    }

    /// Quantized weight initializers for `name`, emitted on first use
    pub fn weight(&mut self, name: &str) -> Result<WeightNames> {
        if let Some(names) = self.emitted_weights.get(name) {
            return Ok(names.clone());
        }

        let quantized = self.weights.get(name).ok_or_else(|| {
            QdynError::Internal(format!("weight '{}' was not quantized", name))
        })?;
        let (scale_dims, zero_point_dims) = parameter_dims(quantized);
        let data_type = quantized.qtype.data_type();

        let names = WeightNames {
            quantized: self.names.fresh(&format!("{}_quantized", name)),
            scale: self.names.fresh(&format!("{}_scale", name)),
            zero_point: self.names.fresh(&format!("{}_zero_point", name)),
        };
        self.initializers.push(tensor::from_8bit(
            &names.quantized,
            &quantized.dims,
            data_type,
            quantized.data.clone(),
        ));
        self.initializers.push(tensor::from_f32(
            &names.scale,
            &scale_dims,
            &quantized.scales(),
        ));
        self.initializers.push(tensor::from_8bit(
            &names.zero_point,
            &zero_point_dims,
            data_type,
            quantized.zero_point_bytes(),
        ));

        self.emitted_weights.insert(name.to_string(), names.clone());
        Ok(names)
    }

    /// Quantized form of activation `input`, pushing a
    /// `DynamicQuantizeLinear` node onto `nodes` the first time it is needed
    pub fn dynamic_input(&mut self, input: &str, nodes: &mut Vec<NodeProto>) -> DynamicInput {
        if let Some(existing) = self.dynamic_inputs.get(input) {
            return existing.clone();
        }

        let outputs = DynamicInput {
            quantized: self.names.fresh(&format!("{}_quantized", input)),
            scale: self.names.fresh(&format!("{}_scale", input)),
            zero_point: self.names.fresh(&format!("{}_zero_point", input)),
        };
        let node_name = self.names.fresh(&format!("{}_QuantizeLinear", input));
        nodes.push(onnx::make_node(
            "DynamicQuantizeLinear",
            &[input],
            &[&outputs.quantized, &outputs.scale, &outputs.zero_point],
            &node_name,
            vec![],
        ));

        self.dynamic_inputs
            .insert(input.to_string(), outputs.clone());
        outputs
    }

    /// `bias` reshaped to `[C, 1, ..., 1]` with `rank` dimensions
    fn channel_broadcast(&mut self, bias: &str, rank: usize, nodes: &mut Vec<NodeProto>) -> Result<String> {
        let key = format!("{}:{}", bias, rank);
        if let Some(name) = self.reshaped.get(&key) {
            return Ok(name.clone());
        }

        let mut dims = vec![1i64; rank.max(1)];
        let reshaped = match self.float_initializers.get(bias).copied() {
            Some(init) if tensor::data_type(init) == Some(DataType::Float) => {
                let values = tensor::to_f32(init)?;
                dims[0] = values.len() as i64;
                let name = self.names.fresh(&format!("{}_reshaped", bias));
                self.initializers
                    .push(tensor::from_f32(&name, &dims, &values));
                name
            }
            _ => {
                dims[0] = -1;
                let shape = self.names.fresh(&format!("{}_reshape_shape", bias));
                self.initializers.push(tensor::from_i64(&shape, &[dims.len() as i64], &dims));
                let name = self.names.fresh(&format!("{}_reshaped", bias));
                let node_name = self.names.fresh(&format!("{}_Reshape", bias));
                nodes.push(onnx::make_node(
                    "Reshape",
                    &[bias, &shape],
                    &[&name],
                    &node_name,
                    vec![],
                ));
                name
            }
        };

        self.reshaped.insert(key, reshaped.clone());
        Ok(reshaped)
    }
}

/// Shapes of the scale and zero point initializers for a quantized weight
///
/// Conv output channels broadcast against `[N, C, spatial...]`, so their
/// scales carry trailing unit dimensions. Zero points stay 1-D.
fn parameter_dims(quantized: &QuantizedTensor) -> (Vec<i64>, Vec<i64>) {
    match quantized.axis {
        None => (vec![], vec![]),
        Some(axis) => {
            let channels = quantized.dims[axis];
            let rank = quantized.dims.len();
            if axis == 0 && rank >= 3 {
                let mut scale_dims = vec![1i64; rank - 1];
                scale_dims[0] = channels;
                (scale_dims, vec![channels])
            } else {
                (vec![channels], vec![channels])
            }
        }
    }
}

/// Replacement of one float operator by its quantized form
pub trait OperatorRewrite: Send + Sync {
    /// Operator type this rewrite handles
    fn op_type(&self) -> &'static str;

    /// Nodes replacing `node`, in topological order
    fn rewrite(&self, node: &NodeProto, ctx: &mut RewriteContext<'_>) -> Result<Vec<NodeProto>>;
}

/// Rewrite for an operator type, if one exists
pub fn rewriter_for(op_type: &str) -> Option<&'static dyn OperatorRewrite> {
    static MATMUL: MatMulRewrite = MatMulRewrite;
    static CONV: ConvRewrite = ConvRewrite;
    static GATHER: GatherRewrite = GatherRewrite;

    match op_type {
        "MatMul" => Some(&MATMUL),
        "Conv" => Some(&CONV),
        "Gather" => Some(&GATHER),
        _ => None,
    }
}

fn input<'n>(node: &'n NodeProto, index: usize) -> Result<&'n str> {
    node.input
        .get(index)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            QdynError::invalid_model(format!(
                "{} node '{}' is missing input {}",
                node.op_type,
                node.display_name(),
                index
            ))
        })
}

fn output(node: &NodeProto) -> Result<&str> {
    node.output
        .first()
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            QdynError::invalid_model(format!(
                "{} node '{}' has no output",
                node.op_type,
                node.display_name()
            ))
        })
}

fn base_name(node: &NodeProto, output: &str) -> String {
    if node.name.is_empty() {
        output.to_string()
    } else {
        node.name.clone()
    }
}

/// Integer operator followed by rescaling back to FP32
///
/// Pushes `Cast(int32 -> float)`, `Mul(x_scale, w_scale)` and the final
/// `Mul` writing `output`.
fn rescale(
    ctx: &mut RewriteContext<'_>,
    nodes: &mut Vec<NodeProto>,
    base: &str,
    integer_output: &str,
    activation_scale: &str,
    weight_scale: &str,
    output: &str,
) {
    let cast_output = ctx.fresh_name(&format!("{}_cast", integer_output));
    let cast_name = ctx.fresh_name(&format!("{}_cast", base));
    nodes.push(onnx::make_node(
        "Cast",
        &[integer_output],
        &[&cast_output],
        &cast_name,
        vec![onnx::attr_int("to", DataType::Float as i64)],
    ));

    let scale_output = ctx.fresh_name(&format!("{}_scale", base));
    let scale_name = ctx.fresh_name(&format!("{}_scales_mul", base));
    nodes.push(onnx::make_node(
        "Mul",
        &[activation_scale, weight_scale],
        &[&scale_output],
        &scale_name,
        vec![],
    ));

    let mul_name = ctx.fresh_name(&format!("{}_output_scale_mul", base));
    nodes.push(onnx::make_node(
        "Mul",
        &[&cast_output, &scale_output],
        &[output],
        &mul_name,
        vec![],
    ));
}

/// `MatMul(A, W)` to `MatMulInteger` on a dynamically quantized `A`
#[derive(Debug, Default)]
pub struct MatMulRewrite;

impl OperatorRewrite for MatMulRewrite {
    fn op_type(&self) -> &'static str {
        "MatMul"
    }

    fn rewrite(&self, node: &NodeProto, ctx: &mut RewriteContext<'_>) -> Result<Vec<NodeProto>> {
        let activation = input(node, 0)?;
        let weight = input(node, 1)?;
        let output = output(node)?;
        let base = base_name(node, output);

        let mut nodes = Vec::with_capacity(5);
        let dynamic = ctx.dynamic_input(activation, &mut nodes);
        let w = ctx.weight(weight)?;

        let integer_output = ctx.fresh_name(&format!("{}_output_quantized", output));
        let integer_name = ctx.fresh_name(&format!("{}_quant", base));
        nodes.push(onnx::make_node(
            "MatMulInteger",
            &[&dynamic.quantized, &w.quantized, &dynamic.zero_point, &w.zero_point],
            &[&integer_output],
            &integer_name,
            vec![],
        ));
        rescale(
            ctx,
            &mut nodes,
            &base,
            &integer_output,
            &dynamic.scale,
            &w.scale,
            output,
        );

        Ok(nodes)
    }
}

/// `Conv(X, W, B)` to `ConvInteger` with the bias added back in FP32
#[derive(Debug, Default)]
pub struct ConvRewrite;

impl OperatorRewrite for ConvRewrite {
    fn op_type(&self) -> &'static str {
        "Conv"
    }

    fn rewrite(&self, node: &NodeProto, ctx: &mut RewriteContext<'_>) -> Result<Vec<NodeProto>> {
        let activation = input(node, 0)?;
        let weight = input(node, 1)?;
        let bias = node.input.get(2).filter(|name| !name.is_empty()).cloned();
        let output = output(node)?;
        let base = base_name(node, output);

        let weight_rank = ctx
            .weights
            .get(weight)
            .map(|q| q.dims.len())
            .ok_or_else(|| QdynError::Internal(format!("weight '{}' was not quantized", weight)))?;

        let mut nodes = Vec::with_capacity(7);
        let dynamic = ctx.dynamic_input(activation, &mut nodes);
        let w = ctx.weight(weight)?;

        let integer_output = ctx.fresh_name(&format!("{}_output_quantized", output));
        let integer_name = ctx.fresh_name(&format!("{}_quant", base));
        let mut conv = onnx::make_node(
            "ConvInteger",
            &[&dynamic.quantized, &w.quantized, &dynamic.zero_point, &w.zero_point],
            &[&integer_output],
            &integer_name,
            vec![],
        );
        conv.attribute = node.attribute.clone();
        nodes.push(conv);

        match bias {
            None => rescale(
                ctx,
                &mut nodes,
                &base,
                &integer_output,
                &dynamic.scale,
                &w.scale,
                output,
            ),
            Some(bias) => {
                let scaled = ctx.fresh_name(&format!("{}_output_no_bias", output));
                rescale(
                    ctx,
                    &mut nodes,
                    &base,
                    &integer_output,
                    &dynamic.scale,
                    &w.scale,
                    &scaled,
                );
                let reshaped = ctx.channel_broadcast(&bias, weight_rank - 1, &mut nodes)?;
                let add_name = ctx.fresh_name(&format!("{}_bias_add", base));
                nodes.push(onnx::make_node(
                    "Add",
                    &[&scaled, &reshaped],
                    &[output],
                    &add_name,
                    vec![],
                ));
            }
        }

        Ok(nodes)
    }
}

/// `Gather(W, indices)` over quantized data, dequantizing only the rows read
#[derive(Debug, Default)]
pub struct GatherRewrite;

impl OperatorRewrite for GatherRewrite {
    fn op_type(&self) -> &'static str {
        "Gather"
    }

    fn rewrite(&self, node: &NodeProto, ctx: &mut RewriteContext<'_>) -> Result<Vec<NodeProto>> {
        let data = input(node, 0)?;
        let indices = input(node, 1)?;
        let output = output(node)?;
        let base = base_name(node, output);

        let w = ctx.weight(data)?;
        let gathered = ctx.fresh_name(&format!("{}_quantized", output));
        let gather_name = ctx.fresh_name(&format!("{}_quant", base));
        let mut gather = onnx::make_node(
            "Gather",
            &[&w.quantized, indices],
            &[&gathered],
            &gather_name,
            vec![],
        );
        gather.attribute = node.attribute.clone();

        let dequantize_name = ctx.fresh_name(&format!("{}_DequantizeLinear", base));
        let dequantize = onnx::make_node(
            "DequantizeLinear",
            &[&gathered, &w.scale, &w.zero_point],
            &[output],
            &dequantize_name,
            vec![],
        );

        Ok(vec![gather, dequantize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::{QuantType, WeightQuantizer};
    use std::collections::HashSet;

    fn context<'a>(
        initializers: &'a [TensorProto],
        quantized: Vec<QuantizedTensor>,
        used: &[&str],
    ) -> RewriteContext<'a> {
        let used: HashSet<String> = used.iter().map(|s| s.to_string()).collect();
        let weights = quantized.into_iter().map(|q| (q.name.clone(), q)).collect();
        RewriteContext::new(NameGenerator::new(used), initializers, weights)
    }

    fn quantize(init: &TensorProto, axis: Option<usize>) -> QuantizedTensor {
        WeightQuantizer::new(QuantType::QUInt8, false, false)
            .quantize_initializer(init, axis)
            .unwrap()
    }

    fn op_types(nodes: &[NodeProto]) -> Vec<&str> {
        nodes.iter().map(|n| n.op_type.as_str()).collect()
    }

    #[test]
    fn test_rewriter_lookup() {
        for op in ["MatMul", "Conv", "Gather"] {
            assert_eq!(rewriter_for(op).map(|r| r.op_type()), Some(op));
        }
        assert!(rewriter_for("Relu").is_none());
    }

    #[test]
    fn test_matmul_rewrite() {
        let w = tensor::from_f32("W", &[2, 3], &[0.1, -0.2, 0.3, 0.4, -0.5, 0.6]);
        let inits = vec![w.clone()];
        let mut ctx = context(&inits, vec![quantize(&w, None)], &["x", "W", "y", "mm"]);

        let node = onnx::make_node("MatMul", &["x", "W"], &["y"], "mm", vec![]);
        let nodes = MatMulRewrite.rewrite(&node, &mut ctx).unwrap();

        assert_eq!(
            op_types(&nodes),
            vec!["DynamicQuantizeLinear", "MatMulInteger", "Cast", "Mul", "Mul"]
        );
        assert_eq!(nodes[1].input, vec!["x_quantized", "W_quantized", "x_zero_point", "W_zero_point"]);
        assert_eq!(nodes[4].output, vec!["y"]);
        assert_eq!(
            nodes[2].get_attribute("to").map(|a| a.i),
            Some(DataType::Float as i64)
        );

        let inits = ctx.into_initializers();
        let names: Vec<&str> = inits.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["W_quantized", "W_scale", "W_zero_point"]);
        assert!(inits[1].dims.is_empty());
        assert_eq!(inits[0].data_type, DataType::Uint8 as i32);
    }

    #[test]
    fn test_shared_activation_and_weight() {
        let w = tensor::from_f32("W", &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let inits = vec![w.clone()];
        let mut ctx = context(&inits, vec![quantize(&w, None)], &["x", "W", "a", "b"]);

        let first = onnx::make_node("MatMul", &["x", "W"], &["a"], "", vec![]);
        let second = onnx::make_node("MatMul", &["x", "W"], &["b"], "", vec![]);
        let nodes_a = MatMulRewrite.rewrite(&first, &mut ctx).unwrap();
        let nodes_b = MatMulRewrite.rewrite(&second, &mut ctx).unwrap();

        assert_eq!(nodes_a.len(), 5);
        assert_eq!(nodes_b.len(), 4);
        assert_eq!(nodes_a[1].input, nodes_b[0].input);
        assert_eq!(ctx.initializers().len(), 3);
    }

    #[test]
    fn test_conv_rewrite_with_bias() {
        let w = tensor::from_f32("W", &[2, 1, 1, 1], &[0.5, -1.0]);
        let b = tensor::from_f32("B", &[2], &[0.1, 0.2]);
        let inits = vec![w.clone(), b];
        let mut ctx = context(&inits, vec![quantize(&w, Some(0))], &["x", "W", "B", "y"]);

        let node = onnx::make_node(
            "Conv",
            &["x", "W", "B"],
            &["y"],
            "conv",
            vec![onnx::attr_ints("strides", &[1, 1])],
        );
        let nodes = ConvRewrite.rewrite(&node, &mut ctx).unwrap();

        assert_eq!(
            op_types(&nodes),
            vec!["DynamicQuantizeLinear", "ConvInteger", "Cast", "Mul", "Mul", "Add"]
        );
        assert!(nodes[1].get_attribute("strides").is_some());
        assert_eq!(nodes[5].input[1], "B_reshaped");
        assert_eq!(nodes[5].output, vec!["y"]);

        let inits = ctx.into_initializers();
        let scale = inits.iter().find(|t| t.name == "W_scale").unwrap();
        assert_eq!(scale.dims, vec![2, 1, 1]);
        let zero_point = inits.iter().find(|t| t.name == "W_zero_point").unwrap();
        assert_eq!(zero_point.dims, vec![2]);
        let bias = inits.iter().find(|t| t.name == "B_reshaped").unwrap();
        assert_eq!(bias.dims, vec![2, 1, 1]);
    }

    #[test]
    fn test_conv_dynamic_bias_uses_reshape() {
        let w = tensor::from_f32("W", &[2, 1, 3], &[0.5, -1.0, 0.2, 0.3, 0.1, 0.0]);
        let inits = vec![w.clone()];
        let mut ctx = context(&inits, vec![quantize(&w, None)], &["x", "W", "bias", "y"]);

        let node = onnx::make_node("Conv", &["x", "W", "bias"], &["y"], "conv", vec![]);
        let nodes = ConvRewrite.rewrite(&node, &mut ctx).unwrap();
        assert!(op_types(&nodes).contains(&"Reshape"));

        let shape = ctx
            .initializers()
            .iter()
            .find(|t| t.name == "bias_reshape_shape")
            .unwrap();
        assert_eq!(shape.dims, vec![2]);
    }

    #[test]
    fn test_gather_rewrite() {
        let w = tensor::from_f32("emb", &[3, 2], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let inits = vec![w.clone()];
        let mut ctx = context(&inits, vec![quantize(&w, None)], &["emb", "ids", "out"]);

        let node = onnx::make_node(
            "Gather",
            &["emb", "ids"],
            &["out"],
            "gather",
            vec![onnx::attr_int("axis", 0)],
        );
        let nodes = GatherRewrite.rewrite(&node, &mut ctx).unwrap();

        assert_eq!(op_types(&nodes), vec!["Gather", "DequantizeLinear"]);
        assert_eq!(nodes[0].input, vec!["emb_quantized", "ids"]);
        assert_eq!(nodes[0].get_attribute("axis").map(|a| a.i), Some(0));
        assert_eq!(nodes[1].input, vec!["out_quantized", "emb_scale", "emb_zero_point"]);
        assert_eq!(nodes[1].output, vec!["out"]);
    }

    #[test]
    fn test_missing_weight_is_error() {
        let inits = vec![];
        let mut ctx = context(&inits, vec![], &[]);
        let node = onnx::make_node("MatMul", &["x", "W"], &["y"], "mm", vec![]);
        assert!(MatMulRewrite.rewrite(&node, &mut ctx).is_err());
    }
}
