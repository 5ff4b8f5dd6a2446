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

//! ONNX graph schema and construction helpers

pub mod proto;

pub use proto::{
    AttributeProto, AttributeType, DataType, GraphProto, ModelProto, NodeProto,
    OperatorSetIdProto, SparseTensorProto, TensorProto, TypeProto, ValueInfoProto,
};

use proto::{tensor_shape_proto, type_proto};

/// Default (ai.onnx) operator domain
pub const DEFAULT_DOMAIN: &str = "";

/// Microsoft contrib operator domain
pub const MS_DOMAIN: &str = "com.microsoft";

/// IR version written into freshly built models
pub const DEFAULT_IR_VERSION: i64 = 8;

/// Returns true when `domain` names the default operator set
pub fn is_default_domain(domain: &str) -> bool {
    domain.is_empty() || domain == "ai.onnx"
}

/// Build a node in the default domain
pub fn make_node(
    op_type: &str,
    inputs: &[&str],
    outputs: &[&str],
    name: &str,
    attributes: Vec<AttributeProto>,
) -> NodeProto {
    NodeProto {
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: name.to_string(),
        op_type: op_type.to_string(),
        attribute: attributes,
        ..Default::default()
    }
}

/// Integer attribute
pub fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        ..Default::default()
    }
}

/// Integer list attribute
pub fn attr_ints(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Ints as i32,
        ints: values.to_vec(),
        ..Default::default()
    }
}

/// Tensor value info with a fully static shape; negative dims become symbolic
pub fn make_tensor_value_info(name: &str, elem_type: DataType, dims: &[i64]) -> ValueInfoProto {
    let dim = dims
        .iter()
        .enumerate()
        .map(|(i, &d)| tensor_shape_proto::Dimension {
            denotation: String::new(),
            value: Some(if d >= 0 {
                tensor_shape_proto::dimension::Value::DimValue(d)
            } else {
                tensor_shape_proto::dimension::Value::DimParam(format!("{}_dim{}", name, i))
            }),
        })
        .collect();

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            denotation: String::new(),
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: elem_type as i32,
                shape: Some(proto::TensorShapeProto { dim }),
            })),
        }),
        ..Default::default()
    }
}

/// Static dims of a tensor-typed value, `None` for unknown or symbolic dims
pub fn value_info_dims(info: &ValueInfoProto) -> Option<Vec<Option<i64>>> {
    let tensor = match info.r#type.as_ref()?.value.as_ref()? {
        type_proto::Value::TensorType(t) => t,
        _ => return None,
    };
    let shape = tensor.shape.as_ref()?;
    Some(
        shape
            .dim
            .iter()
            .map(|d| match d.value {
                Some(tensor_shape_proto::dimension::Value::DimValue(v)) => Some(v),
                _ => None,
            })
            .collect(),
    )
}

/// Wrap a graph into a model importing the given default-domain opset
pub fn make_model(graph: GraphProto, opset: i64) -> ModelProto {
    ModelProto {
        ir_version: DEFAULT_IR_VERSION,
        opset_import: vec![OperatorSetIdProto {
            domain: DEFAULT_DOMAIN.to_string(),
            version: opset,
        }],
        producer_name: "qdyn".to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        graph: Some(graph),
        ..Default::default()
    }
}

impl GraphProto {
    /// Names of sparse initializers, taken from their `values` tensors
    pub fn sparse_initializer_names(&self) -> impl Iterator<Item = &str> {
        self.sparse_initializer
            .iter()
            .filter_map(|s| s.values.as_ref())
            .map(|v| v.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

impl NodeProto {
    /// Look up an attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|a| a.name == name)
    }

    /// Display label used in logs and reports
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("<{} -> {}>", self.op_type, self.output.join(","))
        } else {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_node() {
        let node = make_node(
            "Conv",
            &["x", "w"],
            &["y"],
            "conv0",
            vec![attr_ints("strides", &[1, 1]), attr_int("group", 1)],
        );
        assert_eq!(node.op_type, "Conv");
        assert_eq!(node.input, vec!["x", "w"]);
        assert_eq!(node.get_attribute("group").map(|a| a.i), Some(1));
        assert_eq!(
            node.get_attribute("strides").map(|a| a.ints.clone()),
            Some(vec![1, 1])
        );
        assert!(node.get_attribute("pads").is_none());
    }

    #[test]
    fn test_value_info_dims() {
        let info = make_tensor_value_info("x", DataType::Float, &[-1, 16]);
        assert_eq!(value_info_dims(&info), Some(vec![None, Some(16)]));
    }

    #[test]
    fn test_display_name_falls_back_to_outputs() {
        let named = make_node("Relu", &["a"], &["b"], "relu0", vec![]);
        assert_eq!(named.display_name(), "relu0");
        let anonymous = make_node("Relu", &["a"], &["b"], "", vec![]);
        assert_eq!(anonymous.display_name(), "<Relu -> b>");
    }

    #[test]
    fn test_sparse_initializer_names() {
        let graph = GraphProto {
            sparse_initializer: vec![
                SparseTensorProto {
                    values: Some(TensorProto {
                        name: "b".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                SparseTensorProto::default(),
            ],
            ..Default::default()
        };
        assert_eq!(graph.sparse_initializer_names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_default_domain() {
        assert!(is_default_domain(""));
        assert!(is_default_domain("ai.onnx"));
        assert!(!is_default_domain(MS_DOMAIN));
    }
}
