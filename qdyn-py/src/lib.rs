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

//! Python bindings for qdyn
//!
//! Exposes the one-call `quantize_dynamic` entry point with the keyword
//! arguments Python users already pass to ONNX Runtime's quantizer.

use pyo3::prelude::*;
use pyo3::types::PyDict;

use qdyn_core::{
    self as core,
    quantization::{self, QuantizationConfig},
    DynamicQuantizer, Model, QdynError, QuantizationReport,
};

/// 8-bit weight types
#[pyclass(name = "QuantType")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PyQuantType {
    QInt8,
    QUInt8,
}

impl From<PyQuantType> for quantization::QuantType {
    fn from(value: PyQuantType) -> Self {
        match value {
            PyQuantType::QInt8 => Self::QInt8,
            PyQuantType::QUInt8 => Self::QUInt8,
        }
    }
}

/// Weight type given as `QuantType.QUInt8` or as a string
#[derive(FromPyObject)]
enum WeightTypeArg {
    Enum(PyQuantType),
    Name(String),
}

impl WeightTypeArg {
    fn resolve(self) -> PyResult<quantization::QuantType> {
        match self {
            Self::Enum(qt) => Ok(qt.into()),
            Self::Name(name) => name.parse().map_err(to_py_err),
        }
    }
}

fn to_py_err(err: QdynError) -> PyErr {
    match err {
        QdynError::Io(_) | QdynError::ModelLoad(_) | QdynError::UnsupportedFormat { .. } => {
            PyErr::new::<pyo3::exceptions::PyIOError, _>(err.to_string())
        }
        QdynError::Configuration(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(err.to_string())
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(err.to_string()),
    }
}

fn report_to_dict<'py>(py: Python<'py>, report: &QuantizationReport) -> PyResult<&'py PyDict> {
    let dict = PyDict::new(py);
    dict.set_item("weight_type", report.weight_type.to_string())?;
    dict.set_item("original_size", report.original_size)?;
    dict.set_item("quantized_size", report.quantized_size)?;
    dict.set_item("compression_ratio", report.compression_ratio)?;
    dict.set_item("nodes_quantized", report.nodes_quantized())?;
    dict.set_item("quantized_nodes", report.quantized_nodes.clone())?;
    dict.set_item(
        "weights",
        report
            .weights
            .iter()
            .map(|w| w.name.clone())
            .collect::<Vec<_>>(),
    )?;
    dict.set_item(
        "skipped_nodes",
        report
            .skipped_nodes
            .iter()
            .map(|s| (s.name.clone(), s.reason.to_string()))
            .collect::<Vec<_>>(),
    )?;
    dict.set_item("mean_reconstruction_error", report.mean_reconstruction_error)?;
    dict.set_item("max_reconstruction_error", report.max_reconstruction_error)?;
    dict.set_item("opset_version", report.opset_version)?;
    dict.set_item("quantization_time_ms", report.quantization_time_ms)?;
    Ok(dict)
}

/// Initialize the qdyn core library
#[pyfunction]
fn init() -> PyResult<()> {
    core::init().map_err(to_py_err)
}

/// Get qdyn core version
#[pyfunction]
fn version() -> &'static str {
    core::VERSION
}

/// Operator types that can be quantized
#[pyfunction]
fn supported_op_types() -> Vec<&'static str> {
    quantization::registry::supported_op_types()
}

/// Quantize the weights of `model_input` to 8 bits and write `model_output`
#[pyfunction]
#[pyo3(signature = (
    model_input,
    model_output,
    weight_type = None,
    per_channel = false,
    reduce_range = false,
    op_types_to_quantize = None,
    nodes_to_quantize = None,
    nodes_to_exclude = None
))]
#[allow(clippy::too_many_arguments)]
fn quantize_dynamic(
    py: Python<'_>,
    model_input: String,
    model_output: String,
    weight_type: Option<WeightTypeArg>,
    per_channel: bool,
    reduce_range: bool,
    op_types_to_quantize: Option<Vec<String>>,
    nodes_to_quantize: Option<Vec<String>>,
    nodes_to_exclude: Option<Vec<String>>,
) -> PyResult<PyObject> {
    let weight_type = match weight_type {
        Some(arg) => arg.resolve()?,
        None => quantization::QuantType::QUInt8,
    };
    let config = QuantizationConfig {
        weight_type,
        per_channel,
        reduce_range,
        op_types_to_quantize: op_types_to_quantize.unwrap_or_default(),
        nodes_to_quantize: nodes_to_quantize.unwrap_or_default(),
        nodes_to_exclude: nodes_to_exclude.unwrap_or_default(),
        ..Default::default()
    };

    let quantizer = DynamicQuantizer::new(config).map_err(to_py_err)?;
    let report = py
        .allow_threads(|| quantizer.quantize_file(&model_input, &model_output))
        .map_err(to_py_err)?;
    log::info!("Quantized {} -> {}", model_input, model_output);

    Ok(report_to_dict(py, &report)?.to_object(py))
}

/// Load a model file and describe it
#[pyfunction]
fn model_info(py: Python<'_>, path: String) -> PyResult<PyObject> {
    let model = Model::load(&path).map_err(to_py_err)?;
    let info = model.info();

    let dict = PyDict::new(py);
    dict.set_item("format", format!("{:?}", info.format))?;
    dict.set_item("ir_version", info.ir_version)?;
    dict.set_item("producer_name", info.producer_name)?;
    dict.set_item("opsets", info.opsets)?;
    dict.set_item(
        "inputs",
        info.inputs.into_iter().map(|v| v.name).collect::<Vec<_>>(),
    )?;
    dict.set_item(
        "outputs",
        info.outputs.into_iter().map(|v| v.name).collect::<Vec<_>>(),
    )?;
    dict.set_item("node_count", info.node_count)?;
    dict.set_item("initializer_count", info.initializer_count)?;
    dict.set_item("operator_counts", info.operator_counts)?;
    dict.set_item("parameter_count", info.parameter_count)?;
    dict.set_item("model_size_bytes", info.model_size_bytes)?;
    Ok(dict.to_object(py))
}

/// Python module definition
#[pymodule]
fn qdyn(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyQuantType>()?;
    m.add_function(wrap_pyfunction!(init, m)?)?;
    m.add_function(wrap_pyfunction!(version, m)?)?;
    m.add_function(wrap_pyfunction!(supported_op_types, m)?)?;
    m.add_function(wrap_pyfunction!(quantize_dynamic, m)?)?;
    m.add_function(wrap_pyfunction!(model_info, m)?)?;

    m.add("VERSION", core::VERSION)?;
    Ok(())
}
