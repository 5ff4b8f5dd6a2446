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

//! Tensor payload codec
//!
//! Converts between `TensorProto` initializers and plain Rust buffers.
//! Float payloads are read from either `float_data` or little-endian
//! `raw_data`; everything this crate writes goes to `raw_data`.

use crate::error::{QdynError, Result};
use crate::onnx::proto::{DataLocation, DataType, TensorProto};

/// Number of elements described by `dims`
pub fn element_count(dims: &[i64]) -> Result<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        if d < 0 {
            return Err(QdynError::tensor(format!("negative dimension in {:?}", dims)));
        }
        acc.checked_mul(d as usize)
            .ok_or_else(|| QdynError::tensor(format!("dimension overflow in {:?}", dims)))
    })
}

/// Element type of a tensor, if it is a known ONNX type
pub fn data_type(tensor: &TensorProto) -> Option<DataType> {
    DataType::try_from(tensor.data_type).ok()
}

/// True when the payload is stored outside the protobuf
pub fn is_external(tensor: &TensorProto) -> bool {
    tensor.data_location == DataLocation::External as i32 || !tensor.external_data.is_empty()
}

/// Decode a FLOAT tensor into `f32` values
pub fn to_f32(tensor: &TensorProto) -> Result<Vec<f32>> {
    if data_type(tensor) != Some(DataType::Float) {
        return Err(QdynError::tensor(format!(
            "tensor '{}' has data type {} (expected FLOAT)",
            tensor.name, tensor.data_type
        )));
    }
    if is_external(tensor) {
        return Err(QdynError::UnsupportedFormat {
            format: format!("external data for tensor '{}'", tensor.name),
        });
    }

    let count = element_count(&tensor.dims)?;

    if !tensor.raw_data.is_empty() {
        let expected = count.checked_mul(4).ok_or_else(|| {
            QdynError::tensor(format!(
                "tensor '{}' dims {:?} exceed the addressable size",
                tensor.name, tensor.dims
            ))
        })?;
        if tensor.raw_data.len() != expected {
            return Err(QdynError::tensor(format!(
                "tensor '{}' raw_data has {} bytes, dims {:?} need {}",
                tensor.name,
                tensor.raw_data.len(),
                tensor.dims,
                expected
            )));
        }
        return Ok(tensor
            .raw_data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect());
    }

    if tensor.float_data.len() != count {
        return Err(QdynError::tensor(format!(
            "tensor '{}' has {} float values, dims {:?} need {}",
            tensor.name,
            tensor.float_data.len(),
            tensor.dims,
            count
        )));
    }
    Ok(tensor.float_data.clone())
}

/// Decode a UINT8 or INT8 tensor into its raw bytes
pub fn to_8bit(tensor: &TensorProto) -> Result<Vec<u8>> {
    match data_type(tensor) {
        Some(DataType::Uint8) | Some(DataType::Int8) => {}
        _ => {
            return Err(QdynError::tensor(format!(
                "tensor '{}' has data type {} (expected UINT8 or INT8)",
                tensor.name, tensor.data_type
            )))
        }
    }

    let count = element_count(&tensor.dims)?;
    let bytes: Vec<u8> = if !tensor.raw_data.is_empty() {
        tensor.raw_data.clone()
    } else {
        // int32_data carries 8-bit values one per entry
        tensor.int32_data.iter().map(|&v| v as u8).collect()
    };

    if bytes.len() != count {
        return Err(QdynError::tensor(format!(
            "tensor '{}' has {} values, dims {:?} need {}",
            tensor.name,
            bytes.len(),
            tensor.dims,
            count
        )));
    }
    Ok(bytes)
}

/// Encode a FLOAT tensor
pub fn from_f32(name: &str, dims: &[i64], values: &[f32]) -> TensorProto {
    let raw_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: DataType::Float as i32,
        raw_data,
        ..Default::default()
    }
}

/// Encode an 8-bit tensor; `data_type` must be UINT8 or INT8
pub fn from_8bit(name: &str, dims: &[i64], data_type: DataType, bytes: Vec<u8>) -> TensorProto {
    debug_assert!(matches!(data_type, DataType::Uint8 | DataType::Int8));
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: data_type as i32,
        raw_data: bytes,
        ..Default::default()
    }
}

/// Encode an INT64 tensor
pub fn from_i64(name: &str, dims: &[i64], values: &[i64]) -> TensorProto {
    let raw_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: DataType::Int64 as i32,
        raw_data,
        ..Default::default()
    }
}

/// Serialized payload size in bytes, saturating for dims that overflow
pub fn payload_bytes(tensor: &TensorProto) -> usize {
    if !tensor.raw_data.is_empty() {
        return tensor.raw_data.len();
    }
    let count = element_count(&tensor.dims).unwrap_or(0);
    data_type(tensor)
        .and_then(|dt| dt.element_size())
        .map(|size| count.saturating_mul(size))
        .unwrap_or(0)
}
