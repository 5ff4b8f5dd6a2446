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

//! Weight requantization

use super::params::{QuantRange, QuantizationParam};
use super::stats::{ChannelLayout, WeightStats};
use super::{QuantType, QuantizationConfig};
use crate::onnx::TensorProto;
use crate::{tensor, QdynError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// An 8-bit weight tensor with its quantization parameters
#[derive(Debug, Clone)]
pub struct QuantizedTensor {
    /// Name of the float tensor this was produced from
    pub name: String,
    pub dims: Vec<i64>,
    pub qtype: QuantType,
    /// Channel axis for per-channel parameters
    pub axis: Option<usize>,
    /// One entry per channel, or a single entry for per-tensor
    pub params: Vec<QuantizationParam>,
    /// Two's complement bytes for signed types
    pub data: Vec<u8>,
}

/// Reconstruction error of a quantized tensor against its source values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionError {
    pub max_abs: f32,
    pub mean_abs: f32,
    /// Largest error measured in quantization steps of the element's channel
    pub max_steps: f32,
}

impl QuantizedTensor {
    pub fn is_per_channel(&self) -> bool {
        self.axis.is_some()
    }

    pub fn scales(&self) -> Vec<f32> {
        self.params.iter().map(|p| p.scale).collect()
    }

    pub fn zero_points(&self) -> Vec<i32> {
        self.params.iter().map(|p| p.zero_point).collect()
    }

    /// Zero points encoded in the tensor's 8-bit type
    pub fn zero_point_bytes(&self) -> Vec<u8> {
        self.params
            .iter()
            .map(|p| self.qtype.to_byte(p.zero_point))
            .collect()
    }

    /// Bytes of weight payload
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    fn layout(&self) -> Result<Option<ChannelLayout>> {
        match self.axis {
            Some(axis) => {
                let dims: Vec<usize> = self.dims.iter().map(|&d| d as usize).collect();
                Ok(Some(ChannelLayout::new(&dims, axis)?))
            }
            None => Ok(None),
        }
    }

    fn param_at(&self, layout: Option<&ChannelLayout>, index: usize) -> &QuantizationParam {
        match layout {
            Some(layout) => &self.params[layout.channel_of(index)],
            None => &self.params[0],
        }
    }

    /// Dequantize back to FP32
    pub fn dequantize(&self) -> Result<Vec<f32>> {
        let layout = self.layout()?;
        Ok(self
            .data
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                self.param_at(layout.as_ref(), i)
                    .dequantize(self.qtype.from_byte(b))
            })
            .collect())
    }

    /// Compare against the original float values
    pub fn reconstruction_error(&self, original: &[f32]) -> Result<ReconstructionError> {
        if original.len() != self.data.len() {
            return Err(QdynError::tensor(format!(
                "'{}' has {} quantized values but {} originals",
                self.name,
                self.data.len(),
                original.len()
            )));
        }
        if original.is_empty() {
            return Ok(ReconstructionError::default());
        }

        let layout = self.layout()?;
        let mut err = ReconstructionError::default();
        let mut sum = 0.0f64;
        for (i, (&b, &x)) in self.data.iter().zip(original).enumerate() {
            let param = self.param_at(layout.as_ref(), i);
            let diff = (param.dequantize(self.qtype.from_byte(b)) - x).abs();
            err.max_abs = err.max_abs.max(diff);
            err.max_steps = err.max_steps.max(diff / param.scale);
            sum += diff as f64;
        }
        err.mean_abs = (sum / original.len() as f64) as f32;
        Ok(err)
    }
}

/// Converts float weights into 8-bit tensors
#[derive(Debug, Clone)]
pub struct WeightQuantizer {
    qtype: QuantType,
    symmetric: bool,
    range: QuantRange,
}

impl WeightQuantizer {
    pub fn new(qtype: QuantType, symmetric: bool, reduce_range: bool) -> Self {
        Self {
            qtype,
            symmetric,
            range: qtype.range(symmetric, reduce_range),
        }
    }

    pub fn from_config(config: &QuantizationConfig) -> Self {
        Self::new(config.weight_type, config.is_symmetric(), config.reduce_range)
    }

    pub fn qtype(&self) -> QuantType {
        self.qtype
    }

    pub fn range(&self) -> QuantRange {
        self.range
    }

    /// Quantize `values` with shape `dims`, per-channel along `axis` if given
    pub fn quantize(
        &self,
        name: &str,
        dims: &[i64],
        values: &[f32],
        axis: Option<usize>,
    ) -> Result<QuantizedTensor> {
        let count = tensor::element_count(dims)?;
        if count != values.len() {
            return Err(QdynError::tensor(format!(
                "'{}' dims {:?} describe {} values, got {}",
                name,
                dims,
                count,
                values.len()
            )));
        }

        let udims: Vec<usize> = dims.iter().map(|&d| d as usize).collect();
        let (params, layout) = match axis {
            Some(axis) => {
                let stats = WeightStats::per_channel(values, &udims, axis)?;
                let params = stats.iter().map(|s| self.params_for(s)).collect();
                (params, Some(ChannelLayout::new(&udims, axis)?))
            }
            None => (vec![self.params_for(&WeightStats::collect(values)?)], None),
        };

        let data = values
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let param = match &layout {
                    Some(layout) => &params[layout.channel_of(i)],
                    None => &params[0],
                };
                self.qtype.to_byte(param.quantize(x, self.range))
            })
            .collect();

        Ok(QuantizedTensor {
            name: name.to_string(),
            dims: dims.to_vec(),
            qtype: self.qtype,
            axis,
            params,
            data,
        })
    }

    /// Quantize a FLOAT initializer
    pub fn quantize_initializer(
        &self,
        initializer: &TensorProto,
        axis: Option<usize>,
    ) -> Result<QuantizedTensor> {
        let values = tensor::to_f32(initializer)?;
        self.quantize(&initializer.name, &initializer.dims, &values, axis)
    }

    /// Quantize several initializers in parallel, preserving order
    pub fn quantize_all(
        &self,
        requests: &[(&TensorProto, Option<usize>)],
    ) -> Result<Vec<(QuantizedTensor, ReconstructionError)>> {
        requests
            .par_iter()
            .map(|(initializer, axis)| {
                let values = tensor::to_f32(initializer)?;
                let quantized =
                    self.quantize(&initializer.name, &initializer.dims, &values, *axis)?;
                let error = quantized.reconstruction_error(&values)?;
                log::debug!(
                    "Quantized '{}' {:?}: max error {:.3e} ({:.2} steps)",
                    initializer.name,
                    initializer.dims,
                    error.max_abs,
                    error.max_steps
                );
                Ok((quantized, error))
            })
            .collect()
    }

    fn params_for(&self, stats: &WeightStats) -> QuantizationParam {
        let (rmin, rmax) = stats.range_with_zero();
        QuantizationParam::from_range(rmin, rmax, self.range, self.symmetric)
    }
}
