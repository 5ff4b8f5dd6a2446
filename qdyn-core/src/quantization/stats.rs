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

//! Weight statistics collection

use crate::{QdynError, Result};
use serde::{Deserialize, Serialize};

/// Summary statistics of a weight tensor or one of its channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub abs_max: f32,
    pub count: usize,
}

impl WeightStats {
    /// Collect statistics over all values
    pub fn collect(values: &[f32]) -> Result<Self> {
        let mut acc = Accumulator::default();
        for &v in values {
            acc.push(v)?;
        }
        acc.finish()
    }

    /// Collect statistics for every slice along `axis`
    pub fn per_channel(values: &[f32], dims: &[usize], axis: usize) -> Result<Vec<Self>> {
        let layout = ChannelLayout::new(dims, axis)?;
        if layout.len() != values.len() {
            return Err(QdynError::tensor(format!(
                "dims {:?} describe {} values, got {}",
                dims,
                layout.len(),
                values.len()
            )));
        }

        let mut accs = vec![Accumulator::default(); layout.channels];
        for (i, &v) in values.iter().enumerate() {
            accs[layout.channel_of(i)].push(v)?;
        }
        accs.into_iter().map(Accumulator::finish).collect()
    }

    /// Range widened to include zero, as required for exact zero encoding
    pub fn range_with_zero(&self) -> (f32, f32) {
        (self.min.min(0.0), self.max.max(0.0))
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    min: Option<f32>,
    max: f32,
    sum: f64,
    abs_max: f32,
    count: usize,
}

impl Accumulator {
    fn push(&mut self, v: f32) -> Result<()> {
        if !v.is_finite() {
            return Err(QdynError::tensor(format!(
                "non-finite weight value {} cannot be quantized",
                v
            )));
        }
        match self.min {
            Some(min) => {
                self.min = Some(min.min(v));
                self.max = self.max.max(v);
            }
            None => {
                self.min = Some(v);
                self.max = v;
            }
        }
        self.sum += v as f64;
        self.abs_max = self.abs_max.max(v.abs());
        self.count += 1;
        Ok(())
    }

    fn finish(self) -> Result<WeightStats> {
        let min = self
            .min
            .ok_or_else(|| QdynError::tensor("cannot collect statistics of an empty tensor"))?;
        Ok(WeightStats {
            min,
            max: self.max,
            mean: (self.sum / self.count as f64) as f32,
            abs_max: self.abs_max,
            count: self.count,
        })
    }
}

/// Row-major decomposition of a tensor into `outer x channels x inner`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelLayout {
    pub outer: usize,
    pub channels: usize,
    pub inner: usize,
}

impl ChannelLayout {
    pub fn new(dims: &[usize], axis: usize) -> Result<Self> {
        if axis >= dims.len() {
            return Err(QdynError::tensor(format!(
                "channel axis {} out of range for dims {:?}",
                axis, dims
            )));
        }
        Ok(Self {
            outer: dims[..axis].iter().product(),
            channels: dims[axis],
            inner: dims[axis + 1..].iter().product(),
        })
    }

    pub fn len(&self) -> usize {
        self.outer * self.channels * self.inner
    }

    /// Channel index of the flat element `index`
    pub fn channel_of(&self, index: usize) -> usize {
        (index / self.inner) % self.channels
    }
}
