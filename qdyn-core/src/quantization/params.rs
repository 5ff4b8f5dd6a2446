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

//! Scale and zero point calculation
//!
//! Affine mapping `x ~ (q - zero_point) * scale`. The float range is
//! always widened to contain zero so that zero padding and ReLU outputs
//! are represented exactly.

use serde::{Deserialize, Serialize};

/// Inclusive integer range of a quantized type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantRange {
    pub qmin: i32,
    pub qmax: i32,
}

impl QuantRange {
    pub fn span(&self) -> f32 {
        (self.qmax - self.qmin) as f32
    }
}

/// Single quantization parameter set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParam {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantizationParam {
    /// Compute parameters covering `[rmin, rmax]`
    pub fn from_range(rmin: f32, rmax: f32, range: QuantRange, symmetric: bool) -> Self {
        let mut rmin = rmin.min(0.0);
        let mut rmax = rmax.max(0.0);

        if symmetric {
            let abs_max = rmin.abs().max(rmax.abs());
            rmin = -abs_max;
            rmax = abs_max;
        }

        let scale = (rmax - rmin) / range.span();
        if scale < f32::MIN_POSITIVE {
            // all-zero tensor
            return Self {
                scale: 1.0,
                zero_point: 0,
            };
        }

        let zero_point = (range.qmin as f32 - rmin / scale).round_ties_even() as i32;
        Self {
            scale,
            zero_point: zero_point.clamp(range.qmin, range.qmax),
        }
    }

    /// Quantize one value, clamped to `range`
    #[inline]
    pub fn quantize(&self, x: f32, range: QuantRange) -> i32 {
        let q = (x / self.scale).round_ties_even() as i32 + self.zero_point;
        q.clamp(range.qmin, range.qmax)
    }

    /// Map a quantized value back to float
    #[inline]
    pub fn dequantize(&self, q: i32) -> f32 {
        (q - self.zero_point) as f32 * self.scale
    }
}
