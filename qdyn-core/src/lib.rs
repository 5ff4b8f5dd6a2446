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

//! qdyn Core - Dynamic 8-bit quantization for ONNX models
//!
//! This crate converts the FP32 weights of an ONNX model to 8-bit integers
//! ahead of time while activations are quantized at inference time. It
//! includes implementations for:
//!
//! - ONNX protobuf decoding, graph queries and serialization
//! - Operator eligibility, weight statistics and scale/zero-point selection
//! - Per-tensor and per-channel weight requantization
//! - Graph rewriting to `MatMulInteger`, `ConvInteger` and quantized `Gather`
//! - Validation of the rewritten graph and reconstruction error

pub mod config;
pub mod error;
pub mod model;
pub mod onnx;
pub mod quantization;
pub mod tensor;
pub mod validation;

pub use config::{Config, OutputConfig};
pub use error::{QdynError, Result};
pub use model::{Model, ModelFormat, ModelInfo};
pub use quantization::{
    quantize_dynamic, DynamicQuantizer, QuantType, QuantizationConfig, QuantizationReport,
};
pub use validation::{GraphValidator, ValidationConfig};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the qdyn core library with logging
pub fn init() -> Result<()> {
    // Try to initialize logger, but don't fail if already initialized
    let _ = env_logger::try_init();
    log::info!("qdyn core v{} initialized", VERSION);
    Ok(())
}
