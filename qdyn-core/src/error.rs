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

//! Error handling for qdyn

use thiserror::Error;

/// Result type alias for qdyn operations
pub type Result<T> = std::result::Result<T, QdynError>;

/// Error types for model loading, quantization and serialization
#[derive(Error, Debug)]
pub enum QdynError {
    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("Model format not supported: {format}")]
    UnsupportedFormat { format: String },

    #[error("Invalid model: {reason}")]
    InvalidModel { reason: String },

    #[error("Quantization failed: {reason}")]
    QuantizationFailed { reason: String },

    #[error("Tensor operation error: {message}")]
    TensorError { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QdynError {
    pub(crate) fn tensor(message: impl Into<String>) -> Self {
        QdynError::TensorError {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_model(reason: impl Into<String>) -> Self {
        QdynError::InvalidModel {
            reason: reason.into(),
        }
    }

    pub(crate) fn quantization(reason: impl Into<String>) -> Self {
        QdynError::QuantizationFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for QdynError {
    fn from(err: ort::Error) -> Self {
        QdynError::OnnxRuntime(err.to_string())
    }
}

impl From<toml::de::Error> for QdynError {
    fn from(err: toml::de::Error) -> Self {
        QdynError::Configuration(err.to_string())
    }
}

impl From<toml::ser::Error> for QdynError {
    fn from(err: toml::ser::Error) -> Self {
        QdynError::Configuration(err.to_string())
    }
}
