use std::path::PathBuf;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation predictor.
///
/// Each variant keeps the context of its failure domain so callers can match on
/// the category (see [`ErrorKind`]) instead of parsing messages.
#[derive(Error, Debug)]
pub enum SamError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Model asset `{name}` could not be loaded from {path:?}")]
    ModelAsset {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No image has been set; call set_image before predict")]
    ImageNotSet,

    #[error("Predictor has been disposed")]
    Disposed,

    #[error("Invalid input: {field} {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Not implemented: {feature} prompts are not supported")]
    Unsupported { feature: String },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxError,
    },
}

/// Coarse error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A model asset is missing or unusable. Never retryable.
    Configuration,
    /// Programmer error: wrong call order or use after dispose.
    Precondition,
    InvalidInput,
    Unsupported,
    /// Failure while executing a graph or processing pixels.
    Runtime,
}

impl SamError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::ModelAsset { .. } => ErrorKind::Configuration,
            Self::ImageNotSet | Self::Disposed => ErrorKind::Precondition,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Model { .. } | Self::ImageProcessing { .. } => ErrorKind::Runtime,
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn model(operation: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SamError>;

/// Maps a backend error into a [`SamError::Model`] tagged with `operation`.
///
/// ONNX Runtime errors are flattened to their message; some of them carry
/// builder state that is not `Send`.
pub(crate) fn ort_error<E: std::fmt::Display>(operation: &str) -> impl FnOnce(E) -> SamError + '_ {
    move |err| SamError::model(operation, err.to_string())
}

impl From<ort::Error> for SamError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err.to_string())
    }
}

/// Shape errors come out of tensor marshalling around graph execution, so they
/// are reported as model errors.
impl From<ndarray::ShapeError> for SamError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

impl From<image::ImageError> for SamError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<std::io::Error> for SamError {
    fn from(err: std::io::Error) -> Self {
        Self::ImageProcessing {
            operation: "io".to_string(),
            source: Box::new(err),
        }
    }
}
