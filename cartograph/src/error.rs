//! Error types used by the crate.

use thiserror::Error;

use crate::resource::{ResourceKind, ResponseError};

/// Cartograph error type.
#[derive(Debug, Error)]
pub enum CartographError {
    /// Requested zoom level is not covered by the tileset.
    #[error("zoom level {z} is outside of the tileset range {min_zoom}..={max_zoom}")]
    OutOfRange {
        /// Requested zoom level.
        z: u8,
        /// Minimum zoom level of the tileset.
        min_zoom: u8,
        /// Maximum zoom level of the tileset.
        max_zoom: u8,
    },
    /// Payload of a resource is malformed for its declared kind.
    #[error("failed to parse {kind} resource: {message}")]
    Parse {
        /// Kind of the resource that failed to parse.
        kind: ResourceKind,
        /// Details.
        message: String,
    },
    /// A resource required by the operation could not be loaded.
    #[error("failed to load {kind} resource: {error}")]
    Response {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Failure reported by the loader.
        error: ResponseError,
    },
    /// Operation requires a style, but none was set.
    #[error("map has no style")]
    NoStyle,
    /// The run loop was stopped before the operation could complete.
    #[error("run loop was stopped before the frame was complete")]
    Interrupted,
    /// Invalid configuration.
    #[error("{0}")]
    Configuration(String),
    /// Error reading/writing data to the FS.
    #[error("failed to read file")]
    FsIo(#[from] std::io::Error),
}

impl From<strfmt::FmtError> for CartographError {
    fn from(value: strfmt::FmtError) -> Self {
        Self::Configuration(format!("invalid url template: {value}"))
    }
}
