//! Error type shared by the registry, the detector and the dispatch façade.
//!
//! Configuration errors (missing init procedure, unresolvable format name,
//! unknown id) and I/O errors are reported here; codec-internal failures are
//! opaque to the core and surface as [`PluginError::Codec`] or
//! [`PluginError::InvalidData`].

use std::io;
use thiserror::Error;

use crate::registry::FormatId;

/// Capability names used in [`PluginError::Unsupported`].
pub mod capability {
    pub const VALIDATE: &str = "validate";
    pub const LOAD:     &str = "load";
    pub const SAVE:     &str = "save";
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Invalid init plugin procedure")]
    MissingInit,
    #[error("Plugin did not provide a format name")]
    MissingFormatName,
    #[error("Unknown format id {0}")]
    UnknownFormat(FormatId),
    #[error("Format {format} does not support {capability}")]
    Unsupported { format: FormatId, capability: &'static str },
    #[error("Cannot save \"header only\" images")]
    HeaderOnly,
    #[error("Codec error ({format}): {message}")]
    Codec { format: FormatId, message: String },
    #[error("Invalid image data: {0}")]
    InvalidData(String),
    #[error("Library is not initialised")]
    NotInitialised,
    #[error("External plugin error: {0}")]
    External(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PluginError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PluginError::InvalidData(msg.into())
    }

    pub fn unsupported(format: FormatId, capability: &'static str) -> Self {
        PluginError::Unsupported { format, capability }
    }
}

pub type Result<T, E = PluginError> = std::result::Result<T, E>;
