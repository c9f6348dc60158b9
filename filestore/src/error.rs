use driver_api::DriverError;

use crate::cache::CacheError;
use crate::registry::RegistryError;

/// Error type for file operations
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unable to open file (missing file name)")]
    MissingFileName,

    #[error("{uri}: unable to open file ({source})")]
    Open { uri: String, source: DriverError },

    #[error("{uri}: {operation} failed ({source})")]
    Io {
        uri: String,
        operation: &'static str,
        source: DriverError,
    },

    #[error("{uri}: only {written} of {requested} bytes written")]
    ShortWrite {
        uri: String,
        written: usize,
        requested: usize,
    },

    #[error("{uri}: file is not open")]
    NotOpen { uri: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Content that the reader cannot handle
    #[error("{uri}: {message}")]
    Format { uri: String, message: String },
}

impl FileError {
    pub(crate) fn io(uri: &str, operation: &'static str, source: DriverError) -> Self {
        Self::Io {
            uri: uri.to_string(),
            operation,
            source,
        }
    }
}
