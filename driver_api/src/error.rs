/// Failure reported by a driver operation.
///
/// End of file is not an error: reads return `Ok(0)`.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The driver reported a failure; the text is its last error message.
    #[error("{0}")]
    Failed(String),

    #[error("unknown native handle {0}")]
    InvalidHandle(u64),

    #[error("driver is read-only")]
    ReadOnly,

    #[error("function '{0}' is not provided by the driver")]
    Unsupported(&'static str),
}

impl DriverError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
