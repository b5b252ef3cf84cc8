use thiserror::Error;

/// Pipeline-wide error type
///
/// Every lifecycle failure maps to a distinct negative code through
/// [`PipelineError::code`]. Queue overflow is not an error; it shows up in the
/// backlog count.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Not initialised: {0}")]
    NotInitialised(String),

    #[error("Already active: {0}")]
    AlreadyActive(String),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Codec failure: {0}")]
    CodecFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Negative errno-style code for this failure kind
    pub fn code(&self) -> i32 {
        match self {
            PipelineError::NotInitialised(_) => -libc::EBADF,
            PipelineError::AlreadyActive(_) => -libc::EALREADY,
            PipelineError::ResourceUnavailable(_) => -libc::ENODEV,
            PipelineError::CodecFailure(_) => -libc::EPROTO,
            PipelineError::InvalidConfig(_) => -libc::EINVAL,
            PipelineError::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            PipelineError::Serialization(_) => -libc::EINVAL,
        }
    }

    /// Whether this error only reports a redundant request
    pub fn is_already_active(&self) -> bool {
        matches!(self, PipelineError::AlreadyActive(_))
    }
}

/// Convert a lifecycle result into its integer return code (zero on success)
pub fn return_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, PipelineError>;
