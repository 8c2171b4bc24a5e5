use crate::types::{Code, RpcStatus};

/// Failure of an audio endpoint. Terminal for the turn it happens in.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio source failed: {0}")]
    Source(String),
    #[error("audio sink failed: {0}")]
    Sink(String),
    #[error("audio device unavailable: {0}")]
    Device(String),
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConverseError {
    /// The service was unavailable. The only failure the retry policy absorbs.
    #[error("service unavailable: {message}")]
    Transient { message: String },

    /// Non-OK status reported by the service, in-stream or as the call's final status.
    #[error("server error ({code}): {message}")]
    Server { code: Code, message: String },

    /// The service sent a frame this client cannot interpret.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error(transparent)]
    Resource(#[from] AudioError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("conversation loop is no longer running")]
    LoopClosed,
}

impl ConverseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConverseError::Transient { .. })
    }

    /// Failures that must stop a conversation loop instead of idling it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConverseError::Authentication { .. } | ConverseError::Config(_) | ConverseError::LoopClosed
        )
    }

    /// Status code this failure is reported under.
    pub fn code(&self) -> Code {
        match self {
            ConverseError::Transient { .. } => Code::Unavailable,
            ConverseError::Server { code, .. } => *code,
            ConverseError::MalformedResponse(_) => Code::Internal,
            ConverseError::Authentication { .. } => Code::Unauthenticated,
            ConverseError::Resource(_) => Code::Aborted,
            ConverseError::Config(_) => Code::InvalidArgument,
            ConverseError::LoopClosed => Code::Cancelled,
        }
    }
}

impl From<RpcStatus> for ConverseError {
    fn from(status: RpcStatus) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::Unavailable => ConverseError::Transient { message },
            Code::Unauthenticated | Code::PermissionDenied => {
                ConverseError::Authentication { message }
            }
            code => ConverseError::Server { code, message },
        }
    }
}
