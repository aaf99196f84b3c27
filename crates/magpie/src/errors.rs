use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ChatError {
    /// The backend did not respond, or responded with a failure status before
    /// any streaming began.
    #[error("upstream unavailable: {details}")]
    UpstreamUnavailable {
        status: Option<u16>,
        details: String,
    },

    /// A connection-level failure after the stream was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller aborted the in-flight generation.
    #[error("generation cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        ChatError::Transport(err.to_string())
    }

    /// Distinguishes a caller-initiated abort from other failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
