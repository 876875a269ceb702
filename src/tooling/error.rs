// Error taxonomy shared by the search, metadata and download services.
use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ToolUnavailable(String),

    #[error("{message}")]
    ExternalFailure {
        message: String,
        stderr: Option<String>,
    },

    #[error("External tool timed out after {0} seconds.")]
    ExternalTimeout(u64),

    #[error("Malformed tool output: {0}")]
    MalformedOutput(String),

    #[error("Downloaded file was not found in the scratch directory.")]
    FileNotFound { stderr: Option<String> },

    #[error("A download is already in progress.")]
    DownloadInProgress,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Install failed: {0}")]
    Install(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn tool_unavailable(message: impl Into<String>) -> Self {
        Self::ToolUnavailable(message.into())
    }

    pub fn external_failure(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ExternalFailure {
            message: message.into(),
            stderr,
        }
    }

    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings(message.into())
    }

    pub fn install(message: impl Into<String>) -> Self {
        Self::Install(message.into())
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http(message.into())
    }

    /// Whether the caller can reasonably retry or continue in a degraded mode.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ToolUnavailable(_)
                | Self::MalformedOutput(_)
                | Self::DownloadInProgress
                | Self::Http(_)
        )
    }

    /// Diagnostic text captured from the external tool, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ExternalFailure { stderr, .. } | Self::FileNotFound { stderr } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_tool_errors_are_recoverable() {
        assert!(StreamError::validation("empty query").is_recoverable());
        assert!(StreamError::tool_unavailable("ffmpeg missing").is_recoverable());
        assert!(!StreamError::ExternalTimeout(30).is_recoverable());
        assert!(!StreamError::FileNotFound { stderr: None }.is_recoverable());
    }

    #[test]
    fn stderr_is_exposed_for_process_failures() {
        let error = StreamError::external_failure("yt-dlp failed.", Some("ERROR: 403".into()));
        assert_eq!(error.stderr(), Some("ERROR: 403"));
        assert_eq!(error.to_string(), "yt-dlp failed.");

        let missing = StreamError::FileNotFound {
            stderr: Some("nothing written".into()),
        };
        assert_eq!(missing.stderr(), Some("nothing written"));
        assert_eq!(StreamError::DownloadInProgress.stderr(), None);
    }
}
