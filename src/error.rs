//! Protocol error taxonomy.
//!
//! Every failure that reaches the client travels as an `Error { message }`
//! record whose message embeds the kind name, so clients can dispatch on a
//! stable prefix without a second schema.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced over the protocol.
///
/// Internal plumbing uses `anyhow` and is folded into [`EngineError::Io`]
/// at the command boundary; everything else maps 1:1 onto a protocol kind.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("PathNotAbsolute: {} is not an absolute path", .0.display())]
    PathNotAbsolute(PathBuf),

    #[error("IoError: {0:#}")]
    Io(anyhow::Error),

    #[error("NoSessionOpen: open a file before issuing session commands")]
    NoSessionOpen,

    #[error("InvalidRegex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("ColumnCountMismatch: pattern captures {actual} column(s) but nbr_columns is {expected}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("MalformedCommand: {0}")]
    MalformedCommand(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Io(err)
    }
}

impl EngineError {
    /// Wrap a raw I/O failure with a short description of what was attempted.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        EngineError::Io(anyhow::Error::new(err).context(context.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_embed_kind() {
        let err = EngineError::PathNotAbsolute(PathBuf::from("logs/app.log"));
        assert!(err.to_string().starts_with("PathNotAbsolute:"));

        let err = EngineError::NoSessionOpen;
        assert!(err.to_string().starts_with("NoSessionOpen:"));

        let err = EngineError::ColumnCountMismatch {
            expected: 5,
            actual: 3,
        };
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("5"));
    }

    #[test]
    fn test_io_wrapping_keeps_context() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = EngineError::io("opening /var/log/syslog", inner);
        let msg = err.to_string();
        assert!(msg.starts_with("IoError:"));
        assert!(msg.contains("opening /var/log/syslog"));
    }

    #[test]
    fn test_invalid_regex_from() {
        let err: EngineError = regex::Regex::new("(").unwrap_err().into();
        assert!(err.to_string().starts_with("InvalidRegex:"));
    }
}
