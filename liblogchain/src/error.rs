/*
 * Error types
 *
 * LogError covers setup failures (directories, runtime, configuration) and the
 * per-record failures handlers report through tracing. CloseError is the only
 * error a producer ever sees: the aggregate returned by Logger::close.
 */

use std::fmt;

/// Errors raised while configuring or operating the logging engine.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote end answered with a non-success status
    #[error("delivery failed with status {0}")]
    Status(reqwest::StatusCode),

    #[error("config error: {field}: {reason}")]
    Config {
        /// Offending setting
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// The background runtime could not be started or a task failed to join
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("handler is closed")]
    Closed,
}

/// Aggregate of every handler failure observed while closing a logger.
///
/// Cloneable so that repeated or concurrent `close` calls can all observe the
/// outcome of the single close that actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseError {
    failures: Vec<String>,
}

impl CloseError {
    pub(crate) fn from_failures(failures: Vec<String>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(CloseError { failures })
        }
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s) while closing: ", self.failures.len())?;
        f.write_str(&self.failures.join("; "))
    }
}

impl std::error::Error for CloseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = LogError::Config {
            field: "dir".to_owned(),
            reason: "not a directory".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dir"));
        assert!(msg.contains("not a directory"));
    }

    #[test]
    fn close_error_only_built_from_failures() {
        assert!(CloseError::from_failures(Vec::new()).is_none());

        let err = CloseError::from_failures(vec!["file: disk full".to_owned(), "http: nope".to_owned()])
            .unwrap();
        assert_eq!(err.failures().len(), 2);
        let msg = err.to_string();
        assert!(msg.starts_with("2 failure(s)"));
        assert!(msg.contains("disk full"));
        assert!(msg.contains("http: nope"));
    }
}
