//! Error types.

use std::time::Duration;

use crate::engine::BackendError;

/// Malformed corpus text. Loading stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error on line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number in the document being loaded.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError { line, message: message.into() }
    }
}

/// Unsupported or missing `! version` directive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("unsupported corpus version '{found}' on line {line} (supported: up to 2.0)")]
    Unsupported { line: usize, found: String },

    #[error("line {line} requires a '! version' directive earlier in the document")]
    Missing { line: usize },
}

/// Why a corpus load was rejected. The previously loaded corpus stays active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Failure to run an object macro.
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("object macro '{0}' is not defined")]
    NotFound(String),

    #[error("no backend registered for language '{language}' (macro '{name}')")]
    NoBackend { name: String, language: String },

    /// Preparation failed; the message is cached and returned on every later call.
    #[error("object macro '{name}' failed to prepare: {message}")]
    Preparation { name: String, message: String },

    #[error("object macro '{name}' failed: {source}")]
    Execution {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("object macro '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },
}

/// Failure while building a reply from a response template.
#[derive(Debug, thiserror::Error)]
pub enum ExpansionError {
    #[error("reply expansion failed: {0}")]
    Macro(#[from] MacroError),

    /// `{@...}` redirects nested deeper than [`crate::Options::max_depth`].
    #[error("reply redirects nested deeper than {limit} levels")]
    DeepRecursion { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = ParseError::new(7, "response without a trigger");
        assert_eq!(err.to_string(), "syntax error on line 7: response without a trigger");
    }

    #[test]
    fn load_error_is_transparent() {
        let err = LoadError::from(VersionError::Unsupported { line: 1, found: "3.0".into() });
        assert_eq!(err.to_string(), "unsupported corpus version '3.0' on line 1 (supported: up to 2.0)");
    }

    #[test]
    fn execution_error_keeps_source() {
        let err = MacroError::Execution { name: "add".into(), source: "division by zero".into() };
        assert_eq!(err.to_string(), "object macro 'add' failed: division by zero");
        let expansion = ExpansionError::from(err);
        assert!(std::error::Error::source(&expansion).is_some());
    }

    #[test]
    fn deep_recursion_display() {
        let err = ExpansionError::DeepRecursion { limit: 50 };
        assert_eq!(err.to_string(), "reply redirects nested deeper than 50 levels");
    }
}
