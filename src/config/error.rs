//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or parsing a route configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line started with a keyword the grammar does not know.
    #[error("line {line}: unknown directive '{directive}'")]
    UnknownDirective {
        /// 1-based line number.
        line: usize,
        /// The offending keyword.
        directive: String,
    },

    /// An in-route directive appeared outside any route block.
    #[error("line {line}: '{directive}' is only valid inside a route block")]
    OutsideRoute {
        /// 1-based line number.
        line: usize,
        /// The directive name.
        directive: String,
    },

    /// A `route` directive with no domain names.
    #[error("line {line}: route directive requires at least one domain")]
    MissingRouteDomains {
        /// 1-based line number.
        line: usize,
    },

    /// `upstream` or `provider` given more than once in a route.
    #[error("line {line}: duplicate '{directive}' directive in route")]
    DuplicateDirective {
        /// 1-based line number.
        line: usize,
        /// The directive name.
        directive: String,
    },

    /// A directive was given the wrong number of arguments.
    #[error("line {line}: '{directive}' expects {expected}")]
    WrongArgumentCount {
        /// 1-based line number.
        line: usize,
        /// The directive name.
        directive: String,
        /// Human description of the expected arguments.
        expected: &'static str,
    },

    /// A `header` directive named an operation the grammar does not know.
    #[error("line {line}: unknown header operation '{operation}'")]
    UnknownHeaderOperation {
        /// 1-based line number.
        line: usize,
        /// The offending operation name.
        operation: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
