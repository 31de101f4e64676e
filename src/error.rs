use thiserror::Error;

/// Raised while building an [`InstrumentationMatcher`](crate::InstrumentationMatcher).
/// A matcher is never built from a partially valid config list.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("instrumentation `{channel}` is missing required field `{field}`")]
    MissingField { channel: String, field: &'static str },

    #[error("instrumentation `{channel}` has a function query with no className, methodName or functionName")]
    EmptyQuery { channel: String },

    #[error("instrumentation `{channel}` sets both className and functionName")]
    ConflictingQuery { channel: String },

    #[error("instrumentation `{channel}` has invalid version range `{range}`: {reason}")]
    InvalidVersionRange {
        channel: String,
        range: String,
        reason: String,
    },

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yml::Error),
}

/// Raised by [`Transformer::transform`](crate::Transformer::transform).
#[derive(Debug, Error)]
pub enum TransformError {
    /// One or more bound configs had no injection point in the source. Names
    /// are listed in config order.
    #[error("Failed to find injection points for: {0:?}")]
    InjectionMatchFailure(Vec<String>),

    /// The target was found but cannot be wrapped without changing what the
    /// source means.
    #[error("instrumentation `{channel}` cannot wrap `{name}`: {reason} are not supported")]
    UnsupportedTarget {
        channel: String,
        name: String,
        reason: &'static str,
    },

    /// `line` and `column` are 1-based.
    #[error("failed to parse source at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid input source map: {0}")]
    InputSourceMap(#[source] sourcemap::Error),

    #[error("failed to serialize source map: {0}")]
    SourceMap(#[source] sourcemap::Error),
}

/// Returned when a module format tag is not one of the accepted spellings.
#[derive(Debug, Error)]
#[error("unknown module format `{0}`; expected esm, cjs or unknown")]
pub struct UnknownModuleFormat(pub String);
