//! Rollup compiler error types
//!
//! Every failure is a deterministic function of the input definition, so
//! nothing here is retryable.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while compiling a rollup chain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RollupError {
    /// Definition is structurally invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A group-by column is not selected by the view it would roll up from
    #[error("Configuration error: group-by column '{column}' is not selected by {view}")]
    MissingGroupColumn { column: String, view: String },

    /// Granularity sequence is not strictly increasing
    #[error("Configuration error: granularity '{next}' does not follow '{previous}' in increasing order")]
    NonMonotonicGranularity { previous: String, next: String },

    /// Unknown granularity name
    #[error("Invalid granularity: {0}")]
    InvalidGranularity(String),

    /// Interval literal could not be understood
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Select expression could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Custom rule collides with a fixed rule or another custom rule
    #[error("Rule conflict: {0}")]
    RuleConflict(String),

    /// Expression matched no rewrite rule (strict mode only)
    #[error("No rollup rule for '{expression}' (alias '{alias}') in {view}")]
    RewriteAmbiguity {
        view: String,
        alias: String,
        expression: String,
    },

    /// A definition with this name is already registered
    #[error("Aggregate already registered: {0}")]
    DuplicateDefinition(String),

    /// No definition registered under this name
    #[error("Aggregate not found: {0}")]
    DefinitionNotFound(String),

    /// The chain has no view at the requested granularity
    #[error("Aggregate '{name}' has no view at granularity '{granularity}'")]
    GranularityNotInChain { name: String, granularity: String },

    /// External executor rejected a statement
    #[error("Executor error: {0}")]
    Executor(String),

    /// Writing SQL text failed
    #[error("Render error: {0}")]
    Render(String),
}

impl From<std::fmt::Error> for RollupError {
    fn from(err: std::fmt::Error) -> Self {
        RollupError::Render(err.to_string())
    }
}

impl RollupError {
    /// Whether this error is a configuration problem of the definition itself
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::MissingGroupColumn { .. }
                | Self::NonMonotonicGranularity { .. }
                | Self::InvalidInterval(_)
                | Self::RuleConflict(_)
        )
    }
}

/// Result type alias for rollup operations
pub type RollupResult<T> = Result<T, RollupError>;

/// An expression forwarded unchanged because no rule matched it
///
/// The coarser aggregate is probably wrong when this happens, so warnings are
/// kept on the chain for callers to surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteWarning {
    /// Table name of the view that received the forwarded expression
    pub view: String,
    /// Alias of the affected column
    pub alias: String,
    /// Expression text as forwarded
    pub expression: String,
}

impl RewriteWarning {
    /// Promote the warning to an error (strict mode)
    pub fn into_error(self) -> RollupError {
        RollupError::RewriteAmbiguity {
            view: self.view,
            alias: self.alias,
            expression: self.expression,
        }
    }
}

impl std::fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: '{}' (alias '{}') forwarded without rewrite",
            self.view, self.expression, self.alias
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RollupError::MissingGroupColumn {
            column: "symbol".to_string(),
            view: "ticks_per_minute".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Configuration error: group-by column 'symbol' is not selected by ticks_per_minute"
        );
        assert!(err.is_configuration());

        let err = RollupError::DefinitionNotFound("ticks".to_string());
        assert_eq!(err.to_string(), "Aggregate not found: ticks");
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_warning_into_error() {
        let warning = RewriteWarning {
            view: "ticks_per_hour".to_string(),
            alias: "mean".to_string(),
            expression: "avg(price)".to_string(),
        };
        assert_eq!(
            warning.to_string(),
            "ticks_per_hour: 'avg(price)' (alias 'mean') forwarded without rewrite"
        );
        assert!(matches!(
            warning.into_error(),
            RollupError::RewriteAmbiguity { ref alias, .. } if alias == "mean"
        ));
    }
}
