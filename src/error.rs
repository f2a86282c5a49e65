//! Error types for the routing engine
//!
//! All public APIs return `Result<T, Error>` where Error is defined here.
//! Pipeline stages surface their errors unchanged; the coordinator wraps
//! them into [`Error::PassFailed`] once a pass has been rolled back.

use crate::types::DataId;
use thiserror::Error;

/// The main error type for the routing engine
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Change-log / Store Errors
    // ============================================================================
    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Query failed after {attempts} attempts: {message}")]
    QueryRetriesExhausted { attempts: u32, message: String },

    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Store error: {message}")]
    Store { message: String },

    // ============================================================================
    // Gap Errors
    // ============================================================================
    #[error("Gap state for channel '{channel_id}' was modified concurrently")]
    GapConflict { channel_id: String },

    #[error("Invalid gap [{start_id},{end_id}]: {message}")]
    InvalidGap {
        start_id: DataId,
        end_id: DataId,
        message: String,
    },

    // ============================================================================
    // Routing Errors
    // ============================================================================
    #[error("Invalid routing expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    #[error("Channel '{channel_id}' not found")]
    ChannelNotFound { channel_id: String },

    #[error("Engine '{engine}' not found")]
    EngineNotFound { engine: String },

    // ============================================================================
    // Pass Lifecycle Errors
    // ============================================================================
    #[error("A routing pass is already running for channel '{channel_id}'")]
    ChannelBusy { channel_id: String },

    #[error("Routing pass for channel '{channel_id}' was cancelled")]
    Cancelled { channel_id: String },

    #[error("Routing pass timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(
        "Routing pass failed for channel '{channel_id}' (last data id {}): {source}",
        .last_data_id.map_or_else(|| "none".to_string(), |id| id.to_string())
    )]
    PassFailed {
        channel_id: String,
        last_data_id: Option<DataId>,
        #[source]
        source: Box<Error>,
    },

    // ============================================================================
    // Template Errors
    // ============================================================================
    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Undefined variable in template: {variable}")]
    UndefinedVariable { variable: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a transient query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a gap conflict error
    pub fn gap_conflict(channel_id: impl Into<String>) -> Self {
        Self::GapConflict {
            channel_id: channel_id.into(),
        }
    }

    /// Create a routing expression error
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create an undefined variable error
    pub fn undefined_var(variable: impl Into<String>) -> Self {
        Self::UndefinedVariable {
            variable: variable.into(),
        }
    }

    /// Wrap an error as the failure of a routing pass
    pub fn pass_failed(
        channel_id: impl Into<String>,
        last_data_id: Option<DataId>,
        source: Error,
    ) -> Self {
        Self::PassFailed {
            channel_id: channel_id.into(),
            last_data_id,
            source: Box::new(source),
        }
    }

    /// Check if this error is transient and the failed query may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Query { .. } | Error::Database(_))
    }

    /// Check if this error is a cancellation or timeout of the pass
    pub fn is_aborted(&self) -> bool {
        match self {
            Error::Cancelled { .. } | Error::Timeout { .. } => true,
            Error::PassFailed { source, .. } => source.is_aborted(),
            _ => false,
        }
    }
}

/// Result type alias for the routing engine
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::missing_field("node_id");
        assert_eq!(err.to_string(), "Missing required config field: node_id");

        let err = Error::gap_conflict("orders");
        assert_eq!(
            err.to_string(),
            "Gap state for channel 'orders' was modified concurrently"
        );
    }

    #[test]
    fn test_pass_failed_display() {
        let err = Error::pass_failed("orders", Some(42), Error::query("lock timeout"));
        assert_eq!(
            err.to_string(),
            "Routing pass failed for channel 'orders' (last data id 42): Query failed: lock timeout"
        );

        let err = Error::pass_failed("orders", None, Error::gap_conflict("orders"));
        assert!(err.to_string().contains("(last data id none)"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::query("connection reset").is_retryable());

        assert!(!Error::QueryRetriesExhausted {
            attempts: 2,
            message: "x".into()
        }
        .is_retryable());
        assert!(!Error::gap_conflict("c").is_retryable());
        assert!(!Error::config("test").is_retryable());
    }

    #[test]
    fn test_is_aborted() {
        assert!(Error::Timeout { timeout_ms: 10 }.is_aborted());
        assert!(Error::pass_failed(
            "c",
            None,
            Error::Cancelled {
                channel_id: "c".into()
            }
        )
        .is_aborted());
        assert!(!Error::query("x").is_aborted());
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }
}
