//! Error types for the transform engine
//!
//! Configuration errors are raised before any row flows and carry the
//! identity of the offending component. Runtime errors abort the stream
//! they occur in, except where a transform documents per-row recovery.

use thiserror::Error;

/// Result alias used throughout the row core
pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    /// Invalid transform configuration
    #[error("In component {component}: {message}")]
    Config { component: String, message: String },

    /// A declared column is not part of a source's schema or row
    #[error("In component {component}: column {column} not found in source {table}")]
    MissingColumn {
        component: String,
        table: String,
        column: String,
    },

    /// A multi-source transform got fewer inputs than it needs
    #[error("In component {component}: at least two sources are required, found {found}")]
    NotEnoughSources { component: String, found: usize },

    /// `next()` was called on a processor after `close()`
    #[error("Processor {0} is closed")]
    StreamClosed(String),

    /// A hierarchy insertion was rejected
    #[error("Tree error: {0}")]
    Tree(String),

    /// The relational engine failed or is missing
    #[error("Relational engine error: {0}")]
    Engine(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EtlError {
    /// Shorthand for a configuration error of `component`
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            component: component.into(),
            message: message.into(),
        }
    }
}
