//! Error types for schema reconciliation.

/// Errors that can occur while planning schema changes.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The opaque resource handle could not be decoded (or built).
    #[error("Malformed entity identifier '{raw}': {reason}")]
    MalformedIdentifier {
        /// The offending input.
        raw: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested change is not allowed, e.g. dropping columns.
    #[error("Unsupported operation: {operation}: {}", .targets.join(", "))]
    UnsupportedOperation {
        /// Short description of the refused operation.
        operation: String,
        /// Names of every object the operation would have touched.
        targets: Vec<String>,
    },

    /// A codec name is not in the codec table.
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),

    /// A literal cannot be represented as a value of the column's type.
    #[error("Invalid literal '{literal}' for column '{column}' of type {column_type}")]
    InvalidColumnType {
        /// Column the literal is typed by.
        column: String,
        /// Declared column type.
        column_type: String,
        /// The literal that failed to parse.
        literal: String,
    },

    /// The input cannot be rendered into valid DDL.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The describe collaborator failed.
    #[error("Failed to describe '{path}': {source}")]
    Describe {
        /// Full path of the object being described.
        path: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An object that was just created could not be found.
    #[error("Object '{0}' does not exist after creation")]
    NotCreated(String),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<ReconcileError>),
}

impl ReconcileError {
    /// Shorthand for [`ReconcileError::MalformedIdentifier`].
    pub(crate) fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }

    /// Collapses a list of errors: one error stays as is, several become
    /// [`ReconcileError::Multiple`].
    pub(crate) fn collect(mut errors: Vec<ReconcileError>) -> std::result::Result<(), Self> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
