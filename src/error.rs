//! Error types for the dockform crate.
//!
//! Every fallible operation returns an [`Error`] carrying the operation
//! path that failed, a [`Kind`] used for exit-code mapping, and an
//! optional wrapped cause forming a chain via `std::error::Error::source`.

use thiserror::Error;

/// Result type for dockform operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification.
///
/// The kind is stable and externally observable: the CLI shell maps it to
/// a process exit code via [`Kind::exit_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// The manifest or another declarative input is malformed
    Validation,
    /// An adapter call was made with bad arguments (programming error)
    InvalidInput,
    /// A referenced resource or file does not exist
    NotFound,
    /// The requested operation conflicts with live state
    Conflict,
    /// The docker CLI (or another external process) failed
    External,
    /// An internal failure such as I/O or serialization
    Internal,
    /// Cancellation was observed
    Canceled,
}

impl Kind {
    /// Stable process exit code for this kind
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Validation | Self::InvalidInput => 64,
            Self::NotFound => 65,
            Self::Conflict => 66,
            Self::External => 70,
            Self::Internal => 71,
            Self::Canceled => 130,
        }
    }

    /// Short lowercase name, used in log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::External => "external",
            Self::Internal => "internal",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for all dockform operations
#[derive(Error, Debug)]
#[error("{op}: {message}")]
pub struct Error {
    op: String,
    kind: Kind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Create an error with an explicit kind
    pub fn new(kind: Kind, op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a validation error
    pub fn validation(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::Validation, op, message)
    }

    /// Create an invalid-input error
    pub fn invalid_input(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::InvalidInput, op, message)
    }

    /// Create a not-found error
    pub fn not_found(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::NotFound, op, message)
    }

    /// Create a conflict error
    pub fn conflict(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::Conflict, op, message)
    }

    /// Create an external (child process) error
    pub fn external(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::External, op, message)
    }

    /// Create an internal error
    pub fn internal(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::Internal, op, message)
    }

    /// Create a cancellation error
    pub fn canceled(op: impl Into<String>) -> Self {
        Self::new(Kind::Canceled, op, "operation canceled")
    }

    /// Attach a wrapped cause
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Re-wrap this error under an outer operation path, preserving the kind
    #[must_use]
    pub fn in_op(self, op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            kind: self.kind,
            message: self.message.clone(),
            source: Some(Box::new(self)),
        }
    }

    /// The operation path that failed (e.g. `volume.create[data]`)
    #[must_use]
    pub fn op(&self) -> &str {
        &self.op
    }

    /// The error kind
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The human-readable message, without the operation path
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Whether a read operation may retry after this error.
    ///
    /// Only transient daemon failures qualify; write operations never
    /// retry automatically regardless of kind.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == Kind::External
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::internal("io", err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::internal("json", err.to_string()).with_source(err)
    }
}

impl From<serde_yaml_ng::Error> for Error {
    fn from(err: serde_yaml_ng::Error) -> Self {
        Self::internal("yaml", err.to_string()).with_source(err)
    }
}
