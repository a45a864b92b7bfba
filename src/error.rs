// src/error.rs

use thiserror::Error;

/// Core error types for Strata
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed version selector string
    #[error("Invalid version selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    /// The deterministic solver exhausted its search without finding a
    /// valid assignment. Carries the clause set that could not be met.
    #[error("no satisfying assignment for the requested change-set:\n{}", .clauses.join("\n"))]
    Unsatisfiable { clauses: Vec<String> },

    /// A resolved plan failed post-solve validation. This is an internal
    /// bug in a solver strategy, never a problem with the constraints.
    #[error("solver produced an inconsistent plan: {0}")]
    InvariantViolation(String),

    /// A planned package has no artifact in any configured repository
    #[error("no repository indexes an artifact for {0}")]
    MatchNotFound(String),

    /// Removal blocked by installed reverse dependencies
    #[error("{package} is required by other installed packages: {}", .blockers.join(", "))]
    RequiredByOthers {
        package: String,
        blockers: Vec<String>,
    },

    /// Download or unpack failure for a single artifact
    #[error("failed to fetch {artifact}: {reason}")]
    Fetch { artifact: String, reason: String },

    /// A package finalizer hook exited non-zero or timed out
    #[error("finalizer for {package} failed: {reason}")]
    Finalizer { package: String, reason: String },

    /// Download errors from the repository client
    #[error("Download error: {0}")]
    Download(String),

    /// Artifact or file checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting state (duplicate repository, duplicate package, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Parse errors for timestamps, indices, and stored metadata
    #[error("Parse error: {0}")]
    Parse(String),

    /// Initialization error
    #[error("Failed to initialize: {0}")]
    Init(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),
}

/// Result type alias using Strata's Error type
pub type Result<T> = std::result::Result<T, Error>;
