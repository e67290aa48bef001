//! Error types for the container session

use std::path::PathBuf;
use thiserror::Error;

use crate::session::NodeType;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Why a metadata group failed schema validation.
///
/// `Missing` members can be created safely; `Conflict` members exist but
/// have the wrong shape or type and are never repaired automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    Missing(String),
    Conflict(String),
    LengthMismatch {
        first_trace: u64,
        trace_count: u64,
        timestamp: u64,
        settings: u64,
    },
}

impl std::fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaIssue::Missing(member) => write!(f, "missing member '{}'", member),
            SchemaIssue::Conflict(reason) => write!(f, "{}", reason),
            SchemaIssue::LengthMismatch { first_trace, trace_count, timestamp, settings } => write!(
                f,
                "parallel lengths mismatch: first_trace={} trace_count={} timestamp={} settings={}",
                first_trace, trace_count, timestamp, settings
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Container is not open")]
    NotOpen,

    #[error("File does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("Cannot create, file already exists: {0}")]
    FileExists(PathBuf),

    #[error("File is not recognized as a container by signature: {0}")]
    NotAContainer(PathBuf),

    #[error("Container is unreadable (corrupt or truncated): {0}")]
    Corrupt(String),

    #[error("Invalid path: '{0}'")]
    InvalidPath(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Path already exists: {0}")]
    PathExists(String),

    #[error("Expected {expected} at {path}, found {found}")]
    WrongKind {
        path: String,
        expected: &'static str,
        found: NodeType,
    },

    #[error("Non-group node exists at {0}")]
    GroupConflict(String),

    #[error("Group not empty: {0}")]
    GroupNotEmpty(String),

    #[error("Refusing to remove {0}")]
    RemovalRefused(String),

    #[error("Invalid array parameters for {path}: {reason}")]
    InvalidParams { path: String, reason: String },

    #[error("Shape mismatch for {path}: {reason}")]
    ShapeMismatch { path: String, reason: String },

    #[error("Type mismatch for {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Unsupported element type: {0}")]
    UnsupportedType(String),

    #[error("Selection out of range for {path}: {reason}")]
    OutOfRange { path: String, reason: String },

    #[error("Misaligned slice: byte count {byte_count} is not a multiple of element size {element_size}")]
    Misaligned { byte_count: u64, element_size: u64 },

    #[error("Append handle is not active")]
    HandleInactive,

    #[error("Append handle belongs to a container that has since been closed")]
    StaleHandle,

    #[error("Write past reserved rows for {path}: next row {next_row}, reserved up to {end_row}")]
    ReservationExhausted {
        path: String,
        next_row: u64,
        end_row: u64,
    },

    #[error("Rows of {path} are still buffered, write-back failed: {reason}")]
    WriteBackFailed { path: String, reason: String },

    #[error("Metadata schema invalid at {path}: {issue}")]
    Schema { path: String, issue: SchemaIssue },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session worker is not running")]
    WorkerStopped,
}

impl StoreError {
    pub(crate) fn params(path: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidParams { path: path.to_string(), reason: reason.into() }
    }

    pub(crate) fn shape(path: &str, reason: impl Into<String>) -> Self {
        StoreError::ShapeMismatch { path: path.to_string(), reason: reason.into() }
    }

    pub(crate) fn range(path: &str, reason: impl Into<String>) -> Self {
        StoreError::OutOfRange { path: path.to_string(), reason: reason.into() }
    }

    pub(crate) fn schema(path: &str, issue: SchemaIssue) -> Self {
        StoreError::Schema { path: path.to_string(), issue }
    }

    /// True for schema errors that only report missing members.
    pub fn is_missing_schema_member(&self) -> bool {
        matches!(self, StoreError::Schema { issue: SchemaIssue::Missing(_), .. })
    }
}
