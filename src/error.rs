//! Error types for the depot.
//!
//! Each failure class of the catalog has its own enum so callers can match on
//! the exact kind they care about:
//!
//! - [`LabelError`]: the label could not be read or is malformed.
//! - [`IdentityError`]: the label lacks the fields that make up a [`ProductKey`].
//! - [`MetadataMissing`]: a requested metadata field is absent. Recoverable.
//! - [`PayloadError`]: a payload could not be materialized. Raised lazily, at the
//!   point of access, never during a scan.
//!
//! All of them convert into the crate-wide [`Error`] so that `?` works across
//! module boundaries.
//!
//! [`ProductKey`]: crate::product::ProductKey

use std::path::PathBuf;

use arrow::error::ArrowError;

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to read or interpret a label document.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    /// The label file could not be read.
    #[error("failed to read label {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed.
    #[error("malformed label {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A payload descriptor is incomplete or inconsistent.
    #[error("invalid payload descriptor '{slot}' in {path}: {reason}")]
    Descriptor {
        path: PathBuf,
        slot: String,
        reason: String,
    },
}

/// The label lacks an identity-bearing field.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("label {path} has no value for identity field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
}

/// A metadata field is absent from the label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("metadata field '{field}' is absent")]
pub struct MetadataMissing {
    pub field: String,
}

impl MetadataMissing {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

/// Failure to materialize a payload slot.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The label declares no payload with this slot name.
    #[error("product declares no payload slot '{0}'")]
    UnknownSlot(String),

    /// The backing file does not exist.
    #[error("payload file for slot '{slot}' not found at {path}")]
    Unresolved { slot: String, path: PathBuf },

    /// I/O error while reading the backing file.
    #[error("failed to read payload file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The declared byte range extends past the end of the backing file.
    #[error(
        "payload slot '{slot}' needs bytes up to {required} but {path} holds only {actual}"
    )]
    Truncated {
        slot: String,
        path: PathBuf,
        required: u64,
        actual: u64,
    },

    /// The declared shape or element type cannot be materialized.
    #[error("payload slot '{slot}' has an inconsistent layout: {reason}")]
    Shape { slot: String, reason: String },

    /// The slot exists but holds a different layout than the caller expected.
    #[error("payload slot '{slot}' is not {expected}")]
    Layout { slot: String, expected: &'static str },

    /// Arrow rejected the decoded data.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Metadata(#[from] MetadataMissing),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// A usage operation named a kind the depot has never indexed.
    #[error("depot holds no products of kind '{0}'")]
    KindNotLoaded(String),

    /// A retrieval selected no usage status at all.
    #[error("retrieval must select at least one usage status")]
    EmptySelection,

    /// A typed view was requested for a product of another kind.
    #[error("product {key} is of kind '{actual}', not '{expected}'")]
    WrongKind {
        key: String,
        expected: &'static str,
        actual: String,
    },

    /// No table row matched the requested key value.
    #[error("no row of table '{slot}' has '{field}' equal to '{value}'")]
    RowNotFound {
        slot: String,
        field: String,
        value: String,
    },

    /// A scan root or directory entry could not be enumerated.
    #[error("cannot enumerate: {0}")]
    Walk(#[from] walkdir::Error),

    /// Strict classification rejected a label no kind claims.
    #[error("no product kind claims label {path}")]
    Unclassified { path: PathBuf },

    /// The collision policy rejected a product whose key is already indexed
    /// from another label.
    #[error("product {key} is already indexed from {existing}")]
    KeyCollision { key: String, existing: PathBuf },

    /// Configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error outside label and payload access.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Label(_) => "label",
            Error::Identity(_) => "identity",
            Error::Metadata(_) => "metadata",
            Error::Payload(_) => "payload",
            Error::KindNotLoaded(_) => "kind-not-loaded",
            Error::EmptySelection => "empty-selection",
            Error::WrongKind { .. } => "wrong-kind",
            Error::RowNotFound { .. } => "row-not-found",
            Error::Walk(_) => "walk",
            Error::Unclassified { .. } => "unclassified",
            Error::KeyCollision { .. } => "collision",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}
