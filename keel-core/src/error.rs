//! Error types for Keel.
//!
//! Usage errors (bad arguments, missing write scope, unsupported property
//! types) and consistency errors (dimension mismatch, duplicate index) are
//! reported synchronously and never retried. File-level failures keep their
//! `anyhow` context chain and surface through [`Error::Storage`].

use thiserror::Error;

use crate::store::ObjectKey;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the vector index, the object store and persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// A vector index already exists on the property.
    #[error("vector index already exists on {entity}.{property}")]
    AlreadyExists {
        /// The entity type.
        entity: String,
        /// The indexed property.
        property: String,
    },

    /// No vector index exists on the property.
    #[error("no vector index on {entity}.{property}")]
    NotFound {
        /// The entity type.
        entity: String,
        /// The property that was expected to be indexed.
        property: String,
    },

    /// The property is not declared on the entity type's schema.
    #[error("property {property} not found on {entity}")]
    PropertyNotFound {
        /// The entity type.
        entity: String,
        /// The missing property.
        property: String,
    },

    /// The property exists but is not a variable-length float vector.
    #[error("property {entity}.{property} has type {found}, expected a float vector")]
    UnsupportedPropertyType {
        /// The entity type.
        entity: String,
        /// The property.
        property: String,
        /// Human-readable description of the declared type.
        found: String,
    },

    /// Vector length does not match the index (or the other operand).
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The established dimension.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// Cosine distance is undefined for a zero-norm vector.
    #[error("degenerate vector: cosine distance is undefined for a zero-norm vector")]
    DegenerateVector,

    /// An argument is out of its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A structural mutation was attempted outside a write scope.
    #[error("operation requires an active write scope")]
    NotInWriteScope,

    /// The entity type is not declared on the schema.
    #[error("entity type {0} not found")]
    EntityNotFound(String),

    /// No object with this key exists.
    #[error("object {0} not found")]
    ObjectNotFound(ObjectKey),

    /// A property value does not match the declared property type.
    #[error("type mismatch for {entity}.{property}: expected {expected}")]
    TypeMismatch {
        /// The entity type.
        entity: String,
        /// The property.
        property: String,
        /// Description of the declared type.
        expected: String,
    },

    /// A snapshot or graph failed an integrity check.
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// Underlying file or mapping failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }
}
