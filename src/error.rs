//! Error types for CWL document packing.
//!
//! Every failure while packing is fatal to the current pack invocation: errors
//! propagate to the top-level caller carrying the offending location or
//! identifier, and no partial output is produced.

use thiserror::Error;

use crate::location::Location;

/// Result alias used throughout the crate.
pub type PackResult<T> = Result<T, PackError>;

/// Main error type for all packing failures.
#[derive(Error, Debug)]
pub enum PackError {
    /// An inline or imported type definition lacks a `name` field.
    #[error("type defined in {location} is missing a name")]
    MissingTypeName { location: String },

    /// A port or nested type value has no `type` key and is not a recognized
    /// string form.
    #[error("in {location}: value has no recognizable CWL type")]
    MissingCwlType { location: String },

    /// A `record` type map lacks its `fields` key.
    #[error("in {location}: record type is missing 'fields'")]
    RecordMissingFields { location: String },

    /// An `array` type map lacks its `items` key.
    #[error("in {location}: array type is missing 'items'")]
    ArrayMissingItems { location: String },

    /// Map-to-list normalization encountered an entry lacking the designated
    /// key field.
    #[error("entry is missing key field '{key_field}'")]
    MissingKeyField { key_field: String },

    /// Shape normalization expected a map and found something else.
    #[error("expected a map, found {found}")]
    ExpectingMap { found: String },

    /// A `path#fragment` type reference did not resolve in the type table.
    #[error("could not find type '{reference}'")]
    UndefinedType { reference: String },

    /// Fetch of a linked document failed (HTTP error or unreadable file).
    #[error("could not find linked file: {location}")]
    LinkNotFound {
        location: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Fetched content failed to parse as YAML/JSON.
    #[error("malformed document {location}: {message}")]
    MalformedDocument { location: String, message: String },

    /// A `run` reference, after full resolution, is not a process map.
    #[error("{location}: expected a process, found {found}")]
    ExpectedProcess { location: String, found: String },

    /// A link string could not be resolved against its base location.
    #[error("cannot resolve link '{link}' against {base}")]
    InvalidLink { base: String, link: String },

    /// An `$import` chain or symbolic-link chain revisited a location.
    #[error("cyclic reference through {location}")]
    CyclicReference { location: String },
}

impl PackError {
    /// Create a fetch-failure error for a resolved location.
    pub fn link_not_found(
        location: &Location,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PackError::LinkNotFound {
            location: location.to_string(),
            cause: Some(cause.into()),
        }
    }

    /// Create a parse-failure error for a fetched document.
    pub fn malformed_document(location: &Location, message: impl std::fmt::Display) -> Self {
        PackError::MalformedDocument {
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a cyclic-reference error for a revisited location.
    pub fn cyclic_reference(location: &Location) -> Self {
        PackError::CyclicReference {
            location: location.to_string(),
        }
    }
}
