//! Unified error handling for the route-recorder library.
//!
//! Recording commands, repository mutations and persistence all report failures
//! through [`RecorderError`]. GPX import failures are classified separately by
//! [`ImportError`] so they can be surfaced to the user as a flat result value.

use thiserror::Error;
use uuid::Uuid;

/// Classified GPX import failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    /// The document is not well-formed XML.
    #[error("Malformed GPX document: {message}")]
    MalformedDocument { message: String },
    /// Fewer than two usable points remained after filtering.
    #[error("GPX file has {found} valid points, minimum 2 required")]
    InsufficientPoints { found: usize },
}

/// Unified error type for route-recorder operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecorderError {
    /// Command issued in a state that does not accept it
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
    /// No saved route with this id
    #[error("Route '{id}' not found")]
    RouteNotFound { id: Uuid },
    /// Route exists but has no photo with this id
    #[error("Photo '{photo_id}' not found on route '{route_id}'")]
    PhotoNotFound { route_id: Uuid, photo_id: Uuid },
    /// Configuration rejected at the boundary
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },
    /// Document could not be (de)serialized
    #[error("Serialization error: {message}")]
    Serialization { message: String },
    /// GPX import failed
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl RecorderError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        RecorderError::Config {
            message: message.into(),
        }
    }

    pub(crate) fn persistence(message: impl Into<String>) -> Self {
        RecorderError::Persistence {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for RecorderError {
    fn from(err: rusqlite::Error) -> Self {
        RecorderError::persistence(err.to_string())
    }
}

/// Result type alias for route-recorder operations.
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Extension trait for converting lookups into repository errors.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route-not-found error.
    fn ok_or_route_not_found(self, id: Uuid) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_route_not_found(self, id: Uuid) -> Result<T> {
        self.ok_or(RecorderError::RouteNotFound { id })
    }
}
