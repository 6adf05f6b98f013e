//! Error types for Kino Coordinator

use crate::types::{SessionId, ViewId};
use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum Error {
    // Media errors
    #[error("Failed to load media: {0}")]
    LoadFailed(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    // Picture-in-Picture errors
    #[error("Picture-in-Picture not possible after {attempts} attempts")]
    NotPossibleYet { attempts: u32 },

    #[error("Invalid Picture-in-Picture state: {state} (expected {expected})")]
    InvalidState { state: String, expected: &'static str },

    // Session errors
    #[error("No active session: {0}")]
    NoActiveSession(SessionId),

    #[error("No alternate view attached to session {session}")]
    NoAlternateView { session: SessionId },

    #[error("View {view} does not own the media controls")]
    OwnershipConflict { view: ViewId },

    #[error("View has been detached")]
    ViewDetached,

    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a load failure from any displayable cause
    pub fn load(msg: impl Into<String>) -> Self {
        Error::LoadFailed(msg.into())
    }

    /// Returns true if the session stays usable and the operation may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::LoadFailed(_)
                | Error::NotPossibleYet { .. }
                | Error::ManifestFetch(_)
                | Error::Network(_)
        )
    }

    /// Returns the error code reported alongside `error` events
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::LoadFailed(_) => "LOAD_FAILED",
            Error::NotSupported(_) => "NOT_SUPPORTED",
            Error::NotPossibleYet { .. } => "NOT_POSSIBLE_YET",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::NoActiveSession(_) => "NO_ACTIVE_SESSION",
            Error::NoAlternateView { .. } => "NO_ALTERNATE_VIEW",
            Error::OwnershipConflict { .. } => "OWNERSHIP_CONFLICT",
            Error::ViewDetached => "VIEW_DETACHED",
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::InvalidManifest(_) => "INVALID_MANIFEST",
            Error::Network(_) => "NETWORK",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Io(_) => "IO",
            Error::Internal(_) => "INTERNAL",
        }
    }
}
