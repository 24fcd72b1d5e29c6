//! Unified error type for Tessera.

use tessera_session::{SessionError, StoreError};
use tessera_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift sub-crate errors straight into
/// this type.
#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    /// Lifecycle failures: validation, preconditions, wrapped store errors.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Wire failures: bad credential, signing, revocation backend.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A direct store call failed.
    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    /// The facade was built with missing or invalid parts.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TesseraError {
    /// `true` if the error means "the session isn't there", at whichever
    /// layer that was noticed.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Session(e) => e.is_not_found(),
            Self::Store(StoreError::NotFound) => true,
            _ => false,
        }
    }
}
