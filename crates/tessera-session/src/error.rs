//! Error types for the session layer.

/// Errors raised by a [`Store`](crate::Store) or [`Revoker`](crate::Revoker).
///
/// Stores must report a missing record as [`StoreError::NotFound`] so the
/// manager can tell "nothing there" apart from "backend is down".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the given token or id.
    #[error("record not found")]
    NotFound,

    /// The backend failed (connection refused, timeout, corrupt row...).
    #[error("store backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps any backend error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

/// Errors that can occur during session management.
///
/// The unit variants double as sentinels: callers match on them directly
/// (`matches!(err, SessionError::NotAuthenticated)`) to decide between a
/// redirect to login, a 401, or a 500.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the given token or id.
    #[error("session not found")]
    NotFound,

    /// The session exists but its expiry has passed.
    #[error("session expired")]
    Expired,

    /// The operation needs an authenticated session but got an anonymous one.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// The deployment requires the client IP and none was supplied.
    #[error("client IP address is required")]
    MissingIp,

    /// The OS random number generator could not produce a token.
    #[error("failed to generate session token: {0}")]
    TokenGeneration(String),

    /// Authentication was attempted with the nil (anonymous) user id.
    #[error("invalid user id")]
    InvalidUserId,

    /// The session configuration is unusable.
    #[error("invalid session config: {0}")]
    Config(String),

    /// A store call failed. `context` names the operation that was running.
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    pub(crate) fn store(context: &'static str, source: StoreError) -> Self {
        Self::Store { context, source }
    }

    /// Returns `true` for [`SessionError::NotFound`] and for wrapped
    /// [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::Store {
                    source: StoreError::NotFound,
                    ..
                }
        )
    }
}
