use tessera_session::StoreError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request carries no usable credential (absent, unsigned, or
    /// tampered cookie; missing header).
    #[error("no session token in request")]
    NoToken,

    /// A credential was present but failed verification or was revoked.
    #[error("invalid session token")]
    InvalidToken,

    /// Refused to put an already-expired session on the wire.
    #[error("session already expired")]
    Expired,

    /// Building the wire credential failed.
    #[error("transport failed: {0}")]
    Failed(String),

    /// The revocation backend could not be reached.
    #[error("revocation check failed: {0}")]
    Revoker(#[source] StoreError),
}

impl TransportError {
    /// `true` for failures that only mean "this request has no valid
    /// credential", as opposed to infrastructure trouble.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::NoToken | Self::InvalidToken | Self::Expired)
    }
}
