//! Transport abstraction layer for Tessera.
//!
//! Provides the [`Transport`] trait, which moves a [`SessionToken`] between
//! HTTP headers and the session layer. Two implementations with very
//! different wire behavior sit behind it:
//!
//! - [`CookieTransport`]: the token itself, signed, in a cookie that is
//!   re-set whenever the session is saved
//! - [`JwtTransport`]: the token as the `jti` of short-lived bearer JWTs,
//!   optionally backed by a [`Revoker`](tessera_session::Revoker) blacklist
//!
//! Headers use the `http` crate's [`HeaderMap`], so any framework built on
//! `http` 1.x can plug in.
//!
//! # Feature Flags
//!
//! - `cookie` (default): signed-cookie transport via `cookie`
//! - `jwt` (default): bearer-token transport via `jsonwebtoken`

#[cfg(feature = "cookie")]
mod cookies;
mod error;
#[cfg(feature = "jwt")]
mod jwt;

#[cfg(feature = "cookie")]
pub use ::cookie::Key;
#[cfg(feature = "cookie")]
pub use cookies::{CookieConfig, CookieTransport, SameSite};
pub use error::TransportError;
#[cfg(feature = "jwt")]
pub use jwt::{JwtClaims, JwtConfig, JwtTransport, NoRevoker, TokenPair, TokenUse};

use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use http::HeaderMap;
use tessera_session::{Session, SessionToken, UserId};

/// The parts of a session a transport needs to put it on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Grant<'a> {
    pub token: &'a SessionToken,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl<'a, D> From<&'a Session<D>> for Grant<'a> {
    fn from(session: &'a Session<D>) -> Self {
        Self {
            token: &session.token,
            user_id: session.user_id,
            expires_at: session.expires_at,
        }
    }
}

impl Grant<'_> {
    /// Whole seconds until expiry, rounded up.
    ///
    /// # Errors
    /// [`TransportError::Expired`] if `now` is at or past the expiry.
    pub fn remaining_secs_at(&self, now: DateTime<Utc>) -> Result<i64, TransportError> {
        let left = self.expires_at - now;
        if left <= TimeDelta::zero() {
            return Err(TransportError::Expired);
        }
        let secs = left.num_seconds();
        if left > TimeDelta::seconds(secs) {
            Ok(secs + 1)
        } else {
            Ok(secs)
        }
    }
}

/// Moves session tokens between HTTP headers and the session layer.
pub trait Transport: Send + Sync + 'static {
    /// What [`embed`](Self::embed) hands back to the caller: `()` when the
    /// credential lives entirely in response headers, a token pair when the
    /// client must be given something to store.
    type Issued: Send;

    /// Reads the session token from request headers.
    ///
    /// # Errors
    /// - [`TransportError::NoToken`]: nothing usable present
    /// - [`TransportError::InvalidToken`]: present but rejected
    /// - [`TransportError::Revoker`]: the revocation check itself failed
    fn extract(
        &self,
        headers: &HeaderMap,
    ) -> impl Future<Output = Result<SessionToken, TransportError>> + Send;

    /// Reads the credential a client presents to rotate its token.
    ///
    /// Transports with a single credential accept the same one
    /// [`extract`](Self::extract) does. Transports that issue a separate
    /// refresh credential accept only that one here, and reject it in
    /// `extract`.
    ///
    /// # Errors
    /// Same as [`extract`](Self::extract).
    fn extract_refresh(
        &self,
        headers: &HeaderMap,
    ) -> impl Future<Output = Result<SessionToken, TransportError>> + Send {
        self.extract(headers)
    }

    /// Issues a fresh wire credential for `grant`. Called after the token
    /// changed (creation, authenticate, refresh, logout).
    fn embed(
        &self,
        headers: &mut HeaderMap,
        grant: Grant<'_>,
    ) -> Result<Self::Issued, TransportError>;

    /// Reflects a saved session on the wire without issuing a new
    /// credential. May be a no-op.
    fn persist(&self, headers: &mut HeaderMap, grant: Grant<'_>) -> Result<(), TransportError>;

    /// Tells the client to drop whatever credential it holds, without
    /// knowing which token that is. Used when the presented credential
    /// was unusable. A no-op for transports whose credentials the client
    /// manages itself.
    fn clear(&self, _headers: &mut HeaderMap) -> Result<(), TransportError> {
        Ok(())
    }

    /// Invalidates the wire credential for `token`.
    fn revoke(
        &self,
        headers: &mut HeaderMap,
        token: &SessionToken,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
