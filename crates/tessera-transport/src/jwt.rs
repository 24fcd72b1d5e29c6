//! Bearer-JWT transport.
//!
//! The session token becomes the `jti` claim of two HS256 tokens: a
//! short-lived access token and a refresh token that lives as long as the
//! session. Every request re-resolves the `jti` against the store, so a
//! deleted session stops working even while its JWT is still within `exp`.
//!
//! A `typ` claim keeps the two apart: [`extract`](Transport::extract) takes
//! only access tokens, [`extract_refresh`](Transport::extract_refresh) only
//! refresh tokens.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tessera_session::{Revoker, SessionToken, StoreError};

use crate::{Grant, Transport, TransportError};

/// Issuer, audience, and lifetime settings for issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub issuer: String,
    /// Checked on extract only when set.
    pub audience: Option<String>,
    /// Access-token lifetime, clamped to the session's own expiry.
    pub access_ttl: Duration,
    pub header_name: String,
    pub header_prefix: String,
    /// Clock skew tolerated when checking `exp`.
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "tessera".into(),
            audience: None,
            access_ttl: Duration::from_secs(15 * 60),
            header_name: "authorization".into(),
            header_prefix: "Bearer ".into(),
            leeway_secs: 0,
        }
    }
}

/// Which of the pair a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// Claims carried by both access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// The session token.
    pub jti: String,
    /// User id; the nil UUID for anonymous sessions.
    pub sub: String,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenUse,
}

/// What [`JwtTransport::embed`](Transport::embed) hands to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    /// When the refresh token (and the session) expires.
    pub expires_at: DateTime<Utc>,
}

/// Placeholder revoker for a [`JwtTransport`] without a blacklist. Has no
/// values, so it can never actually be called.
#[derive(Debug)]
pub enum NoRevoker {}

impl Revoker for NoRevoker {
    async fn is_revoked(&self, _jti: &str) -> Result<bool, StoreError> {
        match *self {}
    }

    async fn revoke(&self, _jti: &str) -> Result<(), StoreError> {
        match *self {}
    }
}

/// A [`Transport`] that issues and verifies HS256 bearer tokens.
pub struct JwtTransport<R = NoRevoker> {
    config: JwtConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    revoker: Option<R>,
}

impl JwtTransport {
    pub fn new(config: JwtConfig, secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = config.leeway_secs;
        match &config.audience {
            Some(aud) => validation.set_audience(&[aud.as_str()]),
            None => validation.validate_aud = false,
        }

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            config,
            revoker: None,
        }
    }
}

impl<R> JwtTransport<R> {
    /// Rejects every `jti` that `revoker` reports as revoked, and blacklists
    /// the `jti` on [`revoke`](Transport::revoke).
    pub fn with_revoker<R2: Revoker>(self, revoker: R2) -> JwtTransport<R2> {
        JwtTransport {
            config: self.config,
            encoding: self.encoding,
            decoding: self.decoding,
            validation: self.validation,
            revoker: Some(revoker),
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn revoker(&self) -> Option<&R> {
        self.revoker.as_ref()
    }

    /// Checks signature, issuer, audience, and expiry. Does not consult the
    /// revoker.
    ///
    /// # Errors
    /// [`TransportError::InvalidToken`] on any verification failure.
    pub fn verify(&self, token: &str) -> Result<JwtClaims, TransportError> {
        decode::<JwtClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                TransportError::InvalidToken
            })
    }

    fn sign(
        &self,
        grant: &Grant<'_>,
        typ: TokenUse,
        now: DateTime<Utc>,
        exp: DateTime<Utc>,
    ) -> Result<String, TransportError> {
        let claims = JwtClaims {
            jti: grant.token.as_str().to_owned(),
            sub: grant.user_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            typ,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TransportError::Failed(format!("failed to sign token: {e}")))
    }

    fn bearer<'h>(&self, headers: &'h HeaderMap) -> Option<&'h str> {
        let value = headers.get(self.config.header_name.as_str())?.to_str().ok()?;
        let token = value.strip_prefix(self.config.header_prefix.as_str())?.trim();
        (!token.is_empty()).then_some(token)
    }
}

impl<R: Revoker> JwtTransport<R> {
    async fn extract_as(
        &self,
        headers: &HeaderMap,
        typ: TokenUse,
    ) -> Result<SessionToken, TransportError> {
        let raw = self.bearer(headers).ok_or(TransportError::NoToken)?;
        let claims = self.verify(raw)?;
        if claims.typ != typ {
            tracing::debug!(
                expected = ?typ,
                got = ?claims.typ,
                "rejected bearer token of the wrong type"
            );
            return Err(TransportError::InvalidToken);
        }

        if let Some(revoker) = &self.revoker {
            match revoker.is_revoked(&claims.jti).await {
                Ok(false) => {}
                Ok(true) => {
                    tracing::debug!("rejected revoked bearer token");
                    return Err(TransportError::InvalidToken);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "revocation check failed");
                    return Err(TransportError::Revoker(e));
                }
            }
        }

        Ok(SessionToken::from(claims.jti))
    }
}

impl<R: Revoker> Transport for JwtTransport<R> {
    type Issued = TokenPair;

    async fn extract(&self, headers: &HeaderMap) -> Result<SessionToken, TransportError> {
        self.extract_as(headers, TokenUse::Access).await
    }

    async fn extract_refresh(&self, headers: &HeaderMap) -> Result<SessionToken, TransportError> {
        self.extract_as(headers, TokenUse::Refresh).await
    }

    fn embed(
        &self,
        _headers: &mut HeaderMap,
        grant: Grant<'_>,
    ) -> Result<TokenPair, TransportError> {
        let now = Utc::now();
        grant.remaining_secs_at(now)?;

        let access_ttl = TimeDelta::from_std(self.config.access_ttl).unwrap_or(TimeDelta::MAX);
        let access_exp = now
            .checked_add_signed(access_ttl)
            .map_or(grant.expires_at, |exp| exp.min(grant.expires_at));

        Ok(TokenPair {
            access_token: self.sign(&grant, TokenUse::Access, now, access_exp)?,
            refresh_token: self.sign(&grant, TokenUse::Refresh, now, grant.expires_at)?,
            token_type: "Bearer".into(),
            expires_in: (access_exp - now).num_seconds(),
            expires_at: grant.expires_at,
        })
    }

    /// Bearer tokens are self-contained; nothing to re-send.
    fn persist(&self, _headers: &mut HeaderMap, _grant: Grant<'_>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn revoke(
        &self,
        _headers: &mut HeaderMap,
        token: &SessionToken,
    ) -> Result<(), TransportError> {
        match &self.revoker {
            Some(revoker) => revoker
                .revoke(token.as_str())
                .await
                .map_err(TransportError::Revoker),
            None => Ok(()),
        }
    }
}
