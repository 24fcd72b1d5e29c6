//! Signed-cookie transport.
//!
//! The cookie value is the raw session token, HMAC-signed with a
//! [`Key`]. Nothing else about the session goes in the cookie; the store
//! stays the source of truth.

use ::cookie::time::Duration as CookieDuration;
use ::cookie::{Cookie, CookieBuilder, CookieJar, Key};
use chrono::Utc;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tessera_session::SessionToken;

use crate::{Grant, Transport, TransportError};

/// `SameSite` policy for the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl From<SameSite> for ::cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::Strict => Self::Strict,
            SameSite::Lax => Self::Lax,
            SameSite::None => Self::None,
        }
    }
}

/// Cookie attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    /// Send only over HTTPS. Turn off for plain-HTTP local development.
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "session".into(),
            secure: true,
            same_site: SameSite::Lax,
            path: "/".into(),
            domain: None,
        }
    }
}

/// A [`Transport`] that carries the token in a signed, `HttpOnly` cookie.
pub struct CookieTransport {
    key: Key,
    config: CookieConfig,
}

impl CookieTransport {
    pub fn new(key: Key, config: CookieConfig) -> Self {
        Self { key, config }
    }

    /// Builds the signing key from raw secret bytes.
    ///
    /// # Errors
    /// [`TransportError::Failed`] if the secret is shorter than 64 bytes.
    pub fn from_secret(secret: &[u8], config: CookieConfig) -> Result<Self, TransportError> {
        let key = Key::try_from(secret).map_err(|_| {
            TransportError::Failed("cookie secret must be at least 64 bytes".into())
        })?;
        Ok(Self::new(key, config))
    }

    pub fn config(&self) -> &CookieConfig {
        &self.config
    }

    fn builder(&self, value: String) -> CookieBuilder<'static> {
        let builder = Cookie::build((self.config.name.clone(), value))
            .http_only(true)
            .secure(self.config.secure)
            .same_site(self.config.same_site.into())
            .path(self.config.path.clone());
        match &self.config.domain {
            Some(domain) => builder.domain(domain.clone()),
            None => builder,
        }
    }

    fn set_cookie(&self, headers: &mut HeaderMap, grant: Grant<'_>) -> Result<(), TransportError> {
        let max_age = grant.remaining_secs_at(Utc::now())?;
        let cookie = self
            .builder(grant.token.as_str().to_owned())
            .max_age(CookieDuration::seconds(max_age))
            .build();

        let mut jar = CookieJar::new();
        jar.signed_mut(&self.key).add(cookie);
        let signed = jar
            .get(&self.config.name)
            .ok_or_else(|| TransportError::Failed("signed cookie missing from jar".into()))?;

        append(headers, signed)
    }
}

impl Transport for CookieTransport {
    type Issued = ();

    async fn extract(&self, headers: &HeaderMap) -> Result<SessionToken, TransportError> {
        let mut jar = CookieJar::new();
        for value in headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            for cookie in Cookie::split_parse_encoded(raw).flatten() {
                if cookie.name() == self.config.name {
                    jar.add_original(cookie.into_owned());
                }
            }
        }

        // Unsigned and tampered values fail verification and look exactly
        // like an absent cookie.
        let cookie = jar
            .signed(&self.key)
            .get(&self.config.name)
            .ok_or(TransportError::NoToken)?;
        if cookie.value().is_empty() {
            return Err(TransportError::NoToken);
        }
        Ok(SessionToken::from(cookie.value()))
    }

    fn embed(&self, headers: &mut HeaderMap, grant: Grant<'_>) -> Result<(), TransportError> {
        self.set_cookie(headers, grant)
    }

    /// Re-sets the cookie so its `Max-Age` follows the (possibly touched)
    /// expiry.
    fn persist(&self, headers: &mut HeaderMap, grant: Grant<'_>) -> Result<(), TransportError> {
        self.set_cookie(headers, grant)
    }

    /// Emits a removal cookie: empty value, `Max-Age=0`, same path and
    /// domain as the one being replaced.
    fn clear(&self, headers: &mut HeaderMap) -> Result<(), TransportError> {
        let mut removal = self.builder(String::new()).build();
        removal.make_removal();
        append(headers, &removal)
    }

    async fn revoke(
        &self,
        headers: &mut HeaderMap,
        _token: &SessionToken,
    ) -> Result<(), TransportError> {
        self.clear(headers)
    }
}

fn append(headers: &mut HeaderMap, cookie: &Cookie<'_>) -> Result<(), TransportError> {
    let value = HeaderValue::from_str(&cookie.encoded().to_string())
        .map_err(|e| TransportError::Failed(format!("invalid Set-Cookie header: {e}")))?;
    headers.append(SET_COOKIE, value);
    Ok(())
}
