//! Session types: the value that describes one client and its auth state.
//!
//! A session records:
//! - WHO the client is (`user_id`, nil while anonymous)
//! - WHICH device it is (`device_id`, survives every transition)
//! - HOW it proves itself (`token`, rotated on every transition)
//! - WHEN it stops being valid (`expires_at`, extended by touches)
//!
//! Sessions are plain values. Stores hand out clones, callers mutate their
//! own copy, and the manager writes it back. No two tasks ever share a
//! mutable `Session`.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeviceId, SessionError, SessionId, SessionToken, UserId};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Lifetime and capture settings shared by every session a manager creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a session lives after creation, authentication, or a touch.
    pub ttl: Duration,

    /// Minimum gap between two touches that write to the store.
    ///
    /// `0` means every access is eligible to touch.
    pub touch_interval: Duration,

    /// Reject session creation when the client IP is unknown.
    pub require_ip: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            touch_interval: Duration::from_secs(5 * 60),
            require_ip: false,
        }
    }
}

impl SessionConfig {
    /// Checks the config for values that would make every session useless.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.ttl.is_zero() {
            return Err(SessionError::Config("ttl must be greater than zero".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClientInfo / NewSession
// ---------------------------------------------------------------------------

/// Network identity of the client making the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }
}

/// What [`Session::observe`] noticed about the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientChange {
    /// A previously known IP was replaced by a different one. Callers treat
    /// this as a possible hijack signal.
    pub ip_changed: bool,
    /// The session's IP or User-Agent was modified and needs saving.
    pub updated: bool,
}

/// Parameters for [`Session::new`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub client: ClientInfo,
    /// Device to carry over from a previous session. A fresh one is
    /// generated when `None`.
    pub device_id: Option<DeviceId>,
    pub require_ip: bool,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Authentication state of a session.
///
/// ```text
///   Anonymous ──(authenticate)──→ Authenticated ──(refresh)──┐
///       ↑                              │   ↑                 │
///       └──────────(logout)────────────┘   └─────────────────┘
/// ```
///
/// Expiry detected on load sends either state back to a fresh
/// `Anonymous` record on the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::Authenticated => write!(f, "Authenticated"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client session carrying an application payload `D`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session<D> {
    pub id: SessionId,
    pub token: SessionToken,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub data: D,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<D: Default> Session<D> {
    /// Creates an anonymous session that lives for `ttl`.
    ///
    /// # Errors
    /// - [`SessionError::MissingIp`] if `params.require_ip` is set and no IP
    ///   was supplied
    /// - [`SessionError::TokenGeneration`] if no token could be minted
    pub fn new(params: &NewSession, ttl: Duration) -> Result<Self, SessionError> {
        if params.require_ip && params.client.ip.is_none() {
            return Err(SessionError::MissingIp);
        }

        let token = SessionToken::generate()?;
        let now = Utc::now();

        Ok(Self {
            id: SessionId::new(),
            token,
            user_id: UserId::NIL,
            device_id: params.device_id.unwrap_or_default(),
            ip: params.client.ip,
            user_agent: params.client.user_agent.clone(),
            data: D::default(),
            expires_at: expiry_from(now, ttl),
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns to anonymous in place: new token, nil user, default data.
    ///
    /// `id` and `device_id` are kept. The manager's logout issues a brand-new
    /// record instead; this is for callers that manage records themselves.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        let token = SessionToken::generate()?;
        self.token = token;
        self.user_id = UserId::NIL;
        self.data = D::default();
        Ok(())
    }
}

impl<D> Session<D> {
    /// Binds the session to `user_id` and rotates its token.
    ///
    /// `data`, when given, replaces the payload. Nothing is modified if the
    /// user id is nil or the token can't be generated.
    pub fn authenticate(&mut self, user_id: UserId, data: Option<D>) -> Result<(), SessionError> {
        if user_id.is_nil() {
            return Err(SessionError::InvalidUserId);
        }
        let token = SessionToken::generate()?;

        self.token = token;
        self.user_id = user_id;
        if let Some(data) = data {
            self.data = data;
        }
        Ok(())
    }

    /// Rotates the token without touching identity or data.
    ///
    /// # Errors
    /// [`SessionError::NotAuthenticated`] on an anonymous session.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        self.token = SessionToken::generate()?;
        Ok(())
    }

    /// Extends the expiry if the last update is at least `interval` old.
    ///
    /// Returns `true` when the session changed and needs persisting.
    pub fn touch(&mut self, ttl: Duration, interval: Duration) -> bool {
        self.touch_at(Utc::now(), ttl, interval)
    }

    /// [`touch`](Self::touch) against an explicit clock reading.
    pub fn touch_at(&mut self, now: DateTime<Utc>, ttl: Duration, interval: Duration) -> bool {
        if now - self.updated_at < to_delta(interval) {
            return false;
        }
        self.expires_at = expiry_from(now, ttl);
        self.updated_at = now;
        true
    }

    /// Restarts the lifetime: `expires_at = now + ttl`.
    pub fn renew(&mut self, ttl: Duration) {
        self.expires_at = expiry_from(Utc::now(), ttl);
    }

    /// Records the client's current IP and User-Agent.
    pub fn observe(&mut self, client: &ClientInfo) -> ClientChange {
        let mut change = ClientChange::default();
        if let Some(ip) = client.ip {
            if self.ip != Some(ip) {
                change.ip_changed = self.ip.is_some();
                change.updated = true;
                self.ip = Some(ip);
            }
        }
        if let Some(ua) = &client.user_agent {
            if self.user_agent.as_deref() != Some(ua.as_str()) {
                change.updated = true;
                self.user_agent = Some(ua.clone());
            }
        }
        change
    }

    pub fn state(&self) -> SessionState {
        if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_nil()
    }

    /// `true` once `now >= expires_at`. An unset (epoch) expiry is expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, or `None` if already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired_at(now) {
            return None;
        }
        (self.expires_at - now).to_std().ok()
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_delta(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
