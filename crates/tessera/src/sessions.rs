//! `Sessions` builder and the request-level API.
//!
//! This ties the layers together: headers → transport → manager → store,
//! and back out to response headers.

use std::marker::PhantomData;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tessera_session::{
    Manager, Session, SessionConfig, SessionError, SessionToken, Store, StoreError, UserId,
};
use tessera_transport::{Grant, Transport, TransportError};

use crate::TesseraError;
use crate::client::client_info;

/// Facade-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub session: SessionConfig,
    /// Read the client IP from `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a proxy that overwrites them.
    pub trust_forwarded_headers: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            trust_forwarded_headers: true,
        }
    }
}

/// Builder for [`Sessions`].
///
/// # Example
///
/// ```rust
/// use tessera::prelude::*;
///
/// let sessions: Sessions<(), MemoryStore<()>, JwtTransport> = Sessions::builder()
///     .store(MemoryStore::new())
///     .transport(JwtTransport::new(JwtConfig::default(), b"secret"))
///     .build()?;
/// # Ok::<(), TesseraError>(())
/// ```
pub struct SessionsBuilder<D, S, T> {
    store: Option<S>,
    transport: Option<T>,
    config: SessionsConfig,
    _data: PhantomData<fn() -> D>,
}

impl<D, S, T> SessionsBuilder<D, S, T> {
    pub fn new() -> Self {
        Self {
            store: None,
            transport: None,
            config: SessionsConfig::default(),
            _data: PhantomData,
        }
    }

    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: SessionsConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for replacing only the session part of the config.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }
}

impl<D, S, T> SessionsBuilder<D, S, T>
where
    D: Clone + Default + Send + Sync + 'static,
    S: Store<D>,
    T: Transport,
{
    /// # Errors
    /// - [`TesseraError::Config`] if the store or transport is missing
    /// - [`TesseraError::Session`] if the session config is invalid
    pub fn build(self) -> Result<Sessions<D, S, T>, TesseraError> {
        let store = self
            .store
            .ok_or_else(|| TesseraError::Config("a session store is required".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| TesseraError::Config("a transport is required".into()))?;
        let manager = Manager::new(store, self.config.session.clone())?;

        Ok(Sessions {
            manager,
            transport,
            trust_forwarded_headers: self.config.trust_forwarded_headers,
        })
    }
}

impl<D, S, T> Default for SessionsBuilder<D, S, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sessions for HTTP requests: one [`Manager`] plus one [`Transport`].
///
/// Every operation reads the inbound request headers; the ones that change
/// what the client holds also write to the outbound response headers.
pub struct Sessions<D, S, T> {
    manager: Manager<D, S>,
    transport: T,
    trust_forwarded_headers: bool,
}

impl<D, S, T> Sessions<D, S, T> {
    pub fn builder() -> SessionsBuilder<D, S, T> {
        SessionsBuilder::new()
    }

    pub fn manager(&self) -> &Manager<D, S> {
        &self.manager
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<D, S, T> Sessions<D, S, T>
where
    D: Clone + Default + Send + Sync + 'static,
    S: Store<D>,
    T: Transport,
{
    /// Resolves the request's session, minting an anonymous one when the
    /// request has no valid credential.
    ///
    /// A new session exists only in the store until it is put on the wire
    /// with [`save`](Self::save).
    ///
    /// # Errors
    /// Infrastructure failures only: store or revocation backend down.
    pub async fn load(&self, req: &HeaderMap) -> Result<Session<D>, TesseraError> {
        let token = self.extract(req).await?;
        let client = client_info(req, self.trust_forwarded_headers);
        Ok(self.manager.load(token.as_ref(), &client).await?)
    }

    /// Persists `session` and reflects it on the wire.
    pub async fn save(
        &self,
        resp: &mut HeaderMap,
        session: Session<D>,
    ) -> Result<Session<D>, TesseraError> {
        let session = self.manager.save(session).await?;
        self.transport.persist(resp, Grant::from(&session))?;
        Ok(session)
    }

    /// Best-effort sliding expiry. Never fails: store and wire errors are
    /// logged and the session is returned as it stands.
    ///
    /// The wire credential is re-persisted even if this call didn't move the
    /// expiry, since [`load`](Self::load) may already have.
    pub async fn touch(&self, resp: &mut HeaderMap, session: Session<D>) -> Session<D> {
        let session = self.manager.touch(session).await;
        if let Err(e) = self.transport.persist(resp, Grant::from(&session)) {
            tracing::warn!(
                session_id = %session.id,
                error = %e,
                "failed to persist touched session"
            );
        }
        session
    }

    /// Logs the request's session in as `user_id` and issues a new
    /// credential for the rotated token.
    ///
    /// # Errors
    /// [`SessionError::InvalidUserId`](tessera_session::SessionError::InvalidUserId)
    /// for the nil user, plus store and transport failures.
    pub async fn authenticate(
        &self,
        req: &HeaderMap,
        resp: &mut HeaderMap,
        user_id: UserId,
        data: Option<D>,
    ) -> Result<(Session<D>, T::Issued), TesseraError> {
        let session = self.load(req).await?;
        let session = self.manager.authenticate(session, user_id, data).await?;
        let issued = self.transport.embed(resp, Grant::from(&session))?;
        Ok((session, issued))
    }

    /// Rotates the token of the request's authenticated session.
    ///
    /// The request must carry the transport's refresh credential, which for
    /// JWTs is the refresh token; an access token is refused.
    ///
    /// # Errors
    /// [`SessionError::NotAuthenticated`](tessera_session::SessionError::NotAuthenticated)
    /// when the request carries no usable refresh credential or no
    /// authenticated session.
    pub async fn refresh(
        &self,
        req: &HeaderMap,
        resp: &mut HeaderMap,
    ) -> Result<(Session<D>, T::Issued), TesseraError> {
        let Some(token) = usable(self.transport.extract_refresh(req).await)? else {
            return Err(SessionError::NotAuthenticated.into());
        };
        let client = client_info(req, self.trust_forwarded_headers);
        let session = self.manager.load(Some(&token), &client).await?;
        let session = self.manager.refresh(session).await?;
        let issued = self.transport.embed(resp, Grant::from(&session))?;
        Ok((session, issued))
    }

    /// Ends the request's session and issues an anonymous one on the same
    /// device.
    pub async fn logout(
        &self,
        req: &HeaderMap,
        resp: &mut HeaderMap,
    ) -> Result<(Session<D>, T::Issued), TesseraError> {
        self.logout_with(req, resp, |_| D::default()).await
    }

    /// Like [`logout`](Self::logout), keeping whatever `preserve` projects
    /// out of the old payload.
    pub async fn logout_with<F>(
        &self,
        req: &HeaderMap,
        resp: &mut HeaderMap,
        preserve: F,
    ) -> Result<(Session<D>, T::Issued), TesseraError>
    where
        F: FnOnce(&D) -> D + Send,
    {
        let session = self.load(req).await?;
        let old_token = session.token.clone();
        let fresh = self.manager.logout_with(session, preserve).await?;

        if let Err(e) = self.transport.revoke(resp, &old_token).await {
            tracing::warn!(
                session_id = %fresh.id,
                error = %e,
                "failed to revoke credential on logout"
            );
        }
        let issued = self.transport.embed(resp, Grant::from(&fresh))?;
        Ok((fresh, issued))
    }

    /// Deletes the request's session for good and revokes its credential.
    /// A request without a usable credential only gets told to drop
    /// whatever it sent.
    pub async fn delete(&self, req: &HeaderMap, resp: &mut HeaderMap) -> Result<(), TesseraError> {
        let Some(token) = self.extract(req).await? else {
            self.transport.clear(resp)?;
            return Ok(());
        };

        match self.manager.store().get_by_token(&token).await {
            Ok(session) => self.manager.delete(session.id).await?,
            Err(StoreError::NotFound) => {
                tracing::debug!("delete requested for unknown session");
            }
            Err(e) => return Err(e.into()),
        }
        self.transport.revoke(resp, &token).await?;
        Ok(())
    }

    /// Sweeps expired records from the store.
    pub async fn cleanup_expired(&self) -> Result<u64, TesseraError> {
        Ok(self.manager.cleanup_expired().await?)
    }

    async fn extract(&self, req: &HeaderMap) -> Result<Option<SessionToken>, TesseraError> {
        usable(self.transport.extract(req).await)
    }
}

/// Credential problems read as "no token"; only infrastructure errors
/// propagate.
fn usable(
    extracted: Result<SessionToken, TransportError>,
) -> Result<Option<SessionToken>, TesseraError> {
    match extracted {
        Ok(token) => Ok(Some(token)),
        Err(e) if e.is_credential_error() => {
            tracing::debug!(error = %e, "no usable credential on request");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
