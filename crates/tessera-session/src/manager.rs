//! The session manager: drives every lifecycle transition through a
//! [`Store`].
//!
//! It is responsible for:
//! - Resolving a token to a live session, or minting an anonymous one
//! - Rotating tokens on authenticate / refresh / logout
//! - Throttled touches that keep active sessions alive without a store
//!   write on every request
//! - Hard deletes and the expired-record sweep
//!
//! # Concurrency note
//!
//! The manager holds no mutable state of its own. Every method takes
//! `&self` and works on an owned `Session` copy that the caller passes
//! in or gets back. Two requests racing on the same session each see their
//! own copy; the store keeps whichever write lands last.

use std::marker::PhantomData;

use chrono::Utc;

use crate::{
    ClientInfo, DeviceId, NewSession, Session, SessionConfig, SessionError, SessionId,
    SessionToken, Store, StoreError, UserId,
};

/// Orchestrates session lifecycles on top of a [`Store`].
///
/// ## Lifecycle
///
/// ```text
/// load(None) ──→ create() ──→ [Anonymous] ──authenticate()──→ [Authenticated]
///                                  ↑                                │  ↑
///                                  │                         refresh() │
///                                  └──────────logout()──────────────┘──┘
///
/// load(token) on an expired record ──→ create(same device) ──→ [Anonymous]
/// delete() / cleanup_expired()     ──→ record gone
/// ```
pub struct Manager<D, S> {
    store: S,
    config: SessionConfig,
    _data: PhantomData<fn() -> D>,
}

impl<D, S> Manager<D, S>
where
    D: Clone + Default + Send + Sync + 'static,
    S: Store<D>,
{
    /// Creates a manager over `store`.
    ///
    /// # Errors
    /// [`SessionError::Config`] if the config is unusable (zero ttl).
    pub fn new(store: S, config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            _data: PhantomData,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolves `token` to a live session, always returning something usable.
    ///
    /// Missing, unknown, and expired tokens all degrade to a fresh anonymous
    /// session, so callers can't tell those cases apart. An expired
    /// session's device id carries over to its replacement. Live sessions
    /// pick up the client's current IP / User-Agent and get a throttled
    /// touch.
    ///
    /// # Errors
    /// Only infrastructure failures (store unreachable), and
    /// [`SessionError::MissingIp`] when a new session can't be created.
    pub async fn load(
        &self,
        token: Option<&SessionToken>,
        client: &ClientInfo,
    ) -> Result<Session<D>, SessionError> {
        let Some(token) = token else {
            return self.create(client, None).await;
        };

        match self.store.get_by_token(token).await {
            Ok(session) if session.is_expired() => {
                tracing::debug!(
                    session_id = %session.id,
                    device_id = %session.device_id,
                    "session expired, issuing anonymous replacement"
                );
                self.discard(session.id).await;
                self.create(client, Some(session.device_id)).await
            }
            Ok(mut session) => {
                let change = session.observe(client);
                if change.ip_changed {
                    tracing::warn!(
                        session_id = %session.id,
                        device_id = %session.device_id,
                        ip = ?session.ip,
                        "client IP changed for session"
                    );
                }
                Ok(self.touch_or_write(session, change.updated).await)
            }
            Err(StoreError::NotFound) => {
                tracing::debug!("unknown session token, issuing anonymous session");
                self.create(client, None).await
            }
            Err(e) => Err(SessionError::store("failed to load session", e)),
        }
    }

    /// Mints and persists an anonymous session.
    ///
    /// `device_id` carries a device over from an earlier session.
    pub async fn create(
        &self,
        client: &ClientInfo,
        device_id: Option<DeviceId>,
    ) -> Result<Session<D>, SessionError> {
        let params = NewSession {
            client: client.clone(),
            device_id,
            require_ip: self.config.require_ip,
        };
        let session = Session::new(&params, self.config.ttl)?;

        self.store
            .save(&session)
            .await
            .map_err(|e| SessionError::store("failed to create session", e))?;

        tracing::info!(
            session_id = %session.id,
            device_id = %session.device_id,
            "session created"
        );
        Ok(session)
    }

    /// Looks up a session by id, for audit trails and admin tooling.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if no such record exists
    /// - [`SessionError::Expired`] if it exists but has expired
    pub async fn get_by_id(&self, id: SessionId) -> Result<Session<D>, SessionError> {
        let session = self.store.get_by_id(id).await.map_err(|e| match e {
            StoreError::NotFound => SessionError::NotFound,
            e => SessionError::store("failed to load session", e),
        })?;
        if session.is_expired() {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Stamps `updated_at` and persists the session.
    ///
    /// The returned session's [`remaining`](Session::remaining) is the TTL a
    /// transport should advertise.
    pub async fn save(&self, mut session: Session<D>) -> Result<Session<D>, SessionError> {
        session.updated_at = Utc::now();
        self.store
            .save(&session)
            .await
            .map_err(|e| SessionError::store("failed to save session", e))?;
        Ok(session)
    }

    /// Extends the session's expiry if the touch interval has passed.
    ///
    /// Best effort: if the store write fails, the failure is logged and the
    /// session comes back exactly as it went in.
    pub async fn touch(&self, session: Session<D>) -> Session<D> {
        self.touch_or_write(session, false).await
    }

    /// Touches `session`, and writes it even inside the touch interval when
    /// `dirty` says its client info changed. A client-only write leaves
    /// `updated_at` alone so the touch throttle keeps its schedule.
    async fn touch_or_write(&self, mut session: Session<D>, dirty: bool) -> Session<D> {
        let (expires_at, updated_at) = (session.expires_at, session.updated_at);
        let touched = session.touch(self.config.ttl, self.config.touch_interval);
        if !touched && !dirty {
            return session;
        }

        match self.store.save(&session).await {
            Ok(()) => {
                tracing::debug!(session_id = %session.id, touched, "session written on access");
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "failed to touch session"
                );
                session.expires_at = expires_at;
                session.updated_at = updated_at;
            }
        }
        session
    }

    /// Binds `session` to `user_id`, rotating its token and restarting its
    /// lifetime. Device, client info, and data are kept unless `data` is
    /// given.
    ///
    /// # Errors
    /// - [`SessionError::InvalidUserId`] for the nil user id
    /// - [`SessionError::TokenGeneration`] if no token could be minted
    /// - wrapped store errors
    pub async fn authenticate(
        &self,
        mut session: Session<D>,
        user_id: UserId,
        data: Option<D>,
    ) -> Result<Session<D>, SessionError> {
        session.authenticate(user_id, data)?;
        session.renew(self.config.ttl);
        let session = self.save(session).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            device_id = %session.device_id,
            "session authenticated"
        );
        Ok(session)
    }

    /// Rotates the token of an authenticated session.
    ///
    /// # Errors
    /// [`SessionError::NotAuthenticated`] on an anonymous session.
    pub async fn refresh(&self, mut session: Session<D>) -> Result<Session<D>, SessionError> {
        session.refresh()?;
        let session = self.save(session).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            "session token refreshed"
        );
        Ok(session)
    }

    /// Ends the session and hands back a fresh anonymous one on the same
    /// device. The old payload is dropped.
    pub async fn logout(&self, session: Session<D>) -> Result<Session<D>, SessionError> {
        self.logout_with(session, |_| D::default()).await
    }

    /// Like [`logout`](Self::logout), but `preserve` projects the old payload
    /// into the new session, e.g. to keep a theme while dropping
    /// permissions.
    ///
    /// Deleting the old record is best effort. A failure there doesn't stop
    /// the logout.
    pub async fn logout_with<F>(
        &self,
        session: Session<D>,
        preserve: F,
    ) -> Result<Session<D>, SessionError>
    where
        F: FnOnce(&D) -> D + Send,
    {
        let params = NewSession {
            client: ClientInfo::new(session.ip, session.user_agent.clone()),
            device_id: Some(session.device_id),
            require_ip: self.config.require_ip,
        };
        let mut fresh = Session::new(&params, self.config.ttl)?;
        fresh.data = preserve(&session.data);

        self.discard(session.id).await;
        self.store
            .save(&fresh)
            .await
            .map_err(|e| SessionError::store("failed to save session", e))?;

        tracing::info!(
            old_session_id = %session.id,
            session_id = %fresh.id,
            device_id = %fresh.device_id,
            "session logged out"
        );
        Ok(fresh)
    }

    /// Removes a session for good. An already-absent record is success.
    pub async fn delete(&self, id: SessionId) -> Result<(), SessionError> {
        match self.store.delete(id).await {
            Ok(()) | Err(StoreError::NotFound) => {
                tracing::info!(session_id = %id, "session deleted");
                Ok(())
            }
            Err(e) => Err(SessionError::store("failed to delete session", e)),
        }
    }

    /// Sweeps expired records out of the store. Meant to be driven by an
    /// external scheduler; the manager never runs timers itself.
    pub async fn cleanup_expired(&self) -> Result<u64, SessionError> {
        let removed = self
            .store
            .delete_expired()
            .await
            .map_err(|e| SessionError::store("failed to delete expired sessions", e))?;
        tracing::info!(removed, "expired sessions swept");
        Ok(removed)
    }

    /// Best-effort delete used on transitions that replace a record.
    async fn discard(&self, id: SessionId) {
        match self.store.delete(id).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "failed to delete old session");
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `Manager`.
    //!
    //! Naming follows `test_{function}_{scenario}_{expected}`. Expiry is
    //! simulated by writing a past `expires_at` straight into the store
    //! rather than sleeping.

    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::TimeDelta;
    use uuid::Uuid;

    use super::*;
    use crate::MemoryStore;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct AppData {
        theme: String,
        roles: Vec<String>,
    }

    type TestManager = Manager<AppData, MemoryStore<AppData>>;

    // -- Helpers ----------------------------------------------------------

    /// Manager whose sessions live an hour and touch on every access.
    fn manager() -> TestManager {
        manager_with(SessionConfig {
            ttl: Duration::from_secs(3600),
            touch_interval: Duration::ZERO,
            require_ip: false,
        })
    }

    fn manager_with(config: SessionConfig) -> TestManager {
        Manager::new(MemoryStore::new(), config).expect("valid config")
    }

    fn client() -> ClientInfo {
        ClientInfo::new(
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
            Some("test-agent".into()),
        )
    }

    fn uid() -> UserId {
        UserId(Uuid::new_v4())
    }

    /// Store that can be told to fail reads, writes, or deletes.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemoryStore<AppData>,
        fail_reads: Arc<AtomicBool>,
        fail_writes: Arc<AtomicBool>,
        fail_deletes: Arc<AtomicBool>,
    }

    fn down() -> StoreError {
        StoreError::backend("connection refused")
    }

    impl Store<AppData> for FlakyStore {
        async fn get_by_token(&self, token: &SessionToken) -> Result<Session<AppData>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(down());
            }
            self.inner.get_by_token(token).await
        }

        async fn get_by_id(&self, id: SessionId) -> Result<Session<AppData>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(down());
            }
            self.inner.get_by_id(id).await
        }

        async fn save(&self, session: &Session<AppData>) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(down());
            }
            self.inner.save(session).await
        }

        async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(down());
            }
            self.inner.delete(id).await
        }

        async fn delete_expired(&self) -> Result<u64, StoreError> {
            self.inner.delete_expired().await
        }
    }

    fn flaky_manager(store: FlakyStore) -> Manager<AppData, FlakyStore> {
        Manager::new(
            store,
            SessionConfig {
                ttl: Duration::from_secs(3600),
                touch_interval: Duration::ZERO,
                require_ip: false,
            },
        )
        .unwrap()
    }

    // =====================================================================
    // new()
    // =====================================================================

    #[test]
    fn test_new_zero_ttl_returns_config_error() {
        let result = Manager::<AppData, _>::new(
            MemoryStore::new(),
            SessionConfig {
                ttl: Duration::ZERO,
                ..SessionConfig::default()
            },
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    // =====================================================================
    // load()
    // =====================================================================

    #[tokio::test]
    async fn test_load_without_token_creates_and_persists_anonymous() {
        let mgr = manager();

        let session = mgr.load(None, &client()).await.expect("should load");

        assert!(!session.is_authenticated());
        assert_eq!(session.ip, client().ip);
        let stored = mgr.store().get_by_token(&session.token).await.unwrap();
        assert_eq!(stored.id, session.id);
    }

    #[tokio::test]
    async fn test_load_unknown_token_creates_anonymous() {
        let mgr = manager();
        let bogus = SessionToken::from("forged");

        let session = mgr.load(Some(&bogus), &client()).await.unwrap();

        assert_ne!(session.token, bogus);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_load_live_token_returns_same_session() {
        let mgr = manager();
        let created = mgr.load(None, &client()).await.unwrap();

        let loaded = mgr.load(Some(&created.token), &client()).await.unwrap();

        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.token, created.token);
    }

    #[tokio::test]
    async fn test_load_expired_session_replaces_and_keeps_device() {
        let mgr = manager();
        let mut old = mgr.load(None, &client()).await.unwrap();
        old.expires_at = Utc::now() - TimeDelta::nanoseconds(1);
        mgr.store().save(&old).await.unwrap();

        let fresh = mgr.load(Some(&old.token), &client()).await.unwrap();

        assert_ne!(fresh.id, old.id);
        assert_ne!(fresh.token, old.token);
        assert_eq!(fresh.device_id, old.device_id);
        assert!(!fresh.is_expired());
        assert!(
            mgr.store().get_by_id(old.id).await.is_err(),
            "expired record should be discarded"
        );
    }

    #[tokio::test]
    async fn test_load_expired_authenticated_session_becomes_anonymous() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();
        let mut authed = mgr.authenticate(anon, uid(), None).await.unwrap();
        authed.expires_at = Utc::now() - TimeDelta::seconds(1);
        mgr.store().save(&authed).await.unwrap();

        let fresh = mgr.load(Some(&authed.token), &client()).await.unwrap();

        assert!(!fresh.is_authenticated());
        assert_eq!(fresh.device_id, authed.device_id);
    }

    #[tokio::test]
    async fn test_load_touches_live_session() {
        let mgr = manager();
        let mut session = mgr.load(None, &client()).await.unwrap();
        session.updated_at -= TimeDelta::minutes(10);
        session.expires_at = Utc::now() + TimeDelta::minutes(1);
        mgr.store().save(&session).await.unwrap();

        let loaded = mgr.load(Some(&session.token), &client()).await.unwrap();

        assert!(loaded.expires_at > session.expires_at);
        let stored = mgr.store().get_by_id(session.id).await.unwrap();
        assert_eq!(stored.expires_at, loaded.expires_at);
    }

    #[tokio::test]
    async fn test_load_new_ip_is_recorded() {
        let mgr = manager();
        let session = mgr.load(None, &client()).await.unwrap();
        let moved = ClientInfo::new(Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7))), None);

        let loaded = mgr.load(Some(&session.token), &moved).await.unwrap();

        assert_eq!(loaded.ip, moved.ip);
        assert_eq!(loaded.id, session.id);
    }

    #[tokio::test]
    async fn test_load_new_ip_is_persisted_within_touch_interval() {
        let mgr = manager_with(SessionConfig {
            ttl: Duration::from_secs(3600),
            touch_interval: Duration::from_secs(300),
            require_ip: false,
        });
        let session = mgr.load(None, &client()).await.unwrap();
        let moved = ClientInfo::new(
            Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7))),
            Some("other-agent".into()),
        );

        let loaded = mgr.load(Some(&session.token), &moved).await.unwrap();

        let stored = mgr.store().get_by_id(session.id).await.unwrap();
        assert_eq!(stored.ip, moved.ip);
        assert_eq!(stored.user_agent.as_deref(), Some("other-agent"));
        // Not a touch: the throttle clock and expiry stay put.
        assert_eq!(stored.updated_at, session.updated_at);
        assert_eq!(stored.expires_at, session.expires_at);
        assert_eq!(loaded.ip, moved.ip);
    }

    #[tokio::test]
    async fn test_load_new_ip_with_store_write_down_still_loads() {
        let store = FlakyStore::default();
        let mgr = Manager::new(
            store.clone(),
            SessionConfig {
                ttl: Duration::from_secs(3600),
                touch_interval: Duration::from_secs(300),
                require_ip: false,
            },
        )
        .unwrap();
        let session = mgr.load(None, &client()).await.unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);
        let moved = ClientInfo::new(Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7))), None);

        let loaded = mgr.load(Some(&session.token), &moved).await.unwrap();

        assert_eq!(loaded.ip, moved.ip);
        assert_eq!(loaded.expires_at, session.expires_at);
        let stored = store.inner.get_by_id(session.id).await.unwrap();
        assert_eq!(stored.ip, session.ip);
    }

    #[tokio::test]
    async fn test_load_missing_ip_when_required_returns_error() {
        let mgr = manager_with(SessionConfig {
            require_ip: true,
            ..SessionConfig::default()
        });

        let result = mgr.load(None, &ClientInfo::default()).await;

        assert!(matches!(result, Err(SessionError::MissingIp)));
    }

    #[tokio::test]
    async fn test_load_store_down_propagates_error() {
        let store = FlakyStore::default();
        let mgr = flaky_manager(store.clone());
        let session = mgr.load(None, &client()).await.unwrap();
        store.fail_reads.store(true, Ordering::SeqCst);

        let result = mgr.load(Some(&session.token), &client()).await;

        match result {
            Err(SessionError::Store { context, .. }) => {
                assert_eq!(context, "failed to load session");
            }
            other => panic!("expected store error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_load_concurrent_without_token_yields_unique_sessions() {
        let mgr = Arc::new(manager());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move {
                    let client = ClientInfo::default();
                    mgr.load(None, &client).await
                })
            })
            .collect();
        let sessions: Vec<_> = futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.expect("task should complete").expect("load should succeed"))
            .collect();

        let ids: HashSet<_> = sessions.iter().map(|s| s.id).collect();
        let tokens: HashSet<_> = sessions.iter().map(|s| s.token.clone()).collect();
        assert_eq!(ids.len(), 64);
        assert_eq!(tokens.len(), 64);
        assert!(sessions.iter().all(|s| !s.is_authenticated()));
        assert_eq!(mgr.store().len().await, 64);
    }

    // =====================================================================
    // get_by_id()
    // =====================================================================

    #[tokio::test]
    async fn test_get_by_id_unknown_returns_not_found() {
        let mgr = manager();

        let result = mgr.get_by_id(SessionId::new()).await;

        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_get_by_id_expired_returns_expired() {
        let mgr = manager();
        let mut session = mgr.load(None, &client()).await.unwrap();
        session.expires_at = Utc::now() - TimeDelta::seconds(1);
        mgr.store().save(&session).await.unwrap();

        let result = mgr.get_by_id(session.id).await;

        assert!(matches!(result, Err(SessionError::Expired)));
    }

    // =====================================================================
    // save() / touch()
    // =====================================================================

    #[tokio::test]
    async fn test_save_persists_data_and_stamps_updated_at() {
        let mgr = manager();
        let mut session = mgr.load(None, &client()).await.unwrap();
        let before = session.updated_at;
        session.data.theme = "dark".into();

        let saved = mgr.save(session).await.unwrap();

        assert!(saved.updated_at >= before);
        let stored = mgr.store().get_by_id(saved.id).await.unwrap();
        assert_eq!(stored.data.theme, "dark");
        assert!(saved.remaining().is_some());
    }

    #[tokio::test]
    async fn test_touch_within_interval_skips_store_write() {
        let store = FlakyStore::default();
        let mgr: Manager<AppData, FlakyStore> = Manager::new(
            store.clone(),
            SessionConfig {
                ttl: Duration::from_secs(3600),
                touch_interval: Duration::from_secs(300),
                require_ip: false,
            },
        )
        .unwrap();
        let session = mgr.load(None, &client()).await.unwrap();
        // Any write would now fail loudly, but none should happen.
        store.fail_writes.store(true, Ordering::SeqCst);

        let touched = mgr.touch(session.clone()).await;

        assert_eq!(touched.expires_at, session.expires_at);
        assert_eq!(touched.updated_at, session.updated_at);
    }

    #[tokio::test]
    async fn test_touch_store_failure_is_swallowed_and_rolled_back() {
        let store = FlakyStore::default();
        let mgr = flaky_manager(store.clone());
        let mut session = mgr.load(None, &client()).await.unwrap();
        session.updated_at -= TimeDelta::minutes(1);
        store.fail_writes.store(true, Ordering::SeqCst);

        let touched = mgr.touch(session.clone()).await;

        assert_eq!(touched.expires_at, session.expires_at);
        assert_eq!(touched.updated_at, session.updated_at);
    }

    #[tokio::test]
    async fn test_load_touch_failure_does_not_fail_load() {
        let store = FlakyStore::default();
        let mgr = flaky_manager(store.clone());
        let session = mgr.load(None, &client()).await.unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);

        let loaded = mgr.load(Some(&session.token), &client()).await;

        assert_eq!(loaded.expect("load should survive").id, session.id);
    }

    // =====================================================================
    // authenticate()
    // =====================================================================

    #[tokio::test]
    async fn test_authenticate_rotates_token_and_preserves_identity() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();
        let user = uid();

        let authed = mgr.authenticate(anon.clone(), user, None).await.unwrap();

        assert_eq!(authed.user_id, user);
        assert_ne!(authed.token, anon.token);
        assert_eq!(authed.id, anon.id);
        assert_eq!(authed.device_id, anon.device_id);
        assert_eq!(authed.ip, anon.ip);
        assert_eq!(authed.user_agent, anon.user_agent);
        assert!(
            mgr.store().get_by_token(&anon.token).await.is_err(),
            "pre-login token must stop resolving"
        );
        let stored = mgr.store().get_by_token(&authed.token).await.unwrap();
        assert_eq!(stored.user_id, user);
    }

    #[tokio::test]
    async fn test_authenticate_keeps_data_unless_given() {
        let mgr = manager();
        let mut anon = mgr.load(None, &client()).await.unwrap();
        anon.data.theme = "dark".into();

        let authed = mgr.authenticate(anon, uid(), None).await.unwrap();
        assert_eq!(authed.data.theme, "dark");

        let seeded = AppData {
            theme: "light".into(),
            roles: vec!["admin".into()],
        };
        let reauthed = mgr
            .authenticate(authed, uid(), Some(seeded.clone()))
            .await
            .unwrap();
        assert_eq!(reauthed.data, seeded);
    }

    #[tokio::test]
    async fn test_authenticate_nil_user_returns_invalid_user_id() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();

        let result = mgr.authenticate(anon.clone(), UserId::NIL, None).await;

        assert!(matches!(result, Err(SessionError::InvalidUserId)));
        assert!(mgr.store().get_by_token(&anon.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_store_down_wraps_error() {
        let store = FlakyStore::default();
        let mgr = flaky_manager(store.clone());
        let anon = mgr.load(None, &client()).await.unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);

        let err = mgr.authenticate(anon, uid(), None).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to save session: store backend failed: connection refused"
        );
    }

    // =====================================================================
    // refresh()
    // =====================================================================

    #[tokio::test]
    async fn test_refresh_anonymous_returns_not_authenticated() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();

        let result = mgr.refresh(anon).await;

        assert!(matches!(result, Err(SessionError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_token_keeps_user_and_device() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();
        let authed = mgr.authenticate(anon, uid(), None).await.unwrap();

        let refreshed = mgr.refresh(authed.clone()).await.unwrap();

        assert_ne!(refreshed.token, authed.token);
        assert_eq!(refreshed.user_id, authed.user_id);
        assert_eq!(refreshed.device_id, authed.device_id);
        assert!(mgr.store().get_by_token(&authed.token).await.is_err());
    }

    // =====================================================================
    // logout()
    // =====================================================================

    #[tokio::test]
    async fn test_logout_issues_new_anonymous_record_on_same_device() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();
        let authed = mgr
            .authenticate(
                anon,
                uid(),
                Some(AppData {
                    theme: "dark".into(),
                    roles: vec!["admin".into()],
                }),
            )
            .await
            .unwrap();

        let fresh = mgr.logout(authed.clone()).await.unwrap();

        assert!(!fresh.is_authenticated());
        assert_ne!(fresh.id, authed.id);
        assert_ne!(fresh.token, authed.token);
        assert_eq!(fresh.device_id, authed.device_id);
        assert_eq!(fresh.data, AppData::default());
        assert!(mgr.store().get_by_id(authed.id).await.is_err());
        assert!(mgr.store().get_by_id(fresh.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_with_projection_keeps_selected_fields() {
        let mgr = manager();
        let anon = mgr.load(None, &client()).await.unwrap();
        let authed = mgr
            .authenticate(
                anon,
                uid(),
                Some(AppData {
                    theme: "dark".into(),
                    roles: vec!["admin".into()],
                }),
            )
            .await
            .unwrap();

        let fresh = mgr
            .logout_with(authed, |old| AppData {
                theme: old.theme.clone(),
                roles: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(fresh.data.theme, "dark");
        assert!(fresh.data.roles.is_empty());
    }

    #[tokio::test]
    async fn test_logout_delete_failure_does_not_abort() {
        let store = FlakyStore::default();
        let mgr = flaky_manager(store.clone());
        let anon = mgr.load(None, &client()).await.unwrap();
        let authed = mgr.authenticate(anon, uid(), None).await.unwrap();
        store.fail_deletes.store(true, Ordering::SeqCst);

        let fresh = mgr.logout(authed.clone()).await.expect("logout should succeed");

        assert!(!fresh.is_authenticated());
        assert_eq!(fresh.device_id, authed.device_id);
    }

    // =====================================================================
    // delete() / cleanup_expired()
    // =====================================================================

    #[tokio::test]
    async fn test_delete_twice_is_success() {
        let mgr = manager();
        let session = mgr.load(None, &client()).await.unwrap();

        mgr.delete(session.id).await.expect("first delete");
        mgr.delete(session.id).await.expect("second delete is a no-op");

        assert!(mgr.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_store_down_returns_error() {
        let store = FlakyStore::default();
        let mgr = flaky_manager(store.clone());
        let session = mgr.load(None, &client()).await.unwrap();
        store.fail_deletes.store(true, Ordering::SeqCst);

        let result = mgr.delete(session.id).await;

        assert!(matches!(
            result,
            Err(SessionError::Store {
                context: "failed to delete session",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_expired_delegates_to_store() {
        let mgr = manager();
        let live = mgr.load(None, &client()).await.unwrap();
        let mut dead = mgr.load(None, &client()).await.unwrap();
        dead.expires_at = Utc::now() - TimeDelta::seconds(1);
        mgr.store().save(&dead).await.unwrap();

        let removed = mgr.cleanup_expired().await.unwrap();

        assert_eq!(removed, 1);
        assert!(mgr.get_by_id(live.id).await.is_ok());
        assert!(matches!(
            mgr.get_by_id(dead.id).await,
            Err(SessionError::NotFound)
        ));
    }

    // =====================================================================
    // Full lifecycle
    // =====================================================================

    #[tokio::test]
    async fn test_full_lifecycle_device_id_is_invariant() {
        let mgr = manager();

        let anon = mgr.load(None, &client()).await.unwrap();
        let device = anon.device_id;
        let authed = mgr.authenticate(anon, uid(), None).await.unwrap();
        let refreshed = mgr.refresh(authed).await.unwrap();
        let loaded = mgr.load(Some(&refreshed.token), &client()).await.unwrap();
        let out = mgr.logout(loaded).await.unwrap();

        assert_eq!(refreshed.device_id, device);
        assert_eq!(out.device_id, device);
        assert!(!out.is_authenticated());
        assert_eq!(mgr.store().len().await, 1);
    }
}
