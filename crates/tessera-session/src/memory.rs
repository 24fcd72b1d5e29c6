//! In-memory [`Store`] and [`Revoker`] for tests, demos, and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::{Revoker, Session, SessionId, SessionToken, Store, StoreError};

/// A [`Store`] backed by two hash maps behind an async `RwLock`.
///
/// Cloning is cheap and every clone shares the same data.
pub struct MemoryStore<D> {
    inner: Arc<RwLock<Inner<D>>>,
}

struct Inner<D> {
    /// All records, keyed by session id.
    sessions: HashMap<SessionId, Session<D>>,

    /// Token -> id index. Kept in sync with `sessions` so a rotated token
    /// stops resolving as soon as the new one is saved.
    tokens: HashMap<SessionToken, SessionId>,
}

impl<D> MemoryStore<D> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                sessions: HashMap::new(),
                tokens: HashMap::new(),
            })),
        }
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

impl<D> Default for MemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual Clone: derive would add a `D: Clone` bound.
impl<D> Clone for MemoryStore<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> Store<D> for MemoryStore<D>
where
    D: Clone + Send + Sync + 'static,
{
    async fn get_by_token(&self, token: &SessionToken) -> Result<Session<D>, StoreError> {
        let inner = self.inner.read().await;
        let id = inner.tokens.get(token).ok_or(StoreError::NotFound)?;
        inner.sessions.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: SessionId) -> Result<Session<D>, StoreError> {
        self.inner
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn save(&self, session: &Session<D>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        let old_token = inner
            .sessions
            .get(&session.id)
            .map(|old| old.token.clone());
        if let Some(old_token) = old_token.filter(|t| *t != session.token) {
            inner.tokens.remove(&old_token);
        }
        // A token belongs to at most one record. Steal it back from any
        // other id that still claims it.
        if let Some(prev) = inner.tokens.insert(session.token.clone(), session.id) {
            if prev != session.id {
                inner.sessions.remove(&prev);
            }
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.sessions.remove(&id).ok_or(StoreError::NotFound)?;
        inner.tokens.remove(&removed.token);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let Inner { sessions, tokens } = &mut *inner;

        let before = sessions.len();
        sessions.retain(|_, session| {
            if session.is_expired_at(now) {
                tokens.remove(&session.token);
                false
            } else {
                true
            }
        });
        Ok((before - sessions.len()) as u64)
    }
}

/// Default for [`MemoryRevoker::with_retention`]: a day, matching the
/// default session TTL.
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// A [`Revoker`] holding revoked JWT ids in a map, each stamped with when it
/// was revoked.
///
/// Entries are forgotten once older than the retention window, so the map
/// stays bounded by the revocation rate. The window must be at least the
/// session TTL: a revoked refresh token is valid for that long, and would
/// be accepted again once its entry is gone.
#[derive(Clone)]
pub struct MemoryRevoker {
    revoked: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    retention: TimeDelta,
}

impl Default for MemoryRevoker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryRevoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A revoker that remembers each id for `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            revoked: Arc::default(),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Number of ids currently held, stale ones included.
    pub async fn len(&self) -> usize {
        self.revoked.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.revoked.read().await.is_empty()
    }

    /// Drops entries older than the retention window. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    /// [`purge_expired`](Self::purge_expired) against an explicit clock
    /// reading.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut revoked = self.revoked.write().await;
        let before = revoked.len();
        revoked.retain(|_, at| self.live(*at, now));
        before - revoked.len()
    }

    async fn is_revoked_at(&self, jti: &str, now: DateTime<Utc>) -> bool {
        self.revoked
            .read()
            .await
            .get(jti)
            .is_some_and(|at| self.live(*at, now))
    }

    async fn revoke_at(&self, jti: &str, now: DateTime<Utc>) {
        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, at| self.live(*at, now));
        revoked.insert(jti.to_owned(), now);
    }

    fn live(&self, revoked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(revoked_at) < self.retention
    }
}

impl Revoker for MemoryRevoker {
    async fn is_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        Ok(self.is_revoked_at(jti, Utc::now()).await)
    }

    async fn revoke(&self, jti: &str) -> Result<(), StoreError> {
        self.revoke_at(jti, Utc::now()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{NewSession, UserId};

    const HOUR: Duration = Duration::from_secs(3600);

    fn session() -> Session<u32> {
        Session::new(&NewSession::default(), HOUR).unwrap()
    }

    #[tokio::test]
    async fn test_get_by_token_returns_independent_copy() {
        let store = MemoryStore::new();
        let s = session();
        store.save(&s).await.unwrap();

        let mut copy = store.get_by_token(&s.token).await.unwrap();
        copy.data = 42;

        let fresh = store.get_by_token(&s.token).await.unwrap();
        assert_eq!(fresh.data, 0, "store must not see unsaved mutations");
    }

    #[tokio::test]
    async fn test_get_by_token_unknown_returns_not_found() {
        let store = MemoryStore::<u32>::new();

        let result = store.get_by_token(&SessionToken::from("nope")).await;

        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_save_rotated_token_unindexes_old_token() {
        let store = MemoryStore::new();
        let mut s = session();
        store.save(&s).await.unwrap();
        let old = s.token.clone();

        s.authenticate(UserId(Uuid::new_v4()), None).unwrap();
        store.save(&s).await.unwrap();

        assert!(matches!(
            store.get_by_token(&old).await,
            Err(StoreError::NotFound)
        ));
        let found = store.get_by_token(&s.token).await.unwrap();
        assert_eq!(found.id, s.id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_token() {
        let store = MemoryStore::new();
        let s = session();
        store.save(&s).await.unwrap();

        store.delete(s.id).await.unwrap();

        assert!(store.is_empty().await);
        assert!(matches!(
            store.get_by_token(&s.token).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(store.delete(s.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_expired_removes_only_expired() {
        let store = MemoryStore::new();
        let live = session();
        let mut dead = session();
        dead.expires_at = Utc::now() - TimeDelta::seconds(1);
        store.save(&live).await.unwrap();
        store.save(&dead).await.unwrap();

        let removed = store.delete_expired().await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get_by_id(live.id).await.is_ok());
        assert!(matches!(
            store.get_by_token(&dead.token).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_revoker_tracks_revoked_ids() {
        let revoker = MemoryRevoker::new();
        assert!(!revoker.is_revoked("a").await.unwrap());

        revoker.revoke("a").await.unwrap();

        assert!(revoker.is_revoked("a").await.unwrap());
        assert!(!revoker.is_revoked("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoker_forgets_ids_past_retention() {
        let revoker = MemoryRevoker::with_retention(HOUR);
        let now = Utc::now();
        revoker.revoke_at("a", now).await;

        assert!(revoker.is_revoked_at("a", now + TimeDelta::minutes(59)).await);
        assert!(!revoker.is_revoked_at("a", now + TimeDelta::hours(1)).await);
    }

    #[tokio::test]
    async fn test_revoker_prunes_stale_ids_on_revoke() {
        let revoker = MemoryRevoker::with_retention(HOUR);
        let now = Utc::now();
        for i in 0..100 {
            revoker.revoke_at(&format!("old-{i}"), now).await;
        }
        assert_eq!(revoker.len().await, 100);

        revoker.revoke_at("new", now + TimeDelta::hours(2)).await;

        assert_eq!(revoker.len().await, 1);
        assert!(revoker.is_revoked_at("new", now + TimeDelta::hours(2)).await);
    }

    #[tokio::test]
    async fn test_revoker_purge_expired_counts_removed() {
        let revoker = MemoryRevoker::with_retention(HOUR);
        let now = Utc::now();
        revoker.revoke_at("fresh", now).await;
        revoker.revoke_at("stale", now - TimeDelta::hours(2)).await;
        assert_eq!(revoker.len().await, 2);

        assert_eq!(revoker.purge_expired_at(now).await, 1);
        assert_eq!(revoker.len().await, 1);
        assert!(revoker.is_revoked("fresh").await.unwrap());
        assert_eq!(revoker.purge_expired_at(now).await, 0);
    }
}
