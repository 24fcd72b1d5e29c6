//! Persistence and revocation contracts.
//!
//! Tessera doesn't ship a database layer. That's your job (Redis,
//! Postgres, DynamoDB...). It defines the [`Store`] trait instead: five
//! async methods the [`Manager`](crate::Manager) calls to look sessions up
//! and write them back. [`Revoker`] is the optional fast-path blacklist the
//! JWT transport consults before any store lookup.
//!
//! # Contract
//!
//! - Every read returns an independent copy. Mutating the returned
//!   session must never affect what the store holds until `save` is called.
//! - `save` is an upsert keyed by [`SessionId`]. If the token changed, the
//!   old token must stop resolving.
//! - Missing records are reported as [`StoreError::NotFound`], never as a
//!   backend error.
//! - Writes are last-write-wins. Two requests racing on the same session
//!   may lose one update; the manager accepts that.
//!
//! Methods return `impl Future + Send` so implementations can use plain
//! `async fn` while the manager stays spawnable on a multi-threaded runtime.

use std::future::Future;

use crate::{Session, SessionId, SessionToken, StoreError};

/// Session persistence backend.
///
/// # Example
///
/// ```rust
/// use tessera_session::{Session, SessionId, SessionToken, Store, StoreError};
///
/// /// Remembers nothing. Every lookup misses.
/// struct NullStore;
///
/// impl Store<()> for NullStore {
///     async fn get_by_token(&self, _token: &SessionToken) -> Result<Session<()>, StoreError> {
///         Err(StoreError::NotFound)
///     }
///     async fn get_by_id(&self, _id: SessionId) -> Result<Session<()>, StoreError> {
///         Err(StoreError::NotFound)
///     }
///     async fn save(&self, _session: &Session<()>) -> Result<(), StoreError> {
///         Ok(())
///     }
///     async fn delete(&self, _id: SessionId) -> Result<(), StoreError> {
///         Err(StoreError::NotFound)
///     }
///     async fn delete_expired(&self) -> Result<u64, StoreError> {
///         Ok(0)
///     }
/// }
/// ```
pub trait Store<D>: Send + Sync + 'static {
    /// Looks up the live record holding `token`.
    fn get_by_token(
        &self,
        token: &SessionToken,
    ) -> impl Future<Output = Result<Session<D>, StoreError>> + Send;

    /// Looks up a record by its stable id.
    fn get_by_id(&self, id: SessionId)
    -> impl Future<Output = Result<Session<D>, StoreError>> + Send;

    /// Inserts or replaces the record with `session.id`.
    fn save(&self, session: &Session<D>) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes a record. Returns [`StoreError::NotFound`] if it was absent.
    fn delete(&self, id: SessionId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes every expired record and returns how many went.
    fn delete_expired(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

/// Blacklist of JWT ids that must be rejected before any store lookup.
pub trait Revoker: Send + Sync + 'static {
    /// Returns `true` if `jti` has been revoked.
    fn is_revoked(&self, jti: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Adds `jti` to the blacklist.
    fn revoke(&self, jti: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}
