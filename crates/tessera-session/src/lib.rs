//! Session lifecycle for Tessera.
//!
//! This crate handles everything about a session that doesn't depend on
//! how it travels over the wire:
//!
//! 1. **The session value** ([`Session`]): who the client is, which device
//!    it is, its secret token, and when it expires
//! 2. **Lifecycle** ([`Manager`]): create, load, authenticate, refresh,
//!    touch, logout, delete, and the expired-record sweep
//! 3. **Contracts** ([`Store`], [`Revoker`]): what a persistence backend and
//!    a JWT blacklist must provide, plus in-memory versions of both
//!
//! # How it fits in the stack
//!
//! ```text
//! Facade (tessera)              ← request-level API, client info from headers
//!     ↕
//! Transport (tessera-transport) ← cookies / JWTs ↔ SessionToken
//!     ↕
//! Session Layer (this crate)    ← identity, tokens, lifecycle, storage
//! ```

mod error;
mod manager;
mod memory;
mod session;
mod store;
mod token;

pub use error::{SessionError, StoreError};
pub use manager::Manager;
pub use memory::{MemoryRevoker, MemoryStore};
pub use session::{ClientChange, ClientInfo, NewSession, Session, SessionConfig, SessionState};
pub use store::{Revoker, Store};
pub use token::{DeviceId, SessionId, SessionToken, TOKEN_BYTES, UserId};
