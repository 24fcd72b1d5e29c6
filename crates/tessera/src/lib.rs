//! # Tessera
//!
//! Pluggable session and identity layer for HTTP services.
//!
//! Tessera issues every client an anonymous session on first contact,
//! upgrades it to an authenticated one on login, and rotates its secret
//! token on every privilege change. Storage is yours: implement
//! [`Store`](tessera_session::Store) for your database, or start with the
//! in-memory one. The token travels as a signed cookie or as bearer JWTs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tessera::prelude::*;
//!
//! # async fn handler(req: HeaderMap) -> Result<(), TesseraError> {
//! let sessions: Sessions<(), MemoryStore<()>, CookieTransport> = Sessions::builder()
//!     .store(MemoryStore::new())
//!     .transport(CookieTransport::new(Key::generate(), CookieConfig::default()))
//!     .build()?;
//!
//! let mut resp = HeaderMap::new();
//! let session = sessions.load(&req).await?;
//! let session = sessions.save(&mut resp, session).await?;
//! println!("{} is {}", session.id, session.state());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod sessions;

pub use client::client_info;
pub use error::TesseraError;
pub use sessions::{Sessions, SessionsBuilder, SessionsConfig};

pub use tessera_session as session;
pub use tessera_transport as transport;

/// Everything an application usually needs, in one import.
pub mod prelude {
    pub use http::{HeaderMap, HeaderValue};
    pub use tessera_session::{
        ClientChange, ClientInfo, DeviceId, Manager, MemoryRevoker, MemoryStore, Revoker, Session,
        SessionConfig, SessionError, SessionId, SessionState, SessionToken, Store, StoreError,
        UserId,
    };
    pub use tessera_transport::{
        CookieConfig, CookieTransport, Grant, JwtClaims, JwtConfig, JwtTransport, Key, NoRevoker,
        SameSite, TokenPair, TokenUse, Transport, TransportError,
    };

    pub use crate::{Sessions, SessionsBuilder, SessionsConfig, TesseraError};
}
