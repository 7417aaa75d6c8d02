//! sessionkeeper - session token lifecycle management.
//!
//! Tracks a bearer credential's validity over time, silently renews it while
//! the user is active, and clears it once it expires. Application code talks
//! only to [`SessionFacade`]; the store, inspector, expiry watchdog and
//! renewer underneath are exposed for embedding and testing.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod lifecycle;

pub use api::{ApiClient, ApiError, RenewalBackend};
pub use auth::{
    Claims, Credential, CredentialStore, DecodeError, FileCredentialStore,
    KeyringCredentialStore, MemoryCredentialStore, SessionState,
};
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{Config, StorageBackend};
pub use lifecycle::{EndReason, SessionError, SessionFacade, SessionSettings};
