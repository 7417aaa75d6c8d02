//! Credential handling for the session lifecycle.
//!
//! This module provides:
//! - `CredentialStore`: the single holder of record for the bearer token,
//!   with memory, file and OS keychain backends
//! - `inspector`: pure decoding of subject id and expiry from a token
//! - `SessionState`: the derived authenticated/expired view

pub mod credentials;
pub mod inspector;
pub mod session;

pub use credentials::{
    Credential, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use inspector::{Claims, DecodeError};
pub use session::SessionState;
