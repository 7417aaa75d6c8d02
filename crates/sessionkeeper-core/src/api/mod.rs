//! REST API client module for the book-discovery backend.
//!
//! Only the credential renewal endpoint is consumed here:
//! `POST /api/v1/user/{id}/refreshToken` authorized with the current bearer
//! token, answering `{ "token": "<new credential>" }`.

pub mod client;
pub mod error;

pub use client::{ApiClient, RenewalBackend};
pub use error::ApiError;
