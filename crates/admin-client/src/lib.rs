//! Authenticated API client for the admin dashboard backend
//!
//! Wraps every request with automatic credential attachment and bounded
//! retry-after-refresh:
//! 1. `ApiClient::execute()` attaches the stored bearer token and sends
//! 2. A non-401 result (success or error) is returned as-is
//! 3. A 401 triggers the single-flight refresh in `admin-auth`
//! 4. On refresh success the request is replayed exactly once
//! 5. On refresh failure the credential is cleared and a sign-out event is
//!    broadcast; the call fails with `ApiError::Auth`
//!
//! The `Session` object owns the store, coordinator, and client, with
//! explicit construction from `ClientConfig` instead of process globals.

pub mod client;
pub mod config;
pub mod error;
pub mod session;

pub use client::{ApiClient, ApiRequest, ApiResponse};
pub use config::{ApiConfig, ClientConfig, SessionConfig};
pub use error::{ApiError, Result};
pub use session::{Profile, Session, SessionEvent};
