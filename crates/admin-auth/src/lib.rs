//! Authentication core for the admin dashboard API
//!
//! Provides the credential file store, the auth endpoint wire calls
//! (login / refresh / logout), and the single-flight refresh coordinator.
//! This crate has no knowledge of the request/retry policy — that lives in
//! `admin-client`, which consumes the coordinator.
//!
//! Credential flow:
//! 1. `token::login_session()` exchanges email/password for a session
//! 2. Credential stored via `credential::CredentialStore::set()`
//! 3. A 401 anywhere triggers `RefreshCoordinator::request_refresh()`
//! 4. Concurrent 401s attach to the same in-flight refresh (single-flight)
//! 5. On success the rotated credential is stored; on failure the caller
//!    clears the store and forces sign-out

pub mod constants;
pub mod credential;
pub mod error;
pub mod refresh;
pub mod token;

pub use constants::*;
pub use credential::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use token::{AuthSession, SessionTokens, login_session, logout_session, refresh_session};
