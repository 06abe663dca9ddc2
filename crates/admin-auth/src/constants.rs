//! Backend endpoint paths
//!
//! The backend exposes everything under `/api/v1`; admin resources live one
//! level deeper under `/api/v1/admin`. Auth endpoints are *not* under the
//! admin prefix.

/// Prefix for all versioned API endpoints.
pub const API_PREFIX: &str = "/api/v1";

/// Prefix for admin resource endpoints (missions, users, brands, ...).
pub const ADMIN_PREFIX: &str = "/api/v1/admin";

/// Exchanges email/password for a session (access + refresh token).
pub const LOGIN_PATH: &str = "/auth/login";

/// Exchanges a refresh token for a new session. Non-success status means
/// the refresh token is invalid or expired.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Invalidates the session server-side. Best-effort.
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Returns the authenticated admin's profile.
pub const ME_PATH: &str = "/client/me";
