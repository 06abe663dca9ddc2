//! Auth endpoint wire calls
//!
//! Handles the three session endpoint interactions:
//! 1. Login (email/password exchange for a session)
//! 2. Refresh (refresh token exchange for a new session)
//! 3. Logout (server-side session invalidation, best-effort)
//!
//! All three POST JSON to `/api/v1/auth/*`. The backend wraps tokens in a
//! `session` envelope; `refresh_token` is optional because the backend only
//! includes it when it rotates the refresh token.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::{API_PREFIX, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};

/// Token pair returned inside the session envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    /// Present only when the backend rotated the refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Response from the login and refresh endpoints.
///
/// `user` is the authenticated admin's profile, returned by login but not
/// by refresh. Kept opaque here; `admin-client` deserializes it properly.
#[derive(Debug, Deserialize)]
pub struct AuthSession {
    pub session: SessionTokens,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

/// Exchange email and password for a session.
///
/// The password is carried as a [`Secret`] and only exposed while the
/// request body is built, so it cannot leak through Debug formatting.
pub async fn login_session(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &Secret<String>,
) -> Result<AuthSession> {
    let response = client
        .post(format!("{base_url}{API_PREFIX}{LOGIN_PATH}"))
        .json(&serde_json::json!({
            "email": email,
            "password": password.expose(),
        }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "login rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenEndpoint(format!(
            "login returned {status}: {body}"
        )));
    }

    response
        .json::<AuthSession>()
        .await
        .map_err(|e| Error::TokenEndpoint(format!("invalid login response: {e}")))
}

/// Exchange a refresh token for a new session.
///
/// Called by the refresh coordinator when a request hits a 401. A
/// non-success status means the refresh token is invalid or expired; a
/// success response missing the access token is malformed and also an
/// error.
pub async fn refresh_session(
    client: &reqwest::Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<SessionTokens> {
    let response = client
        .post(format!("{base_url}{API_PREFIX}{REFRESH_PATH}"))
        .json(&serde_json::json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the refresh token is revoked or expired
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenEndpoint(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    let session = response
        .json::<AuthSession>()
        .await
        .map_err(|e| Error::TokenEndpoint(format!("invalid refresh response: {e}")))?;

    Ok(session.session)
}

/// Invalidate the session server-side.
///
/// Best-effort: callers sign out locally regardless of the outcome.
pub async fn logout_session(
    client: &reqwest::Client,
    base_url: &str,
    access_token: &str,
) -> Result<()> {
    let response = client
        .post(format!("{base_url}{API_PREFIX}{LOGOUT_PATH}"))
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::TokenEndpoint(format!("logout returned {status}")));
    }
    Ok(())
}
