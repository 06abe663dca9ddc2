//! The owned admin session
//!
//! One `Session` replaces the original process-global auth state: it owns
//! the credential store, the refresh coordinator, the API client, and the
//! sign-out event channel, and is constructed explicitly from config at
//! application start. Components that need the session take it by
//! reference.
//!
//! Sign-out events fire on `logout()` and on forced sign-out from a failed
//! refresh; the presentation layer subscribes and handles navigation to
//! the sign-in surface.

use std::sync::Arc;
use std::time::Duration;

use admin_auth::{
    Credential, CredentialStore, ME_PATH, RefreshCoordinator, login_session, logout_session,
};
use common::Secret;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::config::ClientConfig;

/// Session lifecycle events broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials were cleared — redirect to the sign-in surface.
    SignedOut,
}

/// The authenticated admin's profile.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /client/me` wraps the profile in an envelope.
#[derive(Debug, Deserialize)]
struct ProfileEnvelope {
    profile: Profile,
}

/// Owns the credential store, refresh coordinator, API client, and
/// sign-out channel for one admin session.
pub struct Session {
    store: Arc<CredentialStore>,
    client: ApiClient,
    http: reqwest::Client,
    base_url: String,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Initialize the session from config: load the credential file and
    /// wire the store, coordinator, and client together.
    pub async fn new(config: &ClientConfig) -> admin_auth::Result<Self> {
        let store = Arc::new(CredentialStore::load(config.session.credentials_path.clone()).await?);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .map_err(|e| admin_auth::Error::Http(format!("building HTTP client: {e}")))?;

        let (events, _) = broadcast::channel(16);
        let refresher = Arc::new(RefreshCoordinator::new(
            store.clone(),
            http.clone(),
            config.api.base_url.clone(),
        ));
        let client = ApiClient::new(
            http.clone(),
            config.api.base_url.clone(),
            store.clone(),
            refresher,
            events.clone(),
        );

        Ok(Self {
            store,
            client,
            http,
            base_url: config.api.base_url.clone(),
            events,
        })
    }

    /// The authenticated API client for this session.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Subscribe to sign-out events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether a credential is currently stored.
    pub async fn is_authenticated(&self) -> bool {
        self.store.get().await.is_some()
    }

    /// Exchange email/password for a session and store its tokens.
    ///
    /// Goes straight to the login endpoint rather than through `execute`:
    /// a rejected password must not trigger a refresh cycle.
    pub async fn login(
        &self,
        email: &str,
        password: &Secret<String>,
    ) -> admin_auth::Result<Option<Profile>> {
        let auth = login_session(&self.http, &self.base_url, email, password).await?;
        self.store
            .set(Credential {
                access: auth.session.access_token,
                refresh: auth.session.refresh_token,
            })
            .await?;
        info!(email, "signed in");

        Ok(auth.user.and_then(|user| serde_json::from_value(user).ok()))
    }

    /// Sign out: best-effort server-side invalidation, then clear the
    /// stored credential and broadcast the sign-out event regardless.
    pub async fn logout(&self) {
        if let Some(credential) = self.store.get().await {
            if let Err(e) = logout_session(&self.http, &self.base_url, &credential.access).await {
                debug!(error = %e, "server-side logout failed, clearing locally anyway");
            }
        }
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential file during sign-out");
        }
        info!("signed out");
        let _ = self.events.send(SessionEvent::SignedOut);
    }

    /// Fetch the authenticated admin's profile.
    pub async fn current_user(&self) -> crate::Result<Profile> {
        let envelope: ProfileEnvelope = self.client.get(ME_PATH).await?;
        Ok(envelope.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_envelope_unwraps() {
        let json = r#"{"profile":{"id":"u1","email":"admin@example.com"}}"#;
        let envelope: ProfileEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.profile.id, "u1");
    }

    #[test]
    fn profile_deserializes_with_optional_name() {
        let json = r#"{"id":"u1","email":"admin@example.com"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, "u1");
        assert!(profile.name.is_none());

        let json = r#"{"id":"u1","email":"admin@example.com","name":"Admin"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.name.as_deref(), Some("Admin"));
    }
}
