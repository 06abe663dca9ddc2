//! Single-flight token refresh coordination
//!
//! Arbitrarily many concurrent requests can hit a 401 on the same expired
//! access token. Exactly one physical refresh call must go out; every
//! caller that observed a 401 while it was in flight attaches to it and
//! receives the same outcome.
//!
//! The pending slot is a `watch` receiver stored behind a Mutex. The first
//! caller to find the slot empty spawns the physical refresh as a detached
//! task and waits on its receiver like everyone else; later callers clone
//! the receiver from the slot. The detached task runs to completion even if
//! the caller that spawned it is cancelled, so other attached callers still
//! resolve. The slot is cleared before the outcome is published, so no
//! caller can observe "still pending" after settlement. The lock is only
//! held to check or swap the slot, never across network I/O.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialStore};
use crate::token;

/// Result of one physical refresh attempt, fanned out to every attached
/// caller.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// A new credential was obtained and stored.
    Refreshed(Credential),
    /// The refresh failed or no refresh token exists. The coordinator does
    /// not clear stored credentials; that is the client's responsibility.
    Failed,
}

type PendingSlot = Option<watch::Receiver<Option<RefreshOutcome>>>;

/// Deduplicates concurrent refresh attempts into one physical call.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    base_url: String,
    pending: Arc<Mutex<PendingSlot>>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, http: reqwest::Client, base_url: String) -> Self {
        Self {
            store,
            http,
            base_url,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Obtain a fresh access credential, joining an in-flight refresh if
    /// one exists.
    ///
    /// Returns `Failed` without any network call when no refresh token is
    /// stored. On success the rotated credential has already been written
    /// to the store by the time this returns. Cancelling a waiting caller
    /// never cancels the refresh itself: the physical call runs detached
    /// and settles for whoever is still attached.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let mut rx = {
            let mut pending = self.pending.lock().await;
            match pending.as_ref() {
                Some(rx) => {
                    debug!("refresh already in flight, attaching");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *pending = Some(rx.clone());
                    self.spawn_refresh(tx);
                    rx
                }
            }
        };

        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone().unwrap_or(RefreshOutcome::Failed),
            // Publisher dropped without settling (refresh task panicked)
            Err(_) => RefreshOutcome::Failed,
        }
    }

    /// Spawn the one physical refresh as a detached task. The task owns
    /// everything it needs, so the caller that initiated it can be
    /// cancelled without abandoning the in-flight refresh or leaving the
    /// pending slot occupied.
    fn spawn_refresh(&self, tx: watch::Sender<Option<RefreshOutcome>>) {
        let store = self.store.clone();
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            let outcome = perform_refresh(&store, &http, &base_url).await;
            // Reset the slot before publishing: a caller arriving after
            // settlement must start a fresh refresh, not attach to a
            // settled one.
            *pending.lock().await = None;
            let _ = tx.send(Some(outcome));
        });
    }
}

/// Issue the one physical refresh call and persist the result.
async fn perform_refresh(
    store: &CredentialStore,
    http: &reqwest::Client,
    base_url: &str,
) -> RefreshOutcome {
    let Some(current) = store.get().await else {
        debug!("no credential stored, refresh impossible");
        return RefreshOutcome::Failed;
    };
    let Some(refresh_token) = current.refresh else {
        debug!("no refresh token stored, refresh impossible");
        return RefreshOutcome::Failed;
    };

    match token::refresh_session(http, base_url, &refresh_token).await {
        Ok(tokens) => {
            // Keep the previous refresh token when the backend did not
            // rotate it.
            let credential = Credential {
                access: tokens.access_token,
                refresh: tokens.refresh_token.or(Some(refresh_token)),
            };
            if let Err(e) = store.set(credential.clone()).await {
                warn!(error = %e, "failed to persist refreshed credential");
            }
            info!("access token refreshed");
            RefreshOutcome::Refreshed(credential)
        }
        Err(e) => {
            warn!(error = %e, "token refresh failed");
            RefreshOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_with(dir: &tempfile::TempDir, credential: Option<Credential>) -> Arc<CredentialStore> {
        let store = CredentialStore::load(dir.path().join("credential.json"))
            .await
            .unwrap();
        if let Some(credential) = credential {
            store.set(credential).await.unwrap();
        }
        Arc::new(store)
    }

    fn coordinator(store: Arc<CredentialStore>, base_url: String) -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(
            store,
            reqwest::Client::new(),
            base_url,
        ))
    }

    #[tokio::test]
    async fn refresh_stores_rotated_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .and(body_json(serde_json::json!({ "refresh_token": "rt_old" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session": { "access_token": "at_new", "refresh_token": "rt_new" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_old".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store.clone(), server.uri());

        let outcome = coordinator.request_refresh().await;
        let RefreshOutcome::Refreshed(credential) = outcome else {
            panic!("expected Refreshed, got {outcome:?}");
        };
        assert_eq!(credential.access, "at_new");
        assert_eq!(credential.refresh.as_deref(), Some("rt_new"));

        let stored = store.get().await.unwrap();
        assert_eq!(stored.access, "at_new");
        assert_eq!(stored.refresh.as_deref(), Some("rt_new"));
    }

    #[tokio::test]
    async fn refresh_keeps_old_refresh_token_without_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session": { "access_token": "at_new" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_keep".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store.clone(), server.uri());

        coordinator.request_refresh().await;
        let stored = store.get().await.unwrap();
        assert_eq!(stored.access, "at_new");
        assert_eq!(stored.refresh.as_deref(), Some("rt_keep"));
    }

    #[tokio::test]
    async fn no_refresh_token_fails_without_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_only".into(),
                refresh: None,
            }),
        )
        .await;
        let coordinator = coordinator(store, server.uri());

        let outcome = coordinator.request_refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Failed));
    }

    #[tokio::test]
    async fn empty_store_fails_without_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, None).await;
        let coordinator = coordinator(store, server.uri());

        let outcome = coordinator.request_refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Failed));
    }

    #[tokio::test]
    async fn failed_refresh_does_not_clear_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_dead".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store.clone(), server.uri());

        let outcome = coordinator.request_refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Failed));
        // Clearing is the client's job, not the coordinator's
        assert!(store.get().await.is_some());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_physical_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "session": { "access_token": "at_new", "refresh_token": "rt_new" }
                    }))
                    // Hold the response so all callers overlap the in-flight refresh
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_old".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store, server.uri());

        let mut handles = vec![];
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(
                async move { coordinator.request_refresh().await },
            ));
        }

        for handle in handles {
            let outcome = handle.await.unwrap();
            let RefreshOutcome::Refreshed(credential) = outcome else {
                panic!("expected Refreshed, got {outcome:?}");
            };
            assert_eq!(credential.access, "at_new");
        }
        // The mock's expect(1) verifies the single-flight guarantee on drop
    }

    #[tokio::test]
    async fn concurrent_callers_all_observe_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_dead".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store, server.uri());

        let mut handles = vec![];
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(
                async move { coordinator.request_refresh().await },
            ));
        }
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), RefreshOutcome::Failed));
        }
    }

    #[tokio::test]
    async fn cancelled_initiator_does_not_affect_attached_callers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "session": { "access_token": "at_new", "refresh_token": "rt_new" }
                    }))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_old".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store.clone(), server.uri());

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request_refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request_refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Aborting the caller that started the refresh must not abandon it
        first.abort();

        let outcome = second.await.unwrap();
        let RefreshOutcome::Refreshed(credential) = outcome else {
            panic!("expected Refreshed, got {outcome:?}");
        };
        assert_eq!(credential.access, "at_new");
        assert_eq!(store.get().await.unwrap().access, "at_new");
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_coordinator_usable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "session": { "access_token": "at_new", "refresh_token": "rt_new" }
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_old".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store, server.uri());

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request_refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();

        // The detached refresh settles and clears the pending slot; a
        // later caller starts a fresh physical refresh instead of
        // attaching to a dead one
        tokio::time::sleep(Duration::from_millis(300)).await;
        let outcome = coordinator.request_refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
    }

    #[tokio::test]
    async fn settled_refresh_does_not_leak_into_next_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session": { "access_token": "at_new", "refresh_token": "rt_new" }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            Some(Credential {
                access: "at_old".into(),
                refresh: Some("rt_old".into()),
            }),
        )
        .await;
        let coordinator = coordinator(store, server.uri());

        // Two sequential refreshes are two physical calls: the pending
        // slot must be gone after the first settles
        assert!(matches!(
            coordinator.request_refresh().await,
            RefreshOutcome::Refreshed(_)
        ));
        assert!(matches!(
            coordinator.request_refresh().await,
            RefreshOutcome::Refreshed(_)
        ));
    }
}
