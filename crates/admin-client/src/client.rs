//! Request execution with credential attachment and retry-once-after-refresh
//!
//! One `execute` invocation moves through a fixed state machine:
//! sent → done on any non-401 result, or
//! sent → 401 → refreshing → retried once → done, or
//! sent → 401 → refresh failed → signed out → done.
//! A second 401 on the retried attempt is final — retries never recurse
//! into another refresh cycle for the same call.

use std::sync::Arc;

use admin_auth::{API_PREFIX, CredentialStore, RefreshCoordinator, RefreshOutcome};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::session::SessionEvent;

/// One logical request against the backend. Paths are relative to the
/// `/api/v1` prefix, so admin resources are addressed as e.g.
/// `/admin/missions` and auth-adjacent endpoints as `/client/me`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful (2xx) response. Non-success statuses become
/// `ApiError::Server` before callers see them.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Deserialize the body into the requested type.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Executes requests with automatic bearer attachment, 401 detection, and
/// single-flight-coordinated retry. Cheap to clone; all clones share the
/// same store, coordinator, and sign-out channel.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        store: Arc<CredentialStore>,
        refresher: Arc<RefreshCoordinator>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            http,
            base_url,
            store,
            refresher,
            events,
        }
    }

    /// Execute one logical request.
    ///
    /// The common path is a single attempt returned as-is. On a 401 the
    /// client joins the coordinated refresh: if it succeeds the request is
    /// replayed once with the re-read credential; if it fails the store is
    /// cleared, sign-out is broadcast, and the call fails with `Auth`.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let response = self.send(request).await?;
        if response.status != 401 {
            return Self::finish(response);
        }

        debug!(path = %request.path, "request returned 401, coordinating refresh");
        match self.refresher.request_refresh().await {
            RefreshOutcome::Refreshed(_) => {
                // Re-reads the store, so the retry carries the new token
                let retried = self.send(request).await?;
                // A second 401 is final, surfaced like any other error status
                Self::finish(retried)
            }
            RefreshOutcome::Failed => {
                self.force_signout().await;
                Err(ApiError::Auth)
            }
        }
    }

    /// GET a typed resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(&ApiRequest::get(path)).await?.json()
    }

    /// POST a typed payload, returning the typed response.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.execute(&ApiRequest::post(path, body)).await?.json()
    }

    /// PUT a typed payload, returning the typed response.
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.execute(&ApiRequest::put(path, body)).await?.json()
    }

    /// DELETE a resource, returning the typed response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(&ApiRequest::delete(path)).await?.json()
    }

    /// One physical attempt: read the credential, attach it if present,
    /// send, and collect the body. Transport failures are `Network` and
    /// never trigger a refresh.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{API_PREFIX}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), url);

        if let Some(credential) = self.store.get().await {
            builder = builder.bearer_auth(&credential.access);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(ApiResponse { status, body })
    }

    /// Map a settled attempt to the caller-facing result.
    fn finish(response: ApiResponse) -> Result<ApiResponse> {
        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(ApiError::Server {
                status: response.status,
                body: response.body,
            })
        }
    }

    /// Clear the stored credential and broadcast sign-out. Called only
    /// when a refresh has failed and the session is irrecoverable.
    async fn force_signout(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credential file during sign-out");
        }
        warn!("credentials irrecoverable, forcing sign-out");
        let _ = self.events.send(SessionEvent::SignedOut);
    }
}
