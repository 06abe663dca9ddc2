//! Caller-facing error taxonomy
//!
//! Callers of `ApiClient` never see refresh mechanics: they get the
//! successful payload or one of these failure kinds. `Auth` is the only
//! variant with a side effect — it is raised after the credential has been
//! cleared and the sign-out event broadcast.

/// Errors surfaced to callers of the API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure, no response received. Never triggers a
    /// refresh.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success response from the backend, surfaced unchanged.
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Credentials are irrecoverable: a refresh was attempted and failed,
    /// or a 401 arrived with no refresh token stored. The credential store
    /// has been cleared and sign-out signaled.
    #[error("authentication failed, signed out")]
    Auth,

    /// A success response whose body could not be deserialized into the
    /// requested type. Only produced by the typed wrappers, never by
    /// `execute` itself.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
