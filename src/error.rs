//! Error taxonomy for portal interactions.
//!
//! A closed set of failure kinds raised by the transport primitives and the
//! business-rule checks layered on top of them. Nothing here is recoverable
//! at this layer; every error propagates to the caller, and only
//! `SessionExpired` carries an implied follow-up action (re-authenticate).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The server banner signalled a session timeout. The caller must run
    /// `authorization()` again before retrying the operation.
    #[error("Session expired, re-authorization required")]
    SessionExpired,

    /// Transport-level failure, a non-2xx status, or the server banner
    /// signalling portal downtime.
    #[error("Portal server is not responding")]
    ServerUnavailable,

    /// The server banner signalled a bad login/password pair.
    #[error("Incorrect login or password")]
    InvalidCredentials,

    /// The post-login response lacked a valid user id or CSRF token.
    #[error("Authorization failed: login response had no user id or csrf token")]
    AuthenticationFailed,

    /// Umbrella for business-rule violations: wrong task owner, unexpected
    /// content type or status code, stale or missing close token, exceeded
    /// close window. Carries a human-readable reason.
    #[error("Task operation rejected: {0}")]
    TaskOperationRejected(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for the umbrella business-rule rejection.
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self::TaskOperationRejected(reason.into())
    }
}
