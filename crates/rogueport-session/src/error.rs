//! Error types for the session layer.

/// Errors that can occur while authenticating players or managing their
/// sessions and login tokens.
///
/// None of these are fatal to the server: the orchestrator reports them
/// to the one client involved and carries on.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Bad credentials or a malformed login. The message is deliberately
    /// the same whether or not the username exists.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Registration was refused (empty password, bad name, taken, …).
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    /// No session exists under this id.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The session exists but one of its expiries has passed.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// A login cookie could not be parsed.
    #[error("invalid login token")]
    InvalidToken,

    /// The password hashing scheme is misconfigured or failed.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The account policy is misconfigured (bad nickname pattern, …).
    #[error("invalid account policy: {0}")]
    InvalidPolicy(String),

    /// A blocking hash or store task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Worker(String),

    /// The credential store is unavailable or a query failed.
    #[error("credential store error: {0}")]
    Store(#[from] rusqlite::Error),
}
