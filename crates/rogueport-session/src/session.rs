//! Session types: the server's short-lived record of a logged-in client.
//!
//! A session carries two deadlines:
//! - a **sliding** expiry, pushed forward every time the session is used;
//! - an **absolute** expiry, fixed at creation and never moved.
//!
//! A session is valid only while *both* are in the future, so constant use
//! can keep a session alive only up to its absolute ceiling.

use std::time::{Duration, Instant};

/// How long sessions live.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How far each use pushes the sliding expiry forward.
    pub renew_window: Duration,

    /// Absolute lifetime, measured from creation.
    pub lifetime: Duration,
}

impl SessionConfig {
    /// The fixed sliding window applied on every renewal.
    pub const RENEW_WINDOW: Duration = Duration::from_secs(5 * 60);

    /// Builds a config with the standard renew window and the given
    /// absolute lifetime.
    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            renew_window: Self::RENEW_WINDOW,
            lifetime,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_lifetime(Duration::from_secs(24 * 60 * 60))
    }
}

/// One session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unguessable id (32 hex chars, 128 bits).
    pub id: String,

    /// The account this session belongs to, once bound.
    pub username: Option<String>,

    /// Sliding expiry, renewed on use.
    pub expires: Instant,

    /// Absolute expiry, fixed at creation.
    pub force_expires: Instant,
}

impl Session {
    /// `true` iff `now` is before both expiries.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires && now < self.force_expires
    }
}
