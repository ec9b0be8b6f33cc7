//! The session manager: tracks every live session.
//!
//! # Concurrency note
//!
//! `SessionManager` is NOT thread-safe by itself: it uses a plain
//! `HashMap`. The orchestrator owns one instance behind a mutex and only
//! holds the lock for a single call, never across an await.
//!
//! # Time
//!
//! Every time-dependent method has an `_at(now)` twin. The plain versions
//! call it with `Instant::now()`; tests call the twins with explicit
//! instants instead of sleeping.

use std::collections::HashMap;
use std::time::Instant;

use crate::{Session, SessionConfig, SessionError};

/// Manages all live sessions, keyed by session id.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ renew()* ──→ delete()
///     │                        ▲
///     └──(either expiry)──→ sweep()
/// ```
pub struct SessionManager {
    sessions: HashMap<String, Session>,
    config: SessionConfig,
}

impl SessionManager {
    /// Creates an empty manager.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Replaces the lifetime settings. Existing sessions keep the
    /// deadlines they already have.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config;
    }

    /// Creates a session, optionally already bound to a user, and
    /// returns its id.
    pub fn create(&mut self, username: Option<String>) -> String {
        self.create_at(username, Instant::now())
    }

    /// [`create`](Self::create) at an explicit instant.
    pub fn create_at(&mut self, username: Option<String>, now: Instant) -> String {
        let id = generate_session_id();
        let session = Session {
            id: id.clone(),
            username,
            expires: now + self.config.renew_window,
            force_expires: now + self.config.lifetime,
        };
        tracing::debug!(username = ?session.username, "session created");
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Pushes the sliding expiry forward by the renew window.
    ///
    /// Returns `false` if the session is unknown or already invalid (an
    /// expired session is dropped rather than revived). The absolute
    /// expiry never moves.
    pub fn renew(&mut self, id: &str) -> bool {
        self.renew_at(id, Instant::now())
    }

    /// [`renew`](Self::renew) at an explicit instant.
    pub fn renew_at(&mut self, id: &str, now: Instant) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) if session.is_valid_at(now) => {
                session.expires = now + self.config.renew_window;
                true
            }
            Some(_) => {
                self.sessions.remove(id);
                false
            }
            None => false,
        }
    }

    /// Returns the session if it exists and both expiries are in the
    /// future. Fails closed.
    pub fn lookup(&self, id: &str) -> Option<&Session> {
        self.lookup_at(id, Instant::now())
    }

    /// [`lookup`](Self::lookup) at an explicit instant.
    pub fn lookup_at(&self, id: &str, now: Instant) -> Option<&Session> {
        self.sessions.get(id).filter(|s| s.is_valid_at(now))
    }

    /// Binds a session to a username.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the id is unknown.
    pub fn bind(&mut self, id: &str, username: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_owned()))?;
        session.username = Some(username.to_owned());
        Ok(())
    }

    /// Deletes a session. Returns `true` if it existed.
    pub fn delete(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Deletes every session bound to `username`. Returns how many went.
    pub fn delete_user(&mut self, username: &str) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.username.as_deref() != Some(username));
        before - self.sessions.len()
    }

    /// Removes every session that fails the double-expiry check.
    /// Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`sweep`](Self::sweep) at an explicit instant.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_valid_at(now));
        let removed = before - self.sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "expired sessions swept");
        }
        removed
    }

    /// Number of sessions held (valid or not yet swept).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Generates a random 32-character hex id (128 bits of entropy).
pub(crate) fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionManager`, named
    //! `test_{function}_{scenario}_{expected}`.
    //!
    //! Time is driven explicitly through the `_at` variants.

    use std::time::Duration;

    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    /// 5-minute sliding window, 1-hour absolute lifetime.
    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig {
            renew_window: 5 * MIN,
            lifetime: 60 * MIN,
        })
    }

    // =====================================================================
    // create() / lookup()
    // =====================================================================

    #[test]
    fn test_create_returns_unique_hex_ids() {
        let mut mgr = manager();
        let a = mgr.create(None);
        let b = mgr.create(None);

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn test_lookup_within_both_windows_returns_session() {
        let mut mgr = manager();
        let t0 = Instant::now();
        let id = mgr.create_at(Some("alice".into()), t0);

        let s = mgr.lookup_at(&id, t0 + MIN).expect("valid");
        assert_eq!(s.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_lookup_after_sliding_expiry_fails_closed() {
        let mut mgr = manager();
        let t0 = Instant::now();
        let id = mgr.create_at(None, t0);

        assert!(mgr.lookup_at(&id, t0 + 5 * MIN).is_none());
        assert!(mgr.lookup_at("unknown", t0).is_none());
    }

    // =====================================================================
    // renew()
    // =====================================================================

    #[test]
    fn test_renew_advances_only_the_sliding_bound() {
        let mut mgr = manager();
        let t0 = Instant::now();
        let id = mgr.create_at(None, t0);
        let force = mgr.lookup_at(&id, t0).unwrap().force_expires;

        assert!(mgr.renew_at(&id, t0 + 4 * MIN));

        let s = mgr.lookup_at(&id, t0 + 8 * MIN).expect("renewed");
        assert_eq!(s.expires, t0 + 9 * MIN);
        assert_eq!(s.force_expires, force, "absolute expiry must not move");
    }

    #[test]
    fn test_renew_cannot_outlive_absolute_expiry() {
        let mut mgr = manager();
        let t0 = Instant::now();
        let id = mgr.create_at(None, t0);

        // Renew every 4 minutes for the full hour.
        let mut t = t0;
        while t + 4 * MIN < t0 + 60 * MIN {
            t += 4 * MIN;
            assert!(mgr.renew_at(&id, t));
        }

        // The sliding bound is still in the future, the ceiling is not.
        assert!(mgr.lookup_at(&id, t0 + 60 * MIN).is_none());
        assert!(!mgr.renew_at(&id, t0 + 60 * MIN));
    }

    #[test]
    fn test_renew_unknown_returns_false() {
        let mut mgr = manager();
        assert!(!mgr.renew("nope"));
    }

    #[test]
    fn test_renew_expired_session_drops_it() {
        let mut mgr = manager();
        let t0 = Instant::now();
        let id = mgr.create_at(None, t0);

        assert!(!mgr.renew_at(&id, t0 + 6 * MIN));
        assert!(mgr.is_empty());
    }

    // =====================================================================
    // bind() / delete() / delete_user()
    // =====================================================================

    #[test]
    fn test_bind_sets_username() {
        let mut mgr = manager();
        let id = mgr.create(None);
        mgr.bind(&id, "bob").unwrap();
        assert_eq!(mgr.lookup(&id).unwrap().username.as_deref(), Some("bob"));

        assert!(matches!(
            mgr.bind("missing", "bob"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_removes_session() {
        let mut mgr = manager();
        let id = mgr.create(None);
        assert!(mgr.delete(&id));
        assert!(!mgr.delete(&id));
        assert!(mgr.lookup(&id).is_none());
    }

    #[test]
    fn test_delete_user_removes_only_that_users_sessions() {
        let mut mgr = manager();
        mgr.create(Some("carol".into()));
        mgr.create(Some("carol".into()));
        let keep = mgr.create(Some("dave".into()));

        assert_eq!(mgr.delete_user("carol"), 2);
        assert_eq!(mgr.len(), 1);
        assert!(mgr.lookup(&keep).is_some());
    }

    // =====================================================================
    // sweep()
    // =====================================================================

    #[test]
    fn test_sweep_removes_sessions_failing_either_expiry() {
        let mut mgr = manager();
        let t0 = Instant::now();
        let idle = mgr.create_at(None, t0);
        let busy = mgr.create_at(None, t0);
        let fresh = mgr.create_at(None, t0 + 58 * MIN);

        // Keep `busy` renewed right up to its ceiling.
        for minutes in (4..60).step_by(4) {
            mgr.renew_at(&busy, t0 + minutes * MIN);
        }

        let removed = mgr.sweep_at(t0 + 61 * MIN);

        assert_eq!(removed, 2, "idle (sliding) and busy (absolute) go");
        assert!(mgr.lookup_at(&idle, t0 + 61 * MIN).is_none());
        assert!(mgr.lookup_at(&fresh, t0 + 61 * MIN).is_some());
    }

    #[test]
    fn test_set_config_applies_to_new_sessions() {
        let mut mgr = manager();
        mgr.set_config(SessionConfig {
            renew_window: MIN,
            lifetime: 2 * MIN,
        });
        let t0 = Instant::now();
        let id = mgr.create_at(None, t0);
        assert!(mgr.lookup_at(&id, t0 + 2 * MIN).is_none());
    }
}
