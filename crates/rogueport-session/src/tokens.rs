//! Remember-me login tokens.
//!
//! A login cookie is `username:token:seqid`. Each `(username, seqid)` row
//! in the store is one link of a rotation chain:
//!
//! ```text
//! issue_token ──→ cookie #1 ──consume──→ cookie #2 ──consume──→ …
//!                 (same seqid, new token each time)
//! ```
//!
//! Every cookie is single use. Presenting a stale token for a live seqid
//! means someone else already used it, so every row for that user is
//! deleted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use subtle::ConstantTimeEq;

use crate::{CredentialStore, SessionError};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A freshly issued cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCookie {
    /// `username:token:seqid`
    pub value: String,
    /// Unix timestamp (seconds) after which the server refuses it.
    pub expires: i64,
}

/// Outcome of presenting a cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLogin {
    /// The cookie matched; use `cookie` from now on.
    Accepted { username: String, cookie: LoginCookie },
    /// Unknown or expired cookie.
    Rejected,
    /// A stale token was presented. Every chain of `username` is gone.
    ChainRevoked { username: String },
}

/// Issues and consumes login cookies.
pub struct LoginTokens {
    store: Arc<CredentialStore>,
    lifetime_days: AtomicU32,
}

impl LoginTokens {
    /// Creates the token layer. Cookies live `lifetime_days` days.
    pub fn new(store: Arc<CredentialStore>, lifetime_days: u32) -> Self {
        Self {
            store,
            lifetime_days: AtomicU32::new(lifetime_days),
        }
    }

    /// Changes the lifetime of cookies issued from now on.
    pub fn set_lifetime_days(&self, days: u32) {
        self.lifetime_days.store(days, Ordering::Relaxed);
    }

    /// Issues a cookie for `username`.
    ///
    /// Passing `seqid` continues an existing chain. `None` starts a new one.
    pub fn issue_token(
        &self,
        username: &str,
        seqid: Option<&str>,
    ) -> Result<LoginCookie, SessionError> {
        self.issue_token_at(username, seqid, unix_now())
    }

    fn issue_token_at(
        &self,
        username: &str,
        seqid: Option<&str>,
        now: i64,
    ) -> Result<LoginCookie, SessionError> {
        let token = random_hex();
        let seqid = seqid.map_or_else(random_hex, str::to_owned);
        let days = i64::from(self.lifetime_days.load(Ordering::Relaxed));
        let expires = now + days * SECONDS_PER_DAY;

        self.store
            .insert_login_token(username, &seqid, &token, expires)?;
        Ok(LoginCookie {
            value: format!("{username}:{token}:{seqid}"),
            expires,
        })
    }

    /// Presents a cookie.
    ///
    /// The stored row is deleted whatever the outcome.
    ///
    /// # Errors
    /// [`SessionError::InvalidToken`] if the cookie isn't three
    /// colon-separated parts. Store failures pass through.
    pub fn consume_token(&self, cookie: &str) -> Result<TokenLogin, SessionError> {
        self.consume_token_at(cookie, unix_now())
    }

    /// [`consume_token`](Self::consume_token) at an explicit unix time.
    pub fn consume_token_at(&self, cookie: &str, now: i64) -> Result<TokenLogin, SessionError> {
        let (username, token, seqid) = parse_cookie(cookie)?;

        let Some((stored, expires)) = self.store.take_login_token(username, seqid)? else {
            return Ok(TokenLogin::Rejected);
        };
        if expires < now {
            tracing::debug!(%username, "expired login token presented");
            return Ok(TokenLogin::Rejected);
        }
        if !bool::from(stored.as_bytes().ct_eq(token.as_bytes())) {
            tracing::warn!(%username, "bad login token; revoking all login tokens");
            self.store.delete_login_tokens(username)?;
            return Ok(TokenLogin::ChainRevoked {
                username: username.to_owned(),
            });
        }

        tracing::info!(%username, "logged in via token");
        let cookie = self.issue_token_at(username, Some(seqid), now)?;
        Ok(TokenLogin::Accepted {
            username: username.to_owned(),
            cookie,
        })
    }

    /// Deletes the chain link a cookie points at (logout).
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn forget_token(&self, cookie: &str) -> Result<bool, SessionError> {
        let (username, _, seqid) = parse_cookie(cookie)?;
        self.store.delete_login_token(username, seqid)
    }

    /// Deletes every cookie of `username`.
    pub fn revoke_user(&self, username: &str) -> Result<usize, SessionError> {
        self.store.delete_login_tokens(username)
    }

    /// Deletes every row past its expiry.
    pub fn purge_expired(&self) -> Result<usize, SessionError> {
        self.store.purge_login_tokens(unix_now())
    }
}

fn parse_cookie(cookie: &str) -> Result<(&str, &str, &str), SessionError> {
    let mut parts = cookie.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(username), Some(token), Some(seqid), None)
            if !username.is_empty() && !token.is_empty() && !seqid.is_empty() =>
        {
            Ok((username, token, seqid))
        }
        _ => Err(SessionError::InvalidToken),
    }
}

fn random_hex() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn tokens() -> LoginTokens {
        let store = Arc::new(CredentialStore::open_in_memory().unwrap());
        LoginTokens::new(store, 7)
    }

    fn split(cookie: &LoginCookie) -> (String, String, String) {
        let parts: Vec<&str> = cookie.value.split(':').collect();
        (parts[0].into(), parts[1].into(), parts[2].into())
    }

    #[test]
    fn test_issue_token_composes_cookie_and_expiry() {
        let t = tokens();
        let cookie = t.issue_token_at("alice", None, NOW).unwrap();
        let (user, token, seqid) = split(&cookie);

        assert_eq!(user, "alice");
        assert_eq!(token.len(), 32);
        assert_eq!(seqid.len(), 32);
        assert_eq!(cookie.expires, NOW + 7 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_consume_token_rotates_under_same_seqid() {
        let t = tokens();
        let first = t.issue_token_at("alice", None, NOW).unwrap();

        let TokenLogin::Accepted { username, cookie } =
            t.consume_token_at(&first.value, NOW + 10).unwrap()
        else {
            panic!("expected accepted");
        };

        assert_eq!(username, "alice");
        let (_, old_token, old_seq) = split(&first);
        let (_, new_token, new_seq) = split(&cookie);
        assert_eq!(new_seq, old_seq);
        assert_ne!(new_token, old_token);
        assert_eq!(t.store.count_login_tokens("alice").unwrap(), 1);
    }

    #[test]
    fn test_consume_token_is_single_use() {
        let t = tokens();
        let first = t.issue_token_at("alice", None, NOW).unwrap();

        assert!(matches!(
            t.consume_token_at(&first.value, NOW).unwrap(),
            TokenLogin::Accepted { .. }
        ));
        // The old value now mismatches the rotated row: theft response.
        assert_eq!(
            t.consume_token_at(&first.value, NOW).unwrap(),
            TokenLogin::ChainRevoked {
                username: "alice".into()
            }
        );
    }

    #[test]
    fn test_consume_token_wrong_token_deletes_every_chain_of_user() {
        let t = tokens();
        let a = t.issue_token_at("bob", None, NOW).unwrap();
        t.issue_token_at("bob", None, NOW).unwrap();
        t.issue_token_at("carol", None, NOW).unwrap();

        let (_, _, seqid) = split(&a);
        let forged = format!("bob:{}:{seqid}", "0".repeat(32));

        assert_eq!(
            t.consume_token_at(&forged, NOW).unwrap(),
            TokenLogin::ChainRevoked {
                username: "bob".into()
            }
        );
        assert_eq!(t.store.count_login_tokens("bob").unwrap(), 0);
        assert_eq!(t.store.count_login_tokens("carol").unwrap(), 1);
    }

    #[test]
    fn test_consume_token_prefix_or_extended_token_is_a_mismatch() {
        let mangles: [fn(&str) -> String; 2] = [|t| t[..31].to_owned(), |t| format!("{t}0")];
        for mangle in mangles {
            let t = tokens();
            let cookie = t.issue_token_at("bea", None, NOW).unwrap();
            let (_, token, seqid) = split(&cookie);
            let forged = format!("bea:{}:{seqid}", mangle(&token));

            assert_eq!(
                t.consume_token_at(&forged, NOW).unwrap(),
                TokenLogin::ChainRevoked {
                    username: "bea".into()
                }
            );
        }
    }

    #[test]
    fn test_consume_token_expired_is_rejected_and_removed() {
        let t = tokens();
        let cookie = t.issue_token_at("dave", None, NOW).unwrap();

        let later = cookie.expires + 1;
        assert_eq!(t.consume_token_at(&cookie.value, later).unwrap(), TokenLogin::Rejected);
        assert_eq!(t.store.count_login_tokens("dave").unwrap(), 0);
    }

    #[test]
    fn test_consume_token_unknown_and_malformed() {
        let t = tokens();
        assert_eq!(
            t.consume_token_at("erin:abc:def", NOW).unwrap(),
            TokenLogin::Rejected
        );
        assert!(matches!(
            t.consume_token_at("no-colons", NOW),
            Err(SessionError::InvalidToken)
        ));
        assert!(matches!(
            t.consume_token_at("a:b:c:d", NOW),
            Err(SessionError::InvalidToken)
        ));
    }

    #[test]
    fn test_forget_token_deletes_only_that_link() {
        let t = tokens();
        let a = t.issue_token_at("frank", None, NOW).unwrap();
        t.issue_token_at("frank", None, NOW).unwrap();

        assert!(t.forget_token(&a.value).unwrap());
        assert!(!t.forget_token(&a.value).unwrap());
        assert_eq!(t.store.count_login_tokens("frank").unwrap(), 1);
    }

    #[test]
    fn test_set_lifetime_days_changes_new_expiries() {
        let t = tokens();
        t.set_lifetime_days(1);
        let cookie = t.issue_token_at("grace", None, NOW).unwrap();
        assert_eq!(cookie.expires, NOW + SECONDS_PER_DAY);
    }
}
