//! Player accounts: verification, registration and guest names.
//!
//! [`Accounts`] applies an [`AccountPolicy`] on top of the raw
//! [`CredentialStore`]. The policy is swapped whole on config reload, so
//! every operation reads one consistent policy.
//!
//! The orchestrator talks to accounts through the [`Authenticator`] trait
//! during password login, and calls the registration and guest helpers
//! through [`Accounts::run_blocking`].
//!
//! Every method here is synchronous and may hash a password (tens of
//! milliseconds of CPU). Async code must not call them on the event loop.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use rand::Rng;
use regex::Regex;

use crate::{Argon2Scheme, CredentialStore, PasswordScheme, SessionError};

/// How many random guest names are tried before giving up.
pub const MAX_GUEST_NAME_ATTEMPTS: usize = 10;

const GUEST_SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Hashed once per policy and verified against for unknown users.
const DECOY_PASSWORD: &str = "rogueport-decoy-password";

/// Validates a player's credentials and returns their canonical name.
///
/// # Trait bounds
///
/// - `Send + Sync` → one authenticator is shared by every connection task.
/// - `'static` → it lives as long as the server.
pub trait Authenticator: Send + Sync + 'static {
    /// Checks `username`/`password` and returns the username with its
    /// stored capitalisation.
    ///
    /// # Returns
    /// - `Ok(username)` on a match
    /// - `Err(SessionError::AuthFailed)` for an unknown user or a wrong
    ///   password, with the same message in both cases
    /// - `Err(SessionError::Store)` if the store is unavailable
    fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<String, SessionError>> + Send;
}

/// Rules for account names and passwords.
#[derive(Debug, Clone)]
pub struct AccountPolicy {
    /// Shortest accepted username, in characters.
    pub min_username_length: usize,
    /// Pattern every registered username must match.
    pub nick_pattern: Regex,
    /// Names nobody may register (compared case-insensitively).
    pub reserved_names: Vec<String>,
    /// Lifts the reserved-name restriction.
    pub reserved_names_can_register: bool,
    /// Legacy compatibility mode: truncate passwords to this many
    /// characters before hashing and verifying. `None` disables it.
    pub max_password_length: Option<usize>,
    /// Fixed start of every guest name.
    pub guest_name_prefix: String,
    /// Number of random characters after the prefix.
    pub guest_name_suffix_len: usize,
    /// Hash scheme used for new passwords and for verification.
    pub scheme: Arc<dyn PasswordScheme>,
}

impl AccountPolicy {
    /// The nickname pattern used when none is configured.
    pub const DEFAULT_NICK_PATTERN: &'static str = "^[a-zA-Z0-9]{3,20}$";

    /// Compiles a nickname pattern into a policy field.
    pub fn compile_nick_pattern(pattern: &str) -> Result<Regex, SessionError> {
        Regex::new(pattern).map_err(|e| SessionError::InvalidPolicy(e.to_string()))
    }

    fn is_reserved(&self, username: &str) -> bool {
        !self.reserved_names_can_register
            && self
                .reserved_names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(username))
    }

    fn truncate<'a>(&self, password: &'a str) -> &'a str {
        match self.max_password_length {
            Some(max) => match password.char_indices().nth(max) {
                Some((idx, _)) => &password[..idx],
                None => password,
            },
            None => password,
        }
    }
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            min_username_length: 3,
            nick_pattern: Regex::new(Self::DEFAULT_NICK_PATTERN)
                .expect("default nickname pattern compiles"),
            reserved_names: Vec::new(),
            reserved_names_can_register: false,
            max_password_length: None,
            guest_name_prefix: "Guest".to_string(),
            guest_name_suffix_len: 4,
            scheme: Arc::new(Argon2Scheme::default()),
        }
    }
}

/// The policy in force, plus a hash made with its scheme that no real
/// password matches.
#[derive(Clone)]
struct ActivePolicy {
    rules: Arc<AccountPolicy>,
    decoy_hash: Arc<OnceLock<String>>,
}

impl ActivePolicy {
    fn new(rules: AccountPolicy) -> Self {
        Self {
            rules: Arc::new(rules),
            decoy_hash: Arc::new(OnceLock::new()),
        }
    }

    fn decoy_hash(&self) -> &str {
        self.decoy_hash.get_or_init(|| {
            self.rules
                .scheme
                .hash(DECOY_PASSWORD)
                .unwrap_or_default()
        })
    }
}

/// Account operations over a credential store.
///
/// Clones share the store and the policy.
#[derive(Clone)]
pub struct Accounts {
    store: Arc<CredentialStore>,
    policy: Arc<RwLock<ActivePolicy>>,
}

impl Accounts {
    /// Creates the account layer.
    pub fn new(store: Arc<CredentialStore>, policy: AccountPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(RwLock::new(ActivePolicy::new(policy))),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Replaces the policy. Operations already running keep the old one.
    pub fn set_policy(&self, policy: AccountPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = ActivePolicy::new(policy);
    }

    fn active(&self) -> ActivePolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn policy(&self) -> Arc<AccountPolicy> {
        self.active().rules
    }

    /// Runs `op` on tokio's blocking thread pool and waits for it.
    ///
    /// # Errors
    /// Whatever `op` returns, or [`SessionError::Worker`] if the task
    /// panicked or was cancelled.
    pub async fn run_blocking<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&Accounts) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        let accounts = self.clone();
        tokio::task::spawn_blocking(move || op(&accounts))
            .await
            .map_err(|e| SessionError::Worker(e.to_string()))?
    }

    /// Checks a password and returns the canonical username on a match.
    ///
    /// The lookup ignores case. `Ok(None)` covers both an unknown user and
    /// a wrong password, and both cost one hash verification.
    pub fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<String>, SessionError> {
        let active = self.active();
        let policy = &active.rules;
        let password = policy.truncate(password);
        let Some(user) = self.store.find_user(username)? else {
            policy.scheme.verify(password, active.decoy_hash());
            return Ok(None);
        };
        if policy.scheme.verify(password, &user.password_hash) {
            Ok(Some(user.username))
        } else {
            Ok(None)
        }
    }

    /// Creates an account.
    ///
    /// # Errors
    /// [`SessionError::RegistrationRejected`] with a reason the client can
    /// be shown. Store and hash failures pass through.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<(), SessionError> {
        let policy = self.policy();
        let reject = |reason: &str| Err(SessionError::RegistrationRejected(reason.into()));

        if password.is_empty() {
            return reject("The password can't be empty!");
        }
        let password = policy.truncate(password);
        let username = username.trim();
        if username.chars().count() < policy.min_username_length {
            return reject("Username too short.");
        }
        if !policy.nick_pattern.is_match(username) {
            return reject("Invalid username!");
        }
        if policy.is_reserved(username) {
            return reject("Reserved username!");
        }
        if self.store.user_exists(username)? {
            return reject("User already exists!");
        }

        let hash = policy.scheme.hash(password)?;
        self.store.insert_user(username, email, &hash)?;
        tracing::info!(%username, "registered new user");
        Ok(())
    }

    /// Re-hashes and stores a new password.
    ///
    /// Returns `Ok(false)` only when the password is empty.
    pub fn set_password(&self, username: &str, password: &str) -> Result<bool, SessionError> {
        if password.is_empty() {
            return Ok(false);
        }
        let policy = self.policy();
        let hash = policy.scheme.hash(policy.truncate(password))?;
        if !self.store.update_password(username, &hash)? {
            tracing::warn!(%username, "password change for unknown user");
        }
        Ok(true)
    }

    /// Finds a guest name nobody has registered.
    ///
    /// Returns `Ok(None)` after [`MAX_GUEST_NAME_ATTEMPTS`] collisions.
    pub fn find_unused_guest_name(&self) -> Result<Option<String>, SessionError> {
        let policy = self.policy();
        let mut rng = rand::rng();
        self.find_unused_guest_name_with(|| {
            let suffix: String = (0..policy.guest_name_suffix_len)
                .map(|_| GUEST_SUFFIX_CHARS[rng.random_range(0..GUEST_SUFFIX_CHARS.len())] as char)
                .collect();
            format!("{}{suffix}", policy.guest_name_prefix)
        })
    }

    /// [`find_unused_guest_name`](Self::find_unused_guest_name) with a
    /// caller-supplied name generator.
    pub fn find_unused_guest_name_with(
        &self,
        mut generate: impl FnMut() -> String,
    ) -> Result<Option<String>, SessionError> {
        for _ in 0..MAX_GUEST_NAME_ATTEMPTS {
            let name = generate();
            if !self.store.user_exists(&name)? {
                return Ok(Some(name));
            }
        }
        tracing::warn!(
            attempts = MAX_GUEST_NAME_ATTEMPTS,
            "couldn't find an unused guest name; try a longer guest_name_suffix_len"
        );
        Ok(None)
    }
}

impl Authenticator for Accounts {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, SessionError> {
        let (username, password) = (username.to_owned(), password.to_owned());
        self.run_blocking(move |accounts| accounts.verify_credentials(&username, &password))
            .await?
            .ok_or_else(|| SessionError::AuthFailed("invalid username or password".into()))
    }
}
