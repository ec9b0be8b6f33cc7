//! Player identity for rogueport: who may log in, and for how long.
//!
//! This crate covers everything between "a client typed a password" and
//! "the orchestrator knows the canonical username":
//!
//! 1. **Credential store**: the SQLite user and login-token tables
//!    ([`CredentialStore`])
//! 2. **Password hashing**: a pluggable scheme selected by configuration
//!    ([`PasswordScheme`], [`Argon2Scheme`])
//! 3. **Accounts**: verification, registration, guest names
//!    ([`Accounts`], [`AccountPolicy`], the [`Authenticator`] trait)
//! 4. **Sessions**: short-lived in-memory sessions with a sliding and an
//!    absolute expiry ([`SessionManager`])
//! 5. **Login tokens**: persistent single-use remember-me cookies that
//!    rotate on every use ([`LoginTokens`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Orchestrator (above)  ← asks "who is this?" during login
//!     ↕
//! Session Layer (this crate)  ← accounts, sessions, rotation chains
//!     ↕
//! SQLite (below)  ← dglusers / login_tokens tables
//! ```

#![allow(async_fn_in_trait)]

mod accounts;
mod error;
mod hash;
mod manager;
mod session;
mod store;
mod tokens;

pub use accounts::{AccountPolicy, Accounts, Authenticator, MAX_GUEST_NAME_ATTEMPTS};
pub use error::SessionError;
pub use hash::{Argon2Scheme, PasswordScheme};
pub use manager::SessionManager;
pub use session::{Session, SessionConfig};
pub use store::{CredentialStore, StoredUser};
pub use tokens::{LoginCookie, LoginTokens, TokenLogin};
