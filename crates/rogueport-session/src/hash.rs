//! Password hashing schemes.
//!
//! The server never compares plaintext. A [`PasswordScheme`] turns a
//! password into a self-describing hash string and checks a password
//! against one. Which scheme (and which variant of it) is used for *new*
//! hashes is configuration; verification reads the algorithm from the
//! stored string, so changing the setting never locks existing users out.

use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng;

use crate::SessionError;

/// Hashes and verifies passwords.
///
/// `Send + Sync` because one scheme instance is shared by every
/// connection task.
pub trait PasswordScheme: Send + Sync + fmt::Debug {
    /// The configured algorithm identifier, e.g. `"argon2id"`.
    fn algorithm(&self) -> &str;

    /// Hashes `password` with a freshly generated salt.
    fn hash(&self, password: &str) -> Result<String, SessionError>;

    /// Returns `true` if `password` matches the stored hash.
    ///
    /// A stored value this scheme can't parse never matches.
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Argon2 in any of its three variants, producing PHC strings.
#[derive(Debug, Clone)]
pub struct Argon2Scheme {
    algorithm: Algorithm,
    salt_length: usize,
}

impl Argon2Scheme {
    /// Smallest salt Argon2 accepts, in bytes.
    pub const MIN_SALT_LENGTH: usize = 8;
    /// Largest salt that fits a PHC salt field, in bytes.
    pub const MAX_SALT_LENGTH: usize = 48;

    /// Creates a scheme from an algorithm identifier (`argon2id`,
    /// `argon2i` or `argon2d`) and a salt length in bytes.
    pub fn new(algorithm: &str, salt_length: usize) -> Result<Self, SessionError> {
        let algorithm = algorithm
            .parse::<Algorithm>()
            .map_err(|_| SessionError::Hash(format!("unknown algorithm '{algorithm}'")))?;
        if !(Self::MIN_SALT_LENGTH..=Self::MAX_SALT_LENGTH).contains(&salt_length) {
            return Err(SessionError::Hash(format!(
                "salt length {salt_length} outside {}..={}",
                Self::MIN_SALT_LENGTH,
                Self::MAX_SALT_LENGTH
            )));
        }
        Ok(Self {
            algorithm,
            salt_length,
        })
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(self.algorithm, Version::V0x13, Params::default())
    }
}

impl Default for Argon2Scheme {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Argon2id,
            salt_length: 16,
        }
    }
}

impl PasswordScheme for Argon2Scheme {
    fn algorithm(&self) -> &str {
        self.algorithm.as_str()
    }

    fn hash(&self, password: &str) -> Result<String, SessionError> {
        let mut bytes = vec![0u8; self.salt_length];
        rand::rng().fill(&mut bytes[..]);
        let salt = SaltString::encode_b64(&bytes)
            .map_err(|e| SessionError::Hash(e.to_string()))?;
        self.hasher()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| SessionError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        // Parameters and variant come from the stored string, not from
        // the current configuration.
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
