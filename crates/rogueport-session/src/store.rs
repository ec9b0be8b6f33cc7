//! The credential store: users and login tokens in SQLite.
//!
//! Pure data access. Policy (who may register, how passwords are hashed,
//! when tokens expire) lives in [`Accounts`](crate::Accounts) and
//! [`LoginTokens`](crate::LoginTokens); this module only runs queries.
//!
//! The schema matches the long-standing dgamelaunch layout so an existing
//! password database can be pointed at directly.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};

use crate::SessionError;

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS dglusers (\
    id integer primary key, username text, email text, env text, \
    password text, flags integer)";

const CREATE_LOGIN_TOKENS: &str = "CREATE TABLE IF NOT EXISTS login_tokens (\
    username text, seqid text, token text, expires integer, \
    PRIMARY KEY (username, seqid))";

/// A user row as needed for authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    /// The username with its stored capitalisation.
    pub username: String,
    /// The stored password hash (PHC string).
    pub password_hash: String,
}

/// SQLite-backed user and login-token tables.
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a mutex. Every
/// method holds the lock for one short query and never across an await.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Opens (creating if needed) the database at `path` and ensures both
    /// tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "user database didn't exist; creating it now");
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database. Used by tests and tools.
    pub fn open_in_memory() -> Result<Self, SessionError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SessionError> {
        conn.execute(CREATE_USERS, [])?;
        conn.execute(CREATE_LOGIN_TOKENS, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, SessionError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn).map_err(SessionError::from)
    }

    // -- Users ------------------------------------------------------------

    /// Looks up a user case-insensitively.
    pub fn find_user(&self, username: &str) -> Result<Option<StoredUser>, SessionError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT username, password FROM dglusers \
                 WHERE username = ?1 COLLATE NOCASE",
                params![username],
                |row| {
                    Ok(StoredUser {
                        username: row.get(0)?,
                        password_hash: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Returns `true` if a user with this name exists (case-insensitive).
    pub fn user_exists(&self, username: &str) -> Result<bool, SessionError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM dglusers WHERE username = ?1 COLLATE NOCASE",
                params![username],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
        })
    }

    /// Inserts a new user row.
    pub fn insert_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<(), SessionError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO dglusers(username, email, password, flags, env) \
                 VALUES (?1, ?2, ?3, 0, '')",
                params![username, email.unwrap_or(""), password_hash],
            )
            .map(|_| ())
        })
    }

    /// Replaces a user's password hash. Returns `true` if a row changed.
    pub fn update_password(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<bool, SessionError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE dglusers SET password = ?1 WHERE username = ?2 COLLATE NOCASE",
                params![password_hash, username],
            )
            .map(|changed| changed > 0)
        })
    }

    // -- Login tokens -----------------------------------------------------

    /// Fetches and deletes the token row for `(username, seqid)` in one
    /// transaction. A row can therefore be presented at most once.
    pub fn take_login_token(
        &self,
        username: &str,
        seqid: &str,
    ) -> Result<Option<(String, i64)>, SessionError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT token, expires FROM login_tokens \
                     WHERE username = ?1 AND seqid = ?2",
                    params![username, seqid],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            tx.execute(
                "DELETE FROM login_tokens WHERE username = ?1 AND seqid = ?2",
                params![username, seqid],
            )?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Stores a token row, replacing any row with the same key.
    pub fn insert_login_token(
        &self,
        username: &str,
        seqid: &str,
        token: &str,
        expires: i64,
    ) -> Result<(), SessionError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO login_tokens(username, seqid, token, expires) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![username, seqid, token, expires],
            )
            .map(|_| ())
        })
    }

    /// Deletes one token row. Returns `true` if it existed.
    pub fn delete_login_token(&self, username: &str, seqid: &str) -> Result<bool, SessionError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM login_tokens WHERE username = ?1 AND seqid = ?2",
                params![username, seqid],
            )
            .map(|n| n > 0)
        })
    }

    /// Deletes every token row for `username`. Returns how many went.
    pub fn delete_login_tokens(&self, username: &str) -> Result<usize, SessionError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM login_tokens WHERE username = ?1",
                params![username],
            )
        })
    }

    /// Deletes every token row that expired before `now` (unix seconds).
    pub fn purge_login_tokens(&self, now: i64) -> Result<usize, SessionError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM login_tokens WHERE expires < ?1", params![now])
        })
    }

    /// Counts the token rows held for `username`.
    pub fn count_login_tokens(&self, username: &str) -> Result<usize, SessionError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM login_tokens WHERE username = ?1",
                params![username],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
        })
    }
}
