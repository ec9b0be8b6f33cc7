//! Server settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Every top-level key the server understands. Anything else in a config
/// file is warned about and dropped.
pub(crate) const KEYS: &[&str] = &[
    "bind_address",
    "bind_port",
    "password_db",
    "max_connections",
    "connection_timeout",
    "kill_timeout",
    "session_lifetime",
    "session_sweep_interval",
    "login_token_lifetime",
    "nick_regex",
    "min_username_length",
    "max_passwd_length",
    "crypt_algorithm",
    "crypt_salt_length",
    "reserved_names",
    "reserved_names_can_register",
    "allow_guests",
    "guest_name_prefix",
    "guest_name_suffix_len",
    "games_dir",
    "use_games_dir",
    "override_file",
    "games",
];

/// Settings that only take effect when the listener or store is created.
pub(crate) const RESTART_KEYS: &[&str] = &["bind_address", "bind_port", "password_db"];

const DEFAULT_OVERRIDE_FILE: &str = "config.local.toml";

/// Top-level server configuration.
///
/// Every field has a default, so an empty file is a valid configuration
/// (although it defines no games).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// SQLite user database. Created if missing.
    #[serde(default = "default_password_db")]
    pub password_db: PathBuf,

    /// Connections beyond this are turned away.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Heartbeat interval in seconds. A client that doesn't answer a ping
    /// within one interval is disconnected.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Seconds a game gets to exit after SIGHUP before it is killed.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    /// Absolute session lifetime in seconds.
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: u64,

    /// Seconds between sweeps of expired sessions and login tokens.
    #[serde(default = "default_session_sweep_interval")]
    pub session_sweep_interval: u64,

    /// Remember-me cookie lifetime in days.
    #[serde(default = "default_login_token_lifetime")]
    pub login_token_lifetime: u32,

    /// Pattern usernames must match at registration.
    #[serde(default = "default_nick_regex")]
    pub nick_regex: String,

    /// Shortest accepted username.
    #[serde(default = "default_min_username_length")]
    pub min_username_length: usize,

    /// Legacy mode: only the first N characters of a password count.
    #[serde(default)]
    pub max_passwd_length: Option<usize>,

    /// `argon2id`, `argon2i` or `argon2d`.
    #[serde(default = "default_crypt_algorithm")]
    pub crypt_algorithm: String,

    /// Salt length in bytes.
    #[serde(default = "default_crypt_salt_length")]
    pub crypt_salt_length: usize,

    #[serde(default)]
    pub reserved_names: Vec<String>,

    #[serde(default)]
    pub reserved_names_can_register: bool,

    /// Allow the `Guest` login request.
    #[serde(default)]
    pub allow_guests: bool,

    #[serde(default = "default_guest_name_prefix")]
    pub guest_name_prefix: String,

    #[serde(default = "default_guest_name_suffix_len")]
    pub guest_name_suffix_len: usize,

    /// Directory of game definition files. Relative paths are resolved
    /// against the primary config file's directory.
    #[serde(default = "default_games_dir")]
    pub games_dir: PathBuf,

    /// `None`: read the games directory only if `games` is empty.
    #[serde(default)]
    pub use_games_dir: Option<bool>,

    /// Override file. Relative paths are resolved like `games_dir`.
    #[serde(default = "default_override_file")]
    pub override_file: PathBuf,

    /// Games declared in this file. They take precedence over the games
    /// directory and can't be overridden.
    #[serde(default)]
    pub games: Vec<toml::Table>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_bind_port() -> u16 {
    8080
}
fn default_password_db() -> PathBuf {
    PathBuf::from("passwd.db3")
}
fn default_max_connections() -> usize {
    100
}
fn default_connection_timeout() -> u64 {
    600
}
fn default_kill_timeout() -> u64 {
    10
}
fn default_session_lifetime() -> u64 {
    24 * 60 * 60
}
fn default_session_sweep_interval() -> u64 {
    60
}
fn default_login_token_lifetime() -> u32 {
    7
}
fn default_nick_regex() -> String {
    "^[a-zA-Z0-9]{3,20}$".to_string()
}
fn default_min_username_length() -> usize {
    3
}
fn default_crypt_algorithm() -> String {
    "argon2id".to_string()
}
fn default_crypt_salt_length() -> usize {
    16
}
fn default_guest_name_prefix() -> String {
    "Guest".to_string()
}
fn default_guest_name_suffix_len() -> usize {
    4
}
fn default_games_dir() -> PathBuf {
    PathBuf::from("games.d")
}
fn default_override_file() -> PathBuf {
    PathBuf::from(DEFAULT_OVERRIDE_FILE)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            password_db: default_password_db(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            kill_timeout: default_kill_timeout(),
            session_lifetime: default_session_lifetime(),
            session_sweep_interval: default_session_sweep_interval(),
            login_token_lifetime: default_login_token_lifetime(),
            nick_regex: default_nick_regex(),
            min_username_length: default_min_username_length(),
            max_passwd_length: None,
            crypt_algorithm: default_crypt_algorithm(),
            crypt_salt_length: default_crypt_salt_length(),
            reserved_names: Vec::new(),
            reserved_names_can_register: false,
            allow_guests: false,
            guest_name_prefix: default_guest_name_prefix(),
            guest_name_suffix_len: default_guest_name_suffix_len(),
            games_dir: default_games_dir(),
            use_games_dir: None,
            override_file: default_override_file(),
            games: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads the primary file at `path` and applies its override file.
    ///
    /// # Errors
    ///
    /// Returns an error if either file can't be read or parsed, or if the
    /// override file declares `games`. A missing override file is fine.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut table = read_table(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let override_path = match table.get("override_file").and_then(|v| v.as_str()) {
            Some(file) => resolve(base, Path::new(file)),
            None => base.join(DEFAULT_OVERRIDE_FILE),
        };
        if override_path.is_file() {
            let overrides = read_table(&override_path)?;
            if overrides.contains_key("games") {
                return Err(ConfigError::OverrideGames(override_path));
            }
            tracing::info!(path = %override_path.display(), "applying config overrides");
            for (key, value) in overrides {
                table.insert(key, value);
            }
        }

        let mut config = Self::from_table(table, path)?;
        config.games_dir = resolve(base, &config.games_dir);
        config.override_file = override_path;
        Ok(config)
    }

    /// Parses settings from a TOML string. Paths are left as written.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a setting has the wrong
    /// type.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let origin = Path::new("<inline>");
        let table = content
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        Self::from_table(table, origin)
    }

    fn from_table(mut table: toml::Table, origin: &Path) -> Result<Self, ConfigError> {
        table.retain(|key, _| {
            let known = KEYS.contains(&key);
            if !known {
                tracing::warn!(%key, file = %origin.display(), "ignoring unknown config key");
            }
            known
        });
        toml::Value::Table(table)
            .try_into()
            .map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })
    }

    /// `address:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval.max(1))
    }

    /// Whether the games directory should be read, given `use_games_dir`
    /// and whether this file declares games itself.
    pub fn reads_games_dir(&self) -> bool {
        self.use_games_dir.unwrap_or(self.games.is_empty())
    }

    /// Names of the restart-only settings that differ from `other`.
    pub fn restart_only_changes(&self, other: &Self) -> Vec<&'static str> {
        RESTART_KEYS
            .iter()
            .copied()
            .filter(|key| match *key {
                "bind_address" => self.bind_address != other.bind_address,
                "bind_port" => self.bind_port != other.bind_port,
                "password_db" => self.password_db != other.password_db,
                _ => false,
            })
            .collect()
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .parse::<toml::Table>()
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
