//! Error types for the configuration layer.

use std::path::PathBuf;

/// Errors that can occur while loading or reloading configuration.
///
/// At startup any of these is fatal. During a reload they are logged and
/// the previous snapshot stays active.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file or directory couldn't be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file isn't valid TOML or has mistyped settings.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The override file tried to declare games.
    #[error("can't override 'games' in {}; use the games directory instead", .0.display())]
    OverrideGames(PathBuf),

    /// A single game definition failed schema validation.
    #[error("invalid game definition '{id}': {reason}")]
    InvalidGame { id: String, reason: String },

    /// The resulting registry would be empty.
    #[error("no games defined")]
    NoGames,

    /// A game refers to a binary or client directory that isn't there.
    #[error("game '{game_id}': {field} {} doesn't exist", .path.display())]
    MissingPath {
        game_id: String,
        field: &'static str,
        path: PathBuf,
    },

    /// A reload was built on a snapshot that is no longer active.
    #[error("reload built on config version {built_on} but version {current} is active")]
    StaleReload { built_on: u64, current: u64 },
}
