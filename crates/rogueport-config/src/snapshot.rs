//! Versioned configuration snapshots and live reload.
//!
//! A [`ConfigSnapshot`] is never mutated. Reloading builds a complete new
//! snapshot from the files and the current registry, validates it, and
//! only then swaps it into [`LiveConfig`]:
//!
//! ```text
//! build_full_reload / build_games_reload   (read files, merge, validate)
//!         │ Ok(snapshot)             │ Err(e)
//!         ▼                          ▼
//!      commit()                previous snapshot stays active
//! ```
//!
//! Reloads run one at a time under [`LiveConfig::begin_reload`], and
//! `commit` refuses a snapshot built on anything but the active one.
//!
//! Connections hold an `Arc` to the snapshot they started with, so a
//! reload never changes anything underneath a running game.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::{ConfigError, GameDefinition, GameRegistry, ServerConfig, load_games_dir};

/// One immutable, validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Increases by one with every committed reload.
    pub version: u64,
    pub settings: Arc<ServerConfig>,
    pub games: GameRegistry,
    /// Ids declared by the primary config. Games directory files can't
    /// redefine these.
    pub declared: Arc<HashSet<String>>,
    /// Version of the snapshot this one was built from. 0 for a first load.
    base: u64,
}

impl ConfigSnapshot {
    /// Builds and validates a snapshot from settings alone, reading the
    /// games directory if the settings ask for it.
    pub fn build(settings: ServerConfig) -> Result<Self, ConfigError> {
        Self::assemble(settings, GameRegistry::new(), 0, 1)
    }

    fn assemble(
        settings: ServerConfig,
        mut games: GameRegistry,
        base: u64,
        version: u64,
    ) -> Result<Self, ConfigError> {
        let declared = declared_games(&settings);
        let declared_ids: HashSet<String> = declared.iter().map(|g| g.id.clone()).collect();

        let report = games.merge(declared);
        if !report.is_empty() {
            tracing::info!(count = report.added.len() + report.updated.len(), "read games from config file");
        }

        if settings.reads_games_dir() {
            let delta = load_games_dir(&settings.games_dir, &declared_ids)?;
            let report = games.merge(delta);
            for id in &report.added {
                tracing::info!(game = %id, "loaded game config");
            }
            for id in &report.updated {
                tracing::info!(game = %id, "updated game config");
            }
        } else {
            tracing::debug!("skipping games directory based on config");
        }

        let snapshot = Self {
            version,
            settings: Arc::new(settings),
            games,
            declared: Arc::new(declared_ids),
            base,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks the registry as a whole: it must not be empty, and every
    /// game's binary and client directory must exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.games.is_empty() {
            return Err(ConfigError::NoGames);
        }
        for game in self.games.iter() {
            for (field, path) in [
                ("crawl_binary", &game.crawl_binary),
                ("client_path", &game.client_path),
            ] {
                if !Path::new(path).exists() {
                    return Err(ConfigError::MissingPath {
                        game_id: game.id.clone(),
                        field,
                        path: PathBuf::from(path),
                    });
                }
            }
        }
        Ok(())
    }
}

fn declared_games(settings: &ServerConfig) -> Vec<GameDefinition> {
    let mut seen = HashSet::new();
    settings
        .games
        .iter()
        .filter_map(|table| match GameDefinition::from_table(table) {
            Ok(game) if seen.insert(game.id.clone()) => Some(game),
            Ok(game) => {
                tracing::warn!(game = %game.id, "duplicate game id in config file, skipping");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping game definition");
                None
            }
        })
        .collect()
}

/// The active configuration plus the means to reload it.
pub struct LiveConfig {
    path: PathBuf,
    current: RwLock<Arc<ConfigSnapshot>>,
    last_version: AtomicU64,
    reloading: Mutex<()>,
}

impl LiveConfig {
    /// Loads the primary config at `path` (plus override file and games
    /// directory) and validates it.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; at startup these are fatal.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = ServerConfig::from_file(&path)?;
        let snapshot = ConfigSnapshot::build(settings)?;
        tracing::info!(
            path = %path.display(),
            games = snapshot.games.len(),
            "configuration loaded"
        );
        Ok(Self::from_snapshot(path, snapshot))
    }

    /// Wraps an already built snapshot. `path` is re-read on full reload.
    pub fn from_snapshot(path: impl Into<PathBuf>, snapshot: ConfigSnapshot) -> Self {
        let version = snapshot.version;
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(snapshot)),
            last_version: AtomicU64::new(version),
            reloading: Mutex::new(()),
        }
    }

    /// The active snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Path of the primary config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until no other reload is in progress. Hold the guard from
    /// build through commit and whatever must be applied alongside it.
    ///
    /// [`reload_all`](Self::reload_all) and
    /// [`reload_games`](Self::reload_games) take it themselves.
    pub fn begin_reload(&self) -> MutexGuard<'_, ()> {
        self.reloading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-reads the primary and override files and the games directory,
    /// merging into a copy of the live registry. Nothing is swapped.
    pub fn build_full_reload(&self) -> Result<ConfigSnapshot, ConfigError> {
        let current = self.current();
        let settings = ServerConfig::from_file(&self.path)?;

        for key in settings.restart_only_changes(&current.settings) {
            tracing::warn!(%key, "setting changed; it takes effect after a restart");
        }

        ConfigSnapshot::assemble(
            settings,
            current.games.clone(),
            current.version,
            self.next_version(),
        )
    }

    /// Re-scans the games directory only, keeping the current settings.
    ///
    /// Returns `Ok(None)` when the settings say not to read the directory.
    pub fn build_games_reload(&self) -> Result<Option<ConfigSnapshot>, ConfigError> {
        let current = self.current();
        if !current.settings.reads_games_dir() {
            tracing::warn!("games directory is disabled by config; nothing to reload");
            return Ok(None);
        }

        let mut games = current.games.clone();
        let delta = load_games_dir(&current.settings.games_dir, &current.declared)?;
        let report = games.merge(delta);
        for id in &report.added {
            tracing::info!(game = %id, "loaded game config");
        }
        for id in &report.updated {
            tracing::info!(game = %id, "updated game config");
        }

        let snapshot = ConfigSnapshot {
            version: self.next_version(),
            settings: Arc::clone(&current.settings),
            games,
            declared: Arc::clone(&current.declared),
            base: current.version,
        };
        snapshot.validate()?;
        Ok(Some(snapshot))
    }

    /// Makes `snapshot` the active configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::StaleReload`] if another snapshot was committed
    /// since `snapshot` was built. Nothing changes.
    pub fn commit(&self, snapshot: ConfigSnapshot) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.version != snapshot.base {
            return Err(ConfigError::StaleReload {
                built_on: snapshot.base,
                current: current.version,
            });
        }
        let snapshot = Arc::new(snapshot);
        *current = Arc::clone(&snapshot);
        drop(current);
        tracing::info!(
            version = snapshot.version,
            games = snapshot.games.len(),
            "configuration swapped"
        );
        Ok(snapshot)
    }

    /// [`build_full_reload`](Self::build_full_reload) then
    /// [`commit`](Self::commit).
    pub fn reload_all(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let _reload = self.begin_reload();
        let snapshot = self.build_full_reload()?;
        self.commit(snapshot)
    }

    /// [`build_games_reload`](Self::build_games_reload) then
    /// [`commit`](Self::commit). Returns the unchanged snapshot when the
    /// directory is disabled.
    pub fn reload_games(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let _reload = self.begin_reload();
        match self.build_games_reload()? {
            Some(snapshot) => self.commit(snapshot),
            None => Ok(self.current()),
        }
    }

    fn next_version(&self) -> u64 {
        self.last_version.fetch_add(1, Ordering::Relaxed) + 1
    }
}
