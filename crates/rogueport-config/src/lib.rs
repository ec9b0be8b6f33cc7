//! Configuration for rogueport: server settings and the game registry.
//!
//! Configuration lives in TOML files:
//!
//! - the **primary** file, passed on the command line
//! - an optional **override** file beside it (`config.local.toml`), whose
//!   top-level keys replace the primary file's
//! - a **games directory** of `*.toml` files, each holding a `games` list
//!
//! Everything is bundled into an immutable [`ConfigSnapshot`]. Reloading
//! builds and validates a whole new snapshot and then swaps it into
//! [`LiveConfig`]; a failed reload leaves the previous one in force.
//!
//! # Key types
//!
//! - [`ServerConfig`]: typed server settings with defaults
//! - [`GameDefinition`]: one playable variant, validated against [`FIELDS`]
//! - [`GameRegistry`]: ordered, add-or-update-only map of definitions
//! - [`LiveConfig`]: the current snapshot plus the reload operations

mod error;
mod games;
mod loader;
mod registry;
mod settings;
mod snapshot;

pub use error::ConfigError;
pub use games::{FIELDS, FieldSpec, FieldType, GameDefinition, GameLaunch};
pub use loader::load_games_dir;
pub use registry::{GameRegistry, MergeReport};
pub use settings::ServerConfig;
pub use snapshot::{ConfigSnapshot, LiveConfig};
