//! # rogueport
//!
//! Session backend for a browser-playable terminal roguelike.
//!
//! Each player connects over a WebSocket, logs in, and gets their own game
//! engine process. rogueport relays the terminal stream between the two,
//! keeps idle clients honest with a ping/pong heartbeat, and reloads its
//! configuration and game list without dropping anyone.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rogueport::prelude::*;
//!
//! # async fn start() -> Result<(), RogueportError> {
//! let server = RogueportServer::builder()
//!     .config_path("config.toml")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! ## Layers
//!
//! | Crate | Role |
//! |---|---|
//! | `rogueport-transport` | WebSocket listener and connections |
//! | `rogueport-protocol` | Client requests and server control messages |
//! | `rogueport-session` | Accounts, sessions and login tokens |
//! | `rogueport-config` | Settings, game definitions and live reload |
//! | `rogueport-heartbeat` | Ping/pong liveness timer |
//! | `rogueport` | The orchestrator tying them together |

mod connections;
mod error;
mod handler;
mod process;
mod server;

pub use connections::{ConnectionState, ConnectionTable, Rejection};
pub use error::{ProcessError, RogueportError};
pub use handler::{GAME_ENDED_NOTICE, SHUTDOWN_NOTICE};
pub use process::{GameProcess, ProcessEvent};
pub use server::{ControlHandle, RogueportServer, RogueportServerBuilder, account_policy};

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::{
        ControlHandle, GAME_ENDED_NOTICE, RogueportError, RogueportServer,
        RogueportServerBuilder, SHUTDOWN_NOTICE,
    };
    pub use rogueport_config::{ConfigSnapshot, LiveConfig, ServerConfig};
    pub use rogueport_protocol::{ClientMessage, ServerMessage};
}
