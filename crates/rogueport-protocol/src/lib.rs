//! Wire protocol for rogueport.
//!
//! This crate defines what travels over a client connection:
//!
//! - **Client requests** ([`ClientMessage`]): the plain-text lines a
//!   browser client sends (`Login: alice hunter2`, `Pong`, keystrokes…).
//! - **Server control messages** ([`ServerMessage`]): JSON objects the
//!   server sends to drive the client (`ping`, `login_failed`, …).
//! - **Outbound frames** ([`Outbound`]): either a control message or a
//!   raw line of game output, relayed verbatim.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how control messages
//!   become text.
//!
//! The protocol layer knows nothing about sockets or processes. It only
//! turns text into typed messages and back.
//!
//! ```text
//! Transport (text) → Protocol (ClientMessage / Outbound) → Orchestrator
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{ClientMessage, Outbound, ServerMessage};
