//! Core protocol types: what clients send and what the server answers.
//!
//! Inbound traffic is plain text. Before a game starts the server parses
//! each line as a request ([`ClientMessage::parse`]); once a game runs,
//! everything except `Pong` is keystroke data for the engine and is not
//! parsed at all.
//!
//! Outbound traffic is either a JSON control message ([`ServerMessage`])
//! or a raw line of engine output ([`Outbound::Raw`]).

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::{Codec, ProtocolError};

// ---------------------------------------------------------------------------
// ClientMessage: client → server
// ---------------------------------------------------------------------------

/// A request from the client.
///
/// Prefixed requests (`Login:`, `Token:`, …) must have exactly the
/// documented number of space-separated words, otherwise
/// [`ClientMessage::parse`] returns [`ProtocolError::InvalidMessage`].
/// Text without a known prefix is [`ClientMessage::Input`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `Login: <username> <password>`
    Login { username: String, password: String },

    /// `Token: <cookie>`: log in through a remember-me cookie.
    TokenLogin { cookie: String },

    /// `Session: <session-id>`: resume an existing server session.
    SessionLogin { session_id: String },

    /// `Register: <username> <password> [email]`
    Register {
        username: String,
        password: String,
        email: Option<String>,
    },

    /// `Logout: <cookie>`: forget a remember-me cookie.
    Logout { cookie: String },

    /// `Guest`: play under a generated guest name.
    Guest,

    /// `Play: <game-id>`: choose which game variant to launch.
    Play { game_id: String },

    /// `Pong`: reply to the most recent heartbeat ping.
    Pong,

    /// Anything else. Forwarded to the game once one is running.
    Input(String),
}

const LOGIN_PREFIX: &str = "Login: ";
const TOKEN_PREFIX: &str = "Token: ";
const SESSION_PREFIX: &str = "Session: ";
const REGISTER_PREFIX: &str = "Register: ";
const LOGOUT_PREFIX: &str = "Logout: ";
const PLAY_PREFIX: &str = "Play: ";

impl ClientMessage {
    /// Returns `true` if `text` is a heartbeat reply.
    ///
    /// The running-game path only needs this check, so it avoids a full
    /// parse of every keystroke.
    pub fn is_pong(text: &str) -> bool {
        text == "Pong"
    }

    /// Parses one inbound text message.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] when a known prefix is
    /// followed by the wrong number of words.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if Self::is_pong(text) {
            return Ok(Self::Pong);
        }
        if text == "Guest" {
            return Ok(Self::Guest);
        }

        if text.starts_with(LOGIN_PREFIX) {
            let [username, password] = words::<2>(text, "Login")?;
            return Ok(Self::Login { username, password });
        }
        if text.starts_with(TOKEN_PREFIX) {
            let [cookie] = words::<1>(text, "Token")?;
            return Ok(Self::TokenLogin { cookie });
        }
        if text.starts_with(SESSION_PREFIX) {
            let [session_id] = words::<1>(text, "Session")?;
            return Ok(Self::SessionLogin { session_id });
        }
        if text.starts_with(LOGOUT_PREFIX) {
            let [cookie] = words::<1>(text, "Logout")?;
            return Ok(Self::Logout { cookie });
        }
        if text.starts_with(PLAY_PREFIX) {
            let [game_id] = words::<1>(text, "Play")?;
            return Ok(Self::Play { game_id });
        }
        if text.starts_with(REGISTER_PREFIX) {
            // The email is optional, so this one takes two or three words.
            let parts: Vec<&str> = text.split_whitespace().skip(1).collect();
            return match parts.as_slice() {
                [username, password] => Ok(Self::Register {
                    username: (*username).to_owned(),
                    password: (*password).to_owned(),
                    email: None,
                }),
                [username, password, email] => Ok(Self::Register {
                    username: (*username).to_owned(),
                    password: (*password).to_owned(),
                    email: Some((*email).to_owned()),
                }),
                _ => Err(ProtocolError::InvalidMessage(
                    "Register expects a username, a password and an optional email"
                        .into(),
                )),
            };
        }

        Ok(Self::Input(text.to_owned()))
    }
}

/// Splits the words after the request prefix, requiring exactly `N`.
fn words<const N: usize>(
    text: &str,
    request: &str,
) -> Result<[String; N], ProtocolError> {
    let parts: Vec<String> = text
        .split_whitespace()
        .skip(1)
        .map(str::to_owned)
        .collect();
    let count = parts.len();
    parts.try_into().map_err(|_| {
        ProtocolError::InvalidMessage(format!(
            "{request} expects {N} argument(s), got {count}"
        ))
    })
}

// ---------------------------------------------------------------------------
// ServerMessage: server → client
// ---------------------------------------------------------------------------

/// A control message from the server.
///
/// Internally tagged on `msg`, so the client sees e.g.
/// `{"msg":"connection_closed","reason":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Heartbeat probe. The client must answer `Pong`.
    Ping,

    /// A login request was rejected or malformed.
    LoginFailed { reason: String },

    /// Login succeeded; the game is starting.
    LoginSuccess {
        username: String,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cookie: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cookie_expires: Option<i64>,
    },

    /// A registration request was rejected.
    RegisterFailed { reason: String },

    /// The server is closing this connection.
    ConnectionClosed { reason: String },
}

// ---------------------------------------------------------------------------
// Outbound: one frame to the client
// ---------------------------------------------------------------------------

/// One outbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A control message, encoded by the codec.
    Control(ServerMessage),
    /// A line of engine output, sent exactly as the engine wrote it.
    Raw(String),
}

impl Outbound {
    /// Renders the frame as text.
    ///
    /// Raw lines are borrowed untouched; only control messages go
    /// through the codec.
    pub fn render<'a>(
        &'a self,
        codec: &impl Codec,
    ) -> Result<Cow<'a, str>, ProtocolError> {
        match self {
            Self::Control(msg) => codec.encode(msg).map(Cow::Owned),
            Self::Raw(line) => Ok(Cow::Borrowed(line)),
        }
    }
}

impl From<ServerMessage> for Outbound {
    fn from(msg: ServerMessage) -> Self {
        Self::Control(msg)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonCodec;

    // =====================================================================
    // ClientMessage::parse
    // =====================================================================

    #[test]
    fn test_parse_login_two_words_returns_login() {
        let msg = ClientMessage::parse("Login: alice hunter2").unwrap();
        assert_eq!(
            msg,
            ClientMessage::Login {
                username: "alice".into(),
                password: "hunter2".into(),
            }
        );
    }

    #[test]
    fn test_parse_login_wrong_word_count_is_invalid() {
        assert!(matches!(
            ClientMessage::parse("Login: alice"),
            Err(ProtocolError::InvalidMessage(_))
        ));
        assert!(matches!(
            ClientMessage::parse("Login: alice hunter 2"),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_parse_pong_and_guest() {
        assert_eq!(ClientMessage::parse("Pong").unwrap(), ClientMessage::Pong);
        assert_eq!(ClientMessage::parse("Guest").unwrap(), ClientMessage::Guest);
        // Only the exact word counts as a heartbeat reply.
        assert!(ClientMessage::is_pong("Pong"));
        assert!(!ClientMessage::is_pong("Pong "));
    }

    #[test]
    fn test_parse_register_with_and_without_email() {
        assert_eq!(
            ClientMessage::parse("Register: bob secret").unwrap(),
            ClientMessage::Register {
                username: "bob".into(),
                password: "secret".into(),
                email: None,
            }
        );
        assert_eq!(
            ClientMessage::parse("Register: bob secret bob@example.org").unwrap(),
            ClientMessage::Register {
                username: "bob".into(),
                password: "secret".into(),
                email: Some("bob@example.org".into()),
            }
        );
        assert!(ClientMessage::parse("Register: bob").is_err());
    }

    #[test]
    fn test_parse_single_argument_requests() {
        assert_eq!(
            ClientMessage::parse("Token: bob:abc:def").unwrap(),
            ClientMessage::TokenLogin {
                cookie: "bob:abc:def".into()
            }
        );
        assert_eq!(
            ClientMessage::parse("Session: 1f2e").unwrap(),
            ClientMessage::SessionLogin {
                session_id: "1f2e".into()
            }
        );
        assert_eq!(
            ClientMessage::parse("Play: dcss-trunk").unwrap(),
            ClientMessage::Play {
                game_id: "dcss-trunk".into()
            }
        );
        assert_eq!(
            ClientMessage::parse("Logout: bob:abc:def").unwrap(),
            ClientMessage::Logout {
                cookie: "bob:abc:def".into()
            }
        );
        assert!(ClientMessage::parse("Play: a b").is_err());
    }

    #[test]
    fn test_parse_unprefixed_text_is_input() {
        let raw = r#"{"msg":"key","keycode":104}"#;
        assert_eq!(
            ClientMessage::parse(raw).unwrap(),
            ClientMessage::Input(raw.into())
        );
        // Prefix matching is exact, including the trailing space.
        assert_eq!(
            ClientMessage::parse("Login:alice pw").unwrap(),
            ClientMessage::Input("Login:alice pw".into())
        );
    }

    // =====================================================================
    // ServerMessage JSON shape
    // =====================================================================

    #[test]
    fn test_server_message_ping_json_format() {
        let json = serde_json::to_value(ServerMessage::Ping).unwrap();
        assert_eq!(json, serde_json::json!({ "msg": "ping" }));
    }

    #[test]
    fn test_server_message_connection_closed_carries_reason() {
        let json = serde_json::to_value(ServerMessage::ConnectionClosed {
            reason: "bye".into(),
        })
        .unwrap();
        assert_eq!(json["msg"], "connection_closed");
        assert_eq!(json["reason"], "bye");
    }

    #[test]
    fn test_server_message_login_success_omits_missing_cookie() {
        let json = serde_json::to_value(ServerMessage::LoginSuccess {
            username: "alice".into(),
            session_id: "s1".into(),
            cookie: None,
            cookie_expires: None,
        })
        .unwrap();
        assert_eq!(json["msg"], "login_success");
        assert!(json.get("cookie").is_none());
    }

    // =====================================================================
    // Outbound::render
    // =====================================================================

    #[test]
    fn test_outbound_raw_is_verbatim() {
        let line = r#"{"msg":"txt","lines":{"0":"hello"}}"#;
        let out = Outbound::Raw(line.into());
        assert_eq!(out.render(&JsonCodec).unwrap(), line);
    }

    #[test]
    fn test_outbound_control_goes_through_codec() {
        let out: Outbound = ServerMessage::LoginFailed {
            reason: "nope".into(),
        }
        .into();
        let text = out.render(&JsonCodec).unwrap();
        let back: ServerMessage = JsonCodec.decode(&text).unwrap();
        assert_eq!(
            back,
            ServerMessage::LoginFailed {
                reason: "nope".into()
            }
        );
    }
}
