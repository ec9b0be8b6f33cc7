//! Per-connection handler: admission, login, process relay and close.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Admit the connection, or tell the client why not and close
//!   2. Authenticating: answer login requests until one succeeds
//!   3. Running: relay client input to the game and game output back
//!   4. Close both sides; the task ends once the process has exited
//!
//! Every event (client frame, process output or exit, heartbeat deadline,
//! drain notice, kill deadline) is one branch of a single `select!`, and
//! the process liveness check runs after each of them.

use std::sync::Arc;

use rogueport_heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent};
use rogueport_protocol::{ClientMessage, Codec, Outbound, ServerMessage};
use rogueport_session::{Authenticator, LoginCookie, SessionError, TokenLogin};
use rogueport_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::connections::ConnectionState;
use crate::process::{GameProcess, ProcessEvent};
use crate::server::ServerState;
use crate::{ProcessError, RogueportError};

/// Sent to every client when the server starts draining.
pub const SHUTDOWN_NOTICE: &str = "The server is shutting down. Your game has been saved.";
/// Sent when the game process exits on its own.
pub const GAME_ENDED_NOTICE: &str = "The game has ended.";

const INVALID_LOGIN: &str = "Invalid username or password.";
const INVALID_TOKEN: &str = "Invalid or expired login token.";
const LOGIN_UNAVAILABLE: &str = "Login is unavailable right now, please try again later.";

/// Drop guard that unregisters the connection when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. The session
/// is left alone: it outlives the socket so the client can resume it.
struct ConnectionGuard<C: Codec> {
    conn_id: ConnectionId,
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        self.state.connections.remove(self.conn_id);
        // A live process is killed when its handle drops, so the slot is
        // free either way.
        self.state.connections.release_process(self.conn_id);
    }
}

/// How a login proved who the user is.
enum Credential {
    Password,
    Guest,
    /// Rotated remember-me cookie to hand back.
    Token(LoginCookie),
    /// Existing session being resumed.
    Session(String),
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), RogueportError> {
    let conn_id = conn.id();
    let peer = conn.peer_addr();
    tracing::debug!(%conn_id, %peer, "handling new connection");

    // --- Open: admission ---
    if let Err(rejection) = state.connections.admit(conn_id) {
        tracing::info!(%conn_id, %peer, ?rejection, "rejecting connection");
        let notice = Outbound::from(ServerMessage::ConnectionClosed {
            reason: rejection.reason().to_string(),
        });
        conn.send(&notice.render(&state.codec)?).await?;
        conn.close().await?;
        return Ok(());
    }
    tracing::info!(%conn_id, %peer, "socket opened");

    let interval = state.config.current().settings.heartbeat_interval();
    let mut task = ConnectionTask {
        conn: &conn,
        conn_id,
        status: ConnectionState::Open,
        username: None,
        game_id: None,
        process: None,
        heartbeat: Heartbeat::new(HeartbeatConfig::with_interval(interval)),
        kill_at: None,
        drain: state.connections.subscribe_drain(),
        drain_seen: false,
        client_closed: false,
        session_id: None,
        _guard: ConnectionGuard {
            conn_id,
            state: Arc::clone(&state),
        },
        state: &state,
    };
    task.status.advance(ConnectionState::Authenticating, conn_id);

    // --- Authenticating / Running ---
    task.run().await;

    tracing::info!(%conn_id, %peer, "socket closed");
    // `task._guard` drops here → unregister.
    Ok(())
}

struct ConnectionTask<'a, C: Codec> {
    conn: &'a WebSocketConnection,
    state: &'a Arc<ServerState<C>>,
    conn_id: ConnectionId,
    status: ConnectionState,
    username: Option<String>,
    /// Game picked with `Play:`. The first registry entry otherwise.
    game_id: Option<String>,
    process: Option<GameProcess>,
    heartbeat: Heartbeat,
    /// SIGKILL deadline after a SIGHUP.
    kill_at: Option<Instant>,
    drain: watch::Receiver<bool>,
    drain_seen: bool,
    client_closed: bool,
    session_id: Option<String>,
    _guard: ConnectionGuard<C>,
}

impl<C: Codec> ConnectionTask<'_, C> {
    async fn run(&mut self) {
        let conn = self.conn;
        loop {
            tokio::select! {
                biased;
                () = drain_started(&mut self.drain), if !self.drain_seen => {
                    self.drain_seen = true;
                    self.close_client(Some(SHUTDOWN_NOTICE)).await;
                }
                frame = conn.recv(), if !self.client_closed => match frame {
                    Ok(Some(text)) => self.on_message(text).await,
                    Ok(None) => {
                        tracing::debug!(conn_id = %self.conn_id, "client closed the connection");
                        self.on_client_gone();
                    }
                    Err(e) => {
                        tracing::debug!(conn_id = %self.conn_id, error = %e, "recv error");
                        self.on_client_gone();
                    }
                },
                event = next_event(&mut self.process) => self.on_process_event(event).await,
                event = self.heartbeat.wait() => match event {
                    HeartbeatEvent::SendPing => self.send(ServerMessage::Ping).await,
                    HeartbeatEvent::TimedOut => {
                        tracing::info!(conn_id = %self.conn_id, "connection timed out");
                        self.close_client(None).await;
                    }
                },
                () = sleep_until(self.kill_at) => self.kill_process(),
            }

            self.check_process().await;
            if self.client_closed && self.process.is_none() {
                self.status.advance(ConnectionState::Closed, self.conn_id);
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Client side
    // -----------------------------------------------------------------------

    async fn on_message(&mut self, text: String) {
        if ClientMessage::is_pong(&text) {
            self.heartbeat.on_pong();
            self.renew_session().await;
            return;
        }

        match self.status {
            ConnectionState::Running => self.forward_input(&text).await,
            ConnectionState::Authenticating => match ClientMessage::parse(&text) {
                Ok(request) => self.on_request(request).await,
                Err(e) => {
                    tracing::debug!(conn_id = %self.conn_id, error = %e, "malformed request");
                    self.send(ServerMessage::LoginFailed {
                        reason: e.to_string(),
                    })
                    .await;
                }
            },
            // Closing: the game is on its way out, input goes nowhere.
            _ => {}
        }
    }

    async fn forward_input(&mut self, text: &str) {
        self.check_process().await;
        let Some(process) = self.process.as_mut() else {
            return;
        };
        tracing::trace!(conn_id = %self.conn_id, "forwarding input");
        if let Err(e) = process.write_input(text).await {
            tracing::debug!(conn_id = %self.conn_id, error = %e, "couldn't write to game");
            return;
        }
        self.renew_session().await;
    }

    async fn on_request(&mut self, request: ClientMessage) {
        match request {
            ClientMessage::Login { username, password } => {
                match self.state.accounts.authenticate(&username, &password).await {
                    Ok(canonical) => self.start_game(canonical, Credential::Password).await,
                    Err(SessionError::AuthFailed(_)) => {
                        tracing::warn!(conn_id = %self.conn_id, %username, "failed login");
                        self.login_failed(INVALID_LOGIN).await;
                    }
                    Err(e) => {
                        tracing::error!(conn_id = %self.conn_id, error = %e, "login failed");
                        self.login_failed(LOGIN_UNAVAILABLE).await;
                    }
                }
            }
            ClientMessage::TokenLogin { cookie } => match self.state.tokens.consume_token(&cookie) {
                Ok(TokenLogin::Accepted { username, cookie }) => {
                    self.start_game(username, Credential::Token(cookie)).await;
                }
                Ok(TokenLogin::ChainRevoked { username }) => {
                    let dropped = self.state.sessions.lock().await.delete_user(&username);
                    tracing::warn!(conn_id = %self.conn_id, %username, dropped, "login token reuse; logged out everywhere");
                    self.login_failed(INVALID_TOKEN).await;
                }
                Ok(TokenLogin::Rejected) | Err(SessionError::InvalidToken) => {
                    self.login_failed(INVALID_TOKEN).await;
                }
                Err(e) => {
                    tracing::error!(conn_id = %self.conn_id, error = %e, "token login failed");
                    self.login_failed(LOGIN_UNAVAILABLE).await;
                }
            },
            ClientMessage::SessionLogin { session_id } => {
                let username = {
                    let mut sessions = self.state.sessions.lock().await;
                    if sessions.renew(&session_id) {
                        sessions.lookup(&session_id).and_then(|s| s.username.clone())
                    } else {
                        None
                    }
                };
                match username {
                    Some(username) => {
                        self.start_game(username, Credential::Session(session_id)).await;
                    }
                    None => self.login_failed("Your session has expired.").await,
                }
            }
            ClientMessage::Register {
                username,
                password,
                email,
            } => {
                let registration = {
                    let username = username.clone();
                    self.state
                        .accounts
                        .run_blocking(move |accounts| {
                            accounts.register(&username, &password, email.as_deref())
                        })
                        .await
                };
                match registration {
                    Ok(()) => {
                        let username = username.trim().to_owned();
                        self.start_game(username, Credential::Password).await;
                    }
                    Err(SessionError::RegistrationRejected(reason)) => {
                        self.send(ServerMessage::RegisterFailed { reason }).await;
                    }
                    Err(e) => {
                        tracing::error!(conn_id = %self.conn_id, error = %e, "registration failed");
                        self.send(ServerMessage::RegisterFailed {
                            reason: "Registration failed, please try again later.".into(),
                        })
                        .await;
                    }
                }
            }
            ClientMessage::Logout { cookie } => match self.state.tokens.forget_token(&cookie) {
                Ok(forgot) => tracing::debug!(conn_id = %self.conn_id, forgot, "logout"),
                Err(e) => tracing::debug!(conn_id = %self.conn_id, error = %e, "logout with bad cookie"),
            },
            ClientMessage::Guest => {
                if !self.state.config.current().settings.allow_guests {
                    self.login_failed("Guest logins are disabled.").await;
                    return;
                }
                let guest = self
                    .state
                    .accounts
                    .run_blocking(|accounts| accounts.find_unused_guest_name())
                    .await;
                match guest {
                    Ok(Some(name)) => self.start_game(name, Credential::Guest).await,
                    Ok(None) => self.login_failed("Couldn't find a free guest name.").await,
                    Err(e) => {
                        tracing::error!(conn_id = %self.conn_id, error = %e, "guest login failed");
                        self.login_failed(LOGIN_UNAVAILABLE).await;
                    }
                }
            }
            ClientMessage::Play { game_id } => {
                if self.state.config.current().games.contains(&game_id) {
                    self.game_id = Some(game_id);
                } else {
                    self.login_failed(&format!("Unknown game: {game_id}")).await;
                }
            }
            ClientMessage::Pong => self.heartbeat.on_pong(),
            ClientMessage::Input(_) => {
                tracing::debug!(conn_id = %self.conn_id, "ignoring message before login");
            }
        }
    }

    /// Spawns the game for an authenticated user and moves to Running.
    async fn start_game(&mut self, username: String, credential: Credential) {
        let conn_id = self.conn_id;
        let snapshot = self.state.config.current();
        let game = match &self.game_id {
            Some(id) => snapshot.games.get(id),
            None => snapshot.games.first(),
        };
        let Some(game) = game.cloned() else {
            self.login_failed("That game is not available.").await;
            return;
        };

        if !self.state.connections.attach_process(conn_id) {
            self.login_failed(SHUTDOWN_NOTICE).await;
            return;
        }
        let process = match GameProcess::spawn(&game.launch(&username)) {
            Ok(process) => process,
            Err(e) => {
                self.state.connections.release_process(conn_id);
                tracing::error!(%conn_id, %username, game = %game.id, error = %e, "couldn't start game");
                self.login_failed("The game couldn't be started.").await;
                return;
            }
        };

        let (session_id, cookie) = {
            let mut sessions = self.state.sessions.lock().await;
            match credential {
                Credential::Session(id) => (id, None),
                Credential::Token(cookie) => (sessions.create(Some(username.clone())), Some(cookie)),
                Credential::Password => {
                    let cookie = match self.state.tokens.issue_token(&username, None) {
                        Ok(cookie) => Some(cookie),
                        Err(e) => {
                            tracing::warn!(%conn_id, %username, error = %e, "couldn't issue login token");
                            None
                        }
                    };
                    (sessions.create(Some(username.clone())), cookie)
                }
                Credential::Guest => (sessions.create(Some(username.clone())), None),
            }
        };
        self.session_id = Some(session_id.clone());

        tracing::info!(%conn_id, %username, game = %game.id, pid = ?process.pid(), "user logged in; game started");
        self.process = Some(process);
        self.status.advance(ConnectionState::Running, conn_id);
        self.send(ServerMessage::LoginSuccess {
            username: username.clone(),
            session_id,
            cookie_expires: cookie.as_ref().map(|c| c.expires),
            cookie: cookie.map(|c| c.value),
        })
        .await;
        self.username = Some(username);
    }

    async fn login_failed(&mut self, reason: &str) {
        self.send(ServerMessage::LoginFailed {
            reason: reason.to_string(),
        })
        .await;
    }

    async fn renew_session(&self) {
        let Some(session_id) = &self.session_id else {
            return;
        };
        if !self.state.sessions.lock().await.renew(session_id) {
            tracing::debug!(conn_id = %self.conn_id, "session expired while connected");
        }
    }

    /// Sends one frame. A failed send means the client is gone.
    async fn send(&mut self, frame: impl Into<Outbound>) {
        if self.client_closed {
            return;
        }
        let frame = frame.into();
        let text = match frame.render(&self.state.codec) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "couldn't encode message");
                return;
            }
        };
        if let Err(e) = self.conn.send(&text).await {
            tracing::debug!(conn_id = %self.conn_id, error = %e, "send failed");
            self.on_client_gone();
        }
    }

    /// Server-side close, with an optional notice first.
    async fn close_client(&mut self, notice: Option<&str>) {
        if self.client_closed {
            return;
        }
        if let Some(reason) = notice {
            self.send(ServerMessage::ConnectionClosed {
                reason: reason.to_string(),
            })
            .await;
        }
        if !self.client_closed {
            if let Err(e) = self.conn.close().await {
                tracing::debug!(conn_id = %self.conn_id, error = %e, "close failed");
            }
        }
        self.on_client_gone();
    }

    /// The client side is closed: stop the heartbeat and ask a running
    /// game to save and exit.
    fn on_client_gone(&mut self) {
        if self.client_closed {
            return;
        }
        self.client_closed = true;
        self.heartbeat.stop();
        if self.status == ConnectionState::Running {
            self.status.advance(ConnectionState::ClosingGraceful, self.conn_id);
            self.hang_up();
        }
    }

    // -----------------------------------------------------------------------
    // Process side
    // -----------------------------------------------------------------------

    async fn on_process_event(&mut self, event: Result<ProcessEvent, ProcessError>) {
        match event {
            Ok(ProcessEvent::Stdout(line)) => self.send(Outbound::Raw(line)).await,
            Ok(ProcessEvent::Stderr(line)) => {
                if !line.trim().is_empty() {
                    tracing::debug!(
                        conn_id = %self.conn_id,
                        username = self.username.as_deref().unwrap_or(""),
                        "{line}"
                    );
                }
            }
            // Recorded by the liveness check that follows.
            Ok(ProcessEvent::Exited) => {}
            Err(e) => tracing::debug!(conn_id = %self.conn_id, error = %e, "game pipe error"),
        }
    }

    /// The liveness check: records an exit exactly once, releases the
    /// process and closes the client if it is still open.
    async fn check_process(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        let status = match process.poll_exit() {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(conn_id = %self.conn_id, error = %e, "couldn't poll game process");
                return;
            }
        };

        self.process = None;
        self.kill_at = None;
        self.state.connections.release_process(self.conn_id);
        tracing::info!(
            conn_id = %self.conn_id,
            username = self.username.as_deref().unwrap_or(""),
            %status,
            "game process ended"
        );

        if self.status == ConnectionState::Running {
            self.status.advance(ConnectionState::ClosingCrashed, self.conn_id);
        }
        self.close_client(Some(GAME_ENDED_NOTICE)).await;
    }

    /// Sends SIGHUP and arms the SIGKILL deadline.
    fn hang_up(&mut self) {
        let Some(process) = self.process.as_ref() else {
            return;
        };
        if let Err(e) = process.hangup() {
            tracing::warn!(conn_id = %self.conn_id, error = %e, "couldn't signal game process");
        }
        if self.kill_at.is_none() {
            let kill_timeout = self.state.config.current().settings.kill_timeout();
            self.kill_at = Some(Instant::now() + kill_timeout);
        }
    }

    fn kill_process(&mut self) {
        self.kill_at = None;
        let Some(process) = self.process.as_mut() else {
            return;
        };
        tracing::warn!(conn_id = %self.conn_id, pid = ?process.pid(), "game ignored SIGHUP; killing it");
        if let Err(e) = process.kill() {
            tracing::warn!(conn_id = %self.conn_id, error = %e, "couldn't kill game process");
        }
    }
}

async fn drain_started(drain: &mut watch::Receiver<bool>) {
    let closed = drain.wait_for(|draining| *draining).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

async fn next_event(process: &mut Option<GameProcess>) -> Result<ProcessEvent, ProcessError> {
    match process {
        Some(process) => process.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
