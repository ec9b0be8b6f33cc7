//! `RogueportServer` builder and server loop.
//!
//! This is the entry point for running a rogueport server. It ties
//! together all the layers: transport → protocol → session → config →
//! the per-connection handler.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rogueport_config::{ConfigSnapshot, LiveConfig, ServerConfig};
use rogueport_protocol::{Codec, JsonCodec};
use rogueport_session::{
    AccountPolicy, Accounts, Argon2Scheme, CredentialStore, LoginTokens, SessionConfig,
    SessionError, SessionManager,
};
use rogueport_transport::{Transport, WebSocketTransport};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;

use crate::RogueportError;
use crate::connections::ConnectionTable;
use crate::handler::handle_connection;

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
/// Interior mutability via `Mutex` where needed.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) config: LiveConfig,
    pub(crate) connections: ConnectionTable,
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) accounts: Accounts,
    pub(crate) tokens: LoginTokens,
    pub(crate) codec: C,
}

/// Builds the account rules from the settings.
///
/// # Errors
///
/// [`SessionError::InvalidPolicy`] for a bad nickname pattern and
/// [`SessionError::Hash`] for an unknown algorithm or bad salt length.
pub fn account_policy(settings: &ServerConfig) -> Result<AccountPolicy, SessionError> {
    Ok(AccountPolicy {
        min_username_length: settings.min_username_length,
        nick_pattern: AccountPolicy::compile_nick_pattern(&settings.nick_regex)?,
        reserved_names: settings.reserved_names.clone(),
        reserved_names_can_register: settings.reserved_names_can_register,
        max_password_length: settings.max_passwd_length,
        guest_name_prefix: settings.guest_name_prefix.clone(),
        guest_name_suffix_len: settings.guest_name_suffix_len,
        scheme: Arc::new(Argon2Scheme::new(
            &settings.crypt_algorithm,
            settings.crypt_salt_length,
        )?),
    })
}

/// Where the configuration comes from.
enum ConfigSource {
    Path(PathBuf),
    Live(LiveConfig),
}

/// Builder for configuring and starting a rogueport server.
///
/// # Example
///
/// ```rust,ignore
/// use rogueport::prelude::*;
///
/// let server = RogueportServer::builder()
///     .config_path("config.toml")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct RogueportServerBuilder {
    config: ConfigSource,
    bind_addr: Option<String>,
    handle_signals: bool,
}

impl RogueportServerBuilder {
    /// Creates a new builder reading `config.toml` from the working
    /// directory.
    pub fn new() -> Self {
        Self {
            config: ConfigSource::Path(PathBuf::from("config.toml")),
            bind_addr: None,
            handle_signals: true,
        }
    }

    /// Sets the primary config file.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config = ConfigSource::Path(path.into());
        self
    }

    /// Uses an already loaded configuration.
    pub fn live_config(mut self, config: LiveConfig) -> Self {
        self.config = ConfigSource::Live(config);
        self
    }

    /// Overrides `bind_address`/`bind_port` from the config.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = Some(addr.to_string());
        self
    }

    /// Whether [`run`](RogueportServer::run) installs the operator signal
    /// handlers (SIGTERM, SIGINT, SIGHUP, SIGUSR1). On by default.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Loads the configuration, opens the credential store and binds the
    /// listener.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build(self) -> Result<RogueportServer<JsonCodec>, RogueportError> {
        self.build_with_codec(JsonCodec).await
    }

    /// [`build`](Self::build) with a custom control-message codec.
    pub async fn build_with_codec<C: Codec>(
        self,
        codec: C,
    ) -> Result<RogueportServer<C>, RogueportError> {
        let config = match self.config {
            ConfigSource::Path(path) => LiveConfig::load(path)?,
            ConfigSource::Live(config) => config,
        };
        let snapshot = config.current();
        let settings = &snapshot.settings;

        let store = Arc::new(CredentialStore::open(&settings.password_db)?);
        let accounts = Accounts::new(Arc::clone(&store), account_policy(settings)?);
        let tokens = LoginTokens::new(store, settings.login_token_lifetime);

        let bind_addr = self.bind_addr.unwrap_or_else(|| settings.bind_addr());
        let transport = WebSocketTransport::bind(&bind_addr).await?;

        let state = Arc::new(ServerState {
            connections: ConnectionTable::new(settings.max_connections),
            sessions: Mutex::new(SessionManager::new(SessionConfig::with_lifetime(
                settings.session_lifetime(),
            ))),
            accounts,
            tokens,
            codec,
            config,
        });

        Ok(RogueportServer {
            transport,
            state,
            handle_signals: self.handle_signals,
        })
    }
}

impl Default for RogueportServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A rogueport server, bound and ready.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RogueportServer<C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
    handle_signals: bool,
}

impl RogueportServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> RogueportServerBuilder {
        RogueportServerBuilder::new()
    }
}

impl<C: Codec> RogueportServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle for shutdown and reload, usable while the server runs.
    pub fn control(&self) -> ControlHandle<C> {
        ControlHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Returns once a shutdown has been requested and the last game
    /// process has exited.
    pub async fn run(mut self) -> Result<(), RogueportError> {
        tracing::info!(addr = ?self.local_addr().ok(), "rogueport server running");

        let signals = self
            .handle_signals
            .then(|| tokio::spawn(listen_for_signals(self.control())));
        let sweeper = tokio::spawn(sweep_expired(Arc::clone(&self.state)));

        loop {
            tokio::select! {
                biased;
                () = self.state.connections.wait_drained() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        sweeper.abort();
        if let Some(signals) = signals {
            signals.abort();
        }
        tracing::info!("all games saved; server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operator control
// ---------------------------------------------------------------------------

/// Shutdown and reload, from a signal handler or from code.
pub struct ControlHandle<C: Codec = JsonCodec> {
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Clone for ControlHandle<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<C: Codec> ControlHandle<C> {
    /// Starts the shutdown drain: no new connections or games, every
    /// client is told and every game asked to save and exit.
    ///
    /// Returns `false` if a drain was already under way.
    pub fn shutdown(&self) -> bool {
        self.state.connections.begin_drain()
    }

    /// Re-reads every config file and the games directory, then applies
    /// the new settings to accounts, tokens, sessions and the connection
    /// cap. On error nothing changes.
    pub async fn reload_config(&self) -> Result<Arc<ConfigSnapshot>, RogueportError> {
        let result = self.apply_full_reload().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "config reload failed; keeping the current configuration");
        }
        result
    }

    async fn apply_full_reload(&self) -> Result<Arc<ConfigSnapshot>, RogueportError> {
        let state = &self.state;
        let snapshot = {
            let _reload = state.config.begin_reload();
            let snapshot = state.config.build_full_reload()?;
            let policy = account_policy(&snapshot.settings)?;

            let snapshot = state.config.commit(snapshot)?;
            let settings = &snapshot.settings;
            state.accounts.set_policy(policy);
            state.tokens.set_lifetime_days(settings.login_token_lifetime);
            state.connections.set_max_connections(settings.max_connections);
            snapshot
        };
        state
            .sessions
            .lock()
            .await
            .set_config(SessionConfig::with_lifetime(snapshot.settings.session_lifetime()));
        Ok(snapshot)
    }

    /// Re-scans the games directory only.
    pub fn reload_games(&self) -> Result<Arc<ConfigSnapshot>, RogueportError> {
        self.state.config.reload_games().map_err(|e| {
            tracing::error!(error = %e, "games reload failed; keeping the current games");
            e.into()
        })
    }

    /// The active configuration.
    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.state.config.current()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.open_count()
    }

    pub fn process_count(&self) -> usize {
        self.state.connections.process_count()
    }

    pub async fn session_count(&self) -> usize {
        self.state.sessions.lock().await.len()
    }
}

/// SIGTERM/SIGINT drain, SIGHUP reloads everything, SIGUSR1 reloads
/// the games directory.
async fn listen_for_signals<C: Codec>(control: ControlHandle<C>) {
    let mut streams = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
        signal(SignalKind::user_defined1()),
    ) {
        (Ok(term), Ok(int), Ok(hup), Ok(usr1)) => (term, int, hup, usr1),
        _ => {
            tracing::error!("couldn't install signal handlers");
            return;
        }
    };
    let (term, int, hup, usr1) = &mut streams;

    loop {
        tokio::select! {
            Some(()) = term.recv() => {
                tracing::info!("received SIGTERM; shutting down");
                control.shutdown();
            }
            Some(()) = int.recv() => {
                tracing::info!("received SIGINT; shutting down");
                control.shutdown();
            }
            Some(()) = hup.recv() => {
                tracing::info!("received SIGHUP; reloading configuration");
                // Errors are logged by reload_config.
                let _ = control.reload_config().await;
            }
            Some(()) = usr1.recv() => {
                tracing::info!("received SIGUSR1; reloading games");
                let _ = control.reload_games();
            }
            else => return,
        }
    }
}

/// Periodically drops expired sessions and login tokens.
async fn sweep_expired<C: Codec>(state: Arc<ServerState<C>>) {
    loop {
        let interval = state.config.current().settings.session_sweep_interval();
        tokio::time::sleep(interval).await;

        let removed = state.sessions.lock().await.sweep();
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        match state.tokens.purge_expired() {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "purged expired login tokens"),
            Err(e) => tracing::warn!(error = %e, "couldn't purge login tokens"),
        }
    }
}
