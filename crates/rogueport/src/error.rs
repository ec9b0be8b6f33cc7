//! Unified error type for the rogueport server.

use rogueport_config::ConfigError;
use rogueport_protocol::ProtocolError;
use rogueport_session::SessionError;
use rogueport_transport::TransportError;

/// Failures of a game process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The engine binary couldn't be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A signal couldn't be delivered.
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    /// Reading or writing one of the process's pipes failed.
    #[error("pipe error: {0}")]
    Pipe(#[from] std::io::Error),

    /// The pipe was already closed.
    #[error("process {0} is closed")]
    Closed(&'static str),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RogueportError {
    /// A transport-level error (bind, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, malformed request).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An account, session or credential store error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A configuration load or reload error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A game process error.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let rogueport_err: RogueportError = err.into();
        assert!(matches!(rogueport_err, RogueportError::Transport(_)));
        assert!(rogueport_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let rogueport_err: RogueportError = err.into();
        assert!(matches!(rogueport_err, RogueportError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AuthFailed("nope".into());
        let rogueport_err: RogueportError = err.into();
        assert!(matches!(rogueport_err, RogueportError::Session(_)));
    }

    #[test]
    fn test_from_config_error() {
        let rogueport_err: RogueportError = ConfigError::NoGames.into();
        assert!(matches!(rogueport_err, RogueportError::Config(_)));
    }

    #[test]
    fn test_from_io_error_is_pipe_process_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let rogueport_err: RogueportError = ProcessError::from(io).into();
        assert!(matches!(
            rogueport_err,
            RogueportError::Process(ProcessError::Pipe(_))
        ));
        assert!(rogueport_err.to_string().contains("closed"));
    }
}
