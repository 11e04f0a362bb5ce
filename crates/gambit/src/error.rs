//! Unified error type for the Gambit server.

use gambit_protocol::ProtocolError;
use gambit_resilience::ResilienceError;
use gambit_session::SessionError;
use gambit_transport::TransportError;

use crate::persistence::StoreError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum GambitError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A move or game action the session refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Signal handling or a contained panic.
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// The persistence collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Accept(std::io::Error::other("no more sockets"));
        let gambit_err: GambitError = err.into();
        assert!(matches!(gambit_err, GambitError::Transport(_)));
        assert!(gambit_err.to_string().contains("no more sockets"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let gambit_err: GambitError = err.into();
        assert!(matches!(gambit_err, GambitError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let gambit_err: GambitError = SessionError::NotYourTurn.into();
        assert!(matches!(gambit_err, GambitError::Session(_)));
        assert_eq!(gambit_err.to_string(), "not your turn");
    }

    #[test]
    fn test_from_resilience_error() {
        let err = ResilienceError::Panicked {
            label: "sweep".into(),
            message: "boom".into(),
        };
        let gambit_err: GambitError = err.into();
        assert!(matches!(gambit_err, GambitError::Resilience(_)));
    }

    #[test]
    fn test_from_store_error() {
        let gambit_err: GambitError = StoreError::PlayerNotFound(4).into();
        assert!(matches!(gambit_err, GambitError::Store(_)));
        assert!(gambit_err.to_string().contains('4'));
    }
}
