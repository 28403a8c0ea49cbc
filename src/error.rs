use std::time::Duration;
use thiserror::Error;

/// Error taxonomy for a client connection. Non-fatal conditions
/// (migration failure, 0-RTT rejection, invalid tickets) are recovered
/// internally and only reach the caller through logs or the migration
/// event channel; everything else aborts the connection attempt.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("name resolution failed for {0}")]
    Resolution(String),
    #[error("fingerprint configuration failed: {0}")]
    Config(String),
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] quiche::Error),
    #[error("socket error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),
    #[error("path migration failed: {0}")]
    Migration(String),
    #[error("server rejected 0-RTT early data")]
    ZeroRttRejected,
    #[error("session ticket invalid: {0}")]
    TicketInvalid(String),
}

impl ConnectionError {
    /// True for conditions the engine recovers from without tearing
    /// the connection down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Migration(_)
                | ConnectionError::ZeroRttRejected
                | ConnectionError::TicketInvalid(_)
                | ConnectionError::Config(_)
        )
    }
}
