use std::io;

/// Wraps an `io::Error` coming from the datagram transport, distinct from
/// one coming from the file stream so callers can tell the two apart.
#[derive(Debug)]
pub struct TransportError(pub io::Error);

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("file error: {0}")]
    File(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sequence {seq} exhausted its retransmission budget after {retries} retries")]
    RetriesExhausted { seq: u32, retries: u32 },

    #[error("peer never completed the handshake")]
    HandshakeFailed,
}

pub type Result<T> = std::result::Result<T, Error>;
