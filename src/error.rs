use std::io;
use thiserror::Error;


/// Errors surfaced by connections, channels and the server / client policies built on them.
///
/// The variants fall into the classes the transport distinguishes:
/// * framing errors ([TransportError::NegativePacketLength], [TransportError::PacketTooLarge])
///    spoil a single packet parse, but the connection is not necessarily dead
/// * codec errors ([TransportError::InvalidMessage]) are reported as data on the arrival event
/// * connection failures ([TransportError::Io], [TransportError::StreamEnded],
///    [TransportError::ConnectionClosed]) are terminal for the connection
/// * protocol misuse (starting a second read loop, connecting twice, writing before connecting)
/// * exhausted failover ([TransportError::NoReachableEndpoint]), terminal for a client
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum TransportError {
    #[error("packet length {0} is negative (corrupted stream)")]
    NegativePacketLength(i32),

    #[error("packet length {len} exceeds the maximum of {max} bytes")]
    PacketTooLarge { len: usize, max: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("stream ended")]
    StreamEnded,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not connected")]
    NotConnected,

    #[error("a read loop was already started for this connection")]
    ReadLoopAlreadyStarted,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("no reachable endpoint")]
    NoReachableEndpoint,
}

impl TransportError {
    /// framing errors affect the packet being parsed, not necessarily the connection
    pub fn is_framing_error(&self) -> bool {
        matches!(self, TransportError::NegativePacketLength(_) | TransportError::PacketTooLarge { .. })
    }

    /// errors after which the connection can no longer be used for writing
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::StreamEnded | TransportError::ConnectionClosed)
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
