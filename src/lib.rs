//! A length-prefixed message transport over TCP that keeps idle connections alive with
//!  heartbeats, detects broken connections, and builds a broadcast server and a failover client
//!  on top of that.
//!
//! On the wire, every packet is a 4 byte signed little endian length prefix followed by that
//!  many bytes of payload. A length of 0 is a heartbeat, a negative length means the stream is
//!  corrupted. This framing is the only wire contract; messages are encoded into packets by
//!  [messaging::message::Message].
//!
//! The layers, bottom up:
//! * [transport::packet_framer] reads and writes single packets
//! * [transport::keep_alive_stream] adds heartbeats, serialized writes and a read loop
//! * [messaging::message_channel] converts packets to messages and publishes arrivals as
//!    [sync::deferral::DeferredEvent]s
//! * [connection::server] and [connection::client] implement broadcast and failover

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod sync;
pub mod test_util;
pub mod transport;
pub mod util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init()
            .ok();
    }
}
