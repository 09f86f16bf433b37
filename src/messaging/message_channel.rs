use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, instrument, trace};
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::messaging::message::Message;
use crate::sync::deferral::{DeferredEvent, EventHandlers, EventOutcome};
use crate::transport::keep_alive_stream::{ConnectionId, ConnectionState, KeepAliveStream, PacketHandler};


/// A connection that exchanges [Message]s instead of raw packets.
///
/// Arrivals and the connection breaking are published as [DeferredEvent]s: the channel does not
///  read the next packet before every handler released the deferrals it took for the previous
///  one. Handlers must be registered before reading is started.
pub struct MessageChannel {
    peer_addr: Option<SocketAddr>,
    stream: KeepAliveStream,
    events: Arc<ChannelEvents>,
}

#[derive(Default)]
struct ChannelEvents {
    message_arrived: EventHandlers<Message>,
    connection_broken: EventHandlers<()>,
}

#[async_trait]
impl PacketHandler for ChannelEvents {
    async fn on_packet(&self, packet: Bytes) {
        let outcome = match Message::from_packet(packet) {
            Ok(Message::KeepAlive) => return,
            Ok(message) => EventOutcome::Success(message),
            Err(e) => {
                debug!("received invalid message: {}", e);
                EventOutcome::Failed(TransportError::InvalidMessage(e.to_string()))
            }
        };
        self.message_arrived.publish(outcome).await;
    }

    async fn on_framing_error(&self, error: TransportError) {
        self.message_arrived.publish(EventOutcome::Failed(error)).await;
    }

    async fn on_connection_broken(&self, error: TransportError) {
        self.connection_broken.publish(EventOutcome::Failed(error)).await;
    }

    async fn on_read_cancelled(&self) {
        self.message_arrived.publish(EventOutcome::Cancelled).await;
    }
}

impl MessageChannel {
    pub fn new<S>(stream: S, peer_addr: Option<SocketAddr>, config: &TransportConfig) -> MessageChannel
    where S: AsyncRead + AsyncWrite + Send + 'static
    {
        let events: Arc<ChannelEvents> = Default::default();
        let stream = KeepAliveStream::new(stream, config, events.clone());
        MessageChannel {
            peer_addr,
            stream,
            events,
        }
    }

    #[instrument(skip(config))]
    pub async fn connect(addr: SocketAddr, config: &TransportConfig) -> TransportResult<MessageChannel> {
        let stream = match time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(TransportError::Io(format!("connecting to {} timed out", addr))),
        };
        stream.set_nodelay(config.tcp_nodelay)?;
        debug!("connected");
        Ok(MessageChannel::new(stream, Some(addr), config))
    }

    pub fn id(&self) -> ConnectionId {
        self.stream.id()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.stream.state()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    /// Handlers receive successfully decoded messages, and failures for packets that could not
    ///  be decoded or framed. Keep alive messages are never passed to handlers. Shutting down a
    ///  channel that is reading publishes a final cancelled arrival.
    pub fn on_message_arrived(&self, handler: impl Fn(&DeferredEvent<Message>) + Send + Sync + 'static) {
        self.events.message_arrived.subscribe(handler);
    }

    /// The event carries the error that broke the connection. It is published at most once.
    pub fn on_connection_broken(&self, handler: impl Fn(&DeferredEvent<()>) + Send + Sync + 'static) {
        self.events.connection_broken.subscribe(handler);
    }

    pub fn start_reading(&self) -> TransportResult<()> {
        self.stream.start_reading()
    }

    pub async fn write_message(&self, message: &Message) -> TransportResult<()> {
        if message.is_keep_alive() {
            return self.stream.write_heartbeat().await;
        }
        trace!("writing {:?}", message.kind());
        self.stream.write_packet(&message.to_packet()).await
    }

    pub async fn shutdown(&self) {
        self.stream.shutdown().await
    }
}
