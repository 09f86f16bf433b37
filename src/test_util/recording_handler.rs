use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use crate::error::TransportError;
use crate::transport::keep_alive_stream::PacketHandler;


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HandlerEvent {
    Packet(Bytes),
    FramingError(TransportError),
    ConnectionBroken(TransportError),
    ReadCancelled,
}

/// a [PacketHandler] that forwards everything it receives to a channel
pub struct RecordingHandler {
    events: mpsc::UnboundedSender<HandlerEvent>,
}

impl RecordingHandler {
    pub fn new() -> (RecordingHandler, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (RecordingHandler { events }, receiver)
    }
}

#[async_trait]
impl PacketHandler for RecordingHandler {
    async fn on_packet(&self, packet: Bytes) {
        let _ = self.events.send(HandlerEvent::Packet(packet));
    }

    async fn on_framing_error(&self, error: TransportError) {
        let _ = self.events.send(HandlerEvent::FramingError(error));
    }

    async fn on_connection_broken(&self, error: TransportError) {
        let _ = self.events.send(HandlerEvent::ConnectionBroken(error));
    }

    async fn on_read_cancelled(&self) {
        let _ = self.events.send(HandlerEvent::ReadCancelled);
    }
}
