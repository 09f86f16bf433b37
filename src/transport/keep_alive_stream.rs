use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::select;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info_span, trace, warn, Instrument};
use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::sync::async_gate::AsyncGate;
use crate::transport::keep_alive_timer::{BusyReason, KeepAliveTimer};
use crate::transport::packet_framer::{PacketRead, PacketReader, PacketWriter};


#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> ConnectionId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Open,
    Reading,
    Closing,
    Closed,
}

/// Callbacks for a [KeepAliveStream]'s read loop. They are awaited by the read loop, so the next
///  packet is not read before the callback returned.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    /// a packet with a non-empty payload arrived - heartbeats are not passed to the handler
    async fn on_packet(&self, packet: Bytes);

    /// A packet's length prefix was corrupt. The read loop keeps running.
    async fn on_framing_error(&self, error: TransportError);

    /// The connection failed. This is called at most once per connection, and never after an
    ///  explicit shutdown.
    async fn on_connection_broken(&self, error: TransportError);

    /// The read loop was stopped by an explicit shutdown. This is called at most once, and only if
    ///  the read loop was running.
    async fn on_read_cancelled(&self);
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

tokio::task_local! {
    static READ_LOOP_OF: ConnectionId;
}

/// A packet stream that keeps an idle connection alive by writing heartbeats (empty packets)
///  whenever there was no packet written or read for the configured keep alive timeout.
///
/// Writes are serialized, i.e. there is at most one write in flight at any time, and heartbeats
///  share that discipline with regular writes. Packets are read by a single read loop that is
///  started explicitly and passes packets to a [PacketHandler].
///
/// An I/O failure on either side is terminal for the connection: the handler is notified once,
///  heartbeats stop and all further writes fail.
pub struct KeepAliveStream {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    writer: AsyncGate<Option<PacketWriter<BoxedWriter>>>,
    reader: Mutex<Option<PacketReader<BoxedReader>>>,
    timer: Arc<KeepAliveTimer>,
    handler: Arc<dyn PacketHandler>,
    broken: AtomicBool,
    closed: AtomicBool,
    state: watch::Sender<ConnectionState>,
    cancel_read: broadcast::Sender<()>,
    read_loop_running: watch::Sender<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timer.close();
    }
}

impl KeepAliveStream {
    /// Wraps a stream and starts sending heartbeats. Reading must be started separately by
    ///  calling [KeepAliveStream::start_reading].
    pub fn new<S>(stream: S, config: &TransportConfig, handler: Arc<dyn PacketHandler>) -> KeepAliveStream
    where S: AsyncRead + AsyncWrite + Send + 'static
    {
        let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);

        let id = ConnectionId::next();
        let timer = Arc::new(KeepAliveTimer::new(config.keep_alive_timeout));
        let (cancel_read, _) = broadcast::channel(1);

        let inner = Arc::new(Inner {
            id,
            writer: AsyncGate::new(Some(PacketWriter::new(writer, config.max_packet_len))),
            reader: Mutex::new(Some(PacketReader::new(reader, config.max_packet_len))),
            timer: timer.clone(),
            handler,
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: watch::channel(ConnectionState::Open).0,
            cancel_read,
            read_loop_running: watch::channel(false).0,
        });

        let span = info_span!("heartbeat", connection = %id);
        tokio::spawn(send_heartbeats(timer, Arc::downgrade(&inner)).instrument(span));

        KeepAliveStream { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// `true` after shutdown or after the connection broke
    pub fn is_closed(&self) -> bool {
        self.inner.is_unusable()
    }

    pub async fn write_packet(&self, payload: &[u8]) -> TransportResult<()> {
        self.inner.write_packet(payload).await
    }

    pub async fn write_heartbeat(&self) -> TransportResult<()> {
        self.inner.write_packet(&[]).await
    }

    pub fn start_reading(&self) -> TransportResult<()> {
        // subscribe before checking for shutdown so a concurrent shutdown can not slip through
        let cancel = self.inner.cancel_read.subscribe();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let reader = self.inner.reader.lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let reader = match reader {
            Some(reader) => reader,
            None => return Err(TransportError::ReadLoopAlreadyStarted),
        };

        self.inner.read_loop_running.send_replace(true);
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = ConnectionState::Reading;
                true
            }
            else {
                false
            }
        });

        let id = self.inner.id;
        let span = info_span!("read_loop", connection = %id);
        tokio::spawn(READ_LOOP_OF.scope(id, self.inner.clone().read_loop(reader, cancel)).instrument(span));
        Ok(())
    }

    /// Stops heartbeats and the read loop, and shuts down the write side of the stream. This is
    ///  idempotent, and the handler is not notified of a broken connection as a consequence.
    ///
    /// NB: When called from inside this connection's own read loop, this does not wait for the
    ///  read loop to terminate
    pub async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

impl Inner {
    fn is_unusable(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.broken.load(Ordering::SeqCst)
    }

    fn is_own_read_loop(&self) -> bool {
        READ_LOOP_OF.try_with(|id| *id == self.id)
            .unwrap_or(false)
    }

    async fn write_packet(&self, payload: &[u8]) -> TransportResult<()> {
        if self.is_unusable() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut token = self.writer.acquire().await;
        let writer = match token.get_mut().and_then(|w| w.as_mut()) {
            Some(writer) => writer,
            None => return Err(TransportError::ConnectionClosed),
        };

        self.timer.begin(BusyReason::Writing);
        let result = writer.write_packet(payload).await;
        self.timer.end(BusyReason::Writing);
        token.release();

        if let Err(e) = &result {
            if e.is_connection_failure() {
                self.connection_broken(e.clone()).await;
            }
        }
        result
    }

    async fn read_loop(self: Arc<Self>, mut reader: PacketReader<BoxedReader>, mut cancel: broadcast::Receiver<()>) {
        debug!("starting read loop");

        let result = loop {
            select! {
                r = self.read_next(&mut reader) => {
                    match r {
                        Ok(true) => {}
                        Ok(false) => break Err(TransportError::StreamEnded),
                        Err(e) => break Err(e),
                    }
                }
                _ = cancel.recv() => {
                    break Ok(());
                }
            }
        };

        // before notifying the handler: a handler may shut down this connection and wait for it
        self.read_loop_running.send_replace(false);

        match result {
            Ok(()) => {
                debug!("read loop cancelled");
                self.handler.on_read_cancelled().await;
            }
            Err(e) => {
                debug!("read loop terminated: {}", e);
                self.connection_broken(e).await;
            }
        }
    }

    /// returns `false` if the stream ended
    async fn read_next(&self, reader: &mut PacketReader<BoxedReader>) -> TransportResult<bool> {
        let raw_len = match reader.read_length_prefix().await? {
            Some(len) => len,
            None => return Ok(false),
        };

        self.timer.begin(BusyReason::Reading);

        let len = match reader.check_length(raw_len) {
            Ok(len) => len,
            Err(e) => {
                self.timer.end(BusyReason::Reading);
                warn!("corrupt packet: {}", e);
                self.handler.on_framing_error(e).await;
                return Ok(true);
            }
        };

        let result = match reader.read_body(len).await {
            Ok(PacketRead::Packet(packet)) => {
                if packet.is_empty() {
                    trace!("received heartbeat");
                }
                else {
                    trace!("received packet with {} bytes", packet.len());
                    self.handler.on_packet(packet).await;
                }
                Ok(true)
            }
            Ok(PacketRead::StreamEnded) => Ok(false),
            Err(e) => Err(e),
        };
        self.timer.end(BusyReason::Reading);
        result
    }

    async fn connection_broken(&self, error: TransportError) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.broken.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("connection {} broken: {}", self.id, error);
        self.timer.close();
        // Closed is reached through shutdown, which disposes the write side
        self.state.send_if_modified(|state| {
            match state {
                ConnectionState::Open | ConnectionState::Reading => {
                    *state = ConnectionState::Closing;
                    true
                }
                _ => false,
            }
        });
        self.handler.on_connection_broken(error).await;
    }

    async fn shutdown(&self) {
        let is_first = !self.closed.swap(true, Ordering::SeqCst);
        let is_own_read_loop = self.is_own_read_loop();

        if is_first {
            debug!("shutting down connection {}", self.id);
            self.state.send_replace(ConnectionState::Closing);
            self.timer.close();
            let _ = self.cancel_read.send(());
        }

        if !is_own_read_loop {
            let mut running = self.read_loop_running.subscribe();
            let _ = running.wait_for(|running| !*running).await;
        }

        if is_first {
            let mut token = self.writer.acquire().await;
            if let Some(mut writer) = token.get_mut().and_then(|w| w.take()) {
                if let Err(e) = writer.shutdown().await {
                    debug!("error shutting down the write side of connection {}: {}", self.id, e);
                }
            }
            token.release();
            self.state.send_replace(ConnectionState::Closed);
        }
        else if !is_own_read_loop {
            let mut state = self.state.subscribe();
            let _ = state.wait_for(|state| *state == ConnectionState::Closed).await;
        }
    }
}

async fn send_heartbeats(timer: Arc<KeepAliveTimer>, inner: Weak<Inner>) {
    while timer.expired().await {
        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => break,
        };

        trace!("sending heartbeat");
        match inner.write_packet(&[]).await {
            Ok(()) => {}
            Err(TransportError::ConnectionClosed) => break,
            Err(e) => {
                // write_packet already signalled a broken connection
                debug!("error sending heartbeat: {}", e);
                break;
            }
        }
    }
    trace!("heartbeats stopped");
}
