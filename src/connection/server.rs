use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, trace, warn, Instrument, Span};
use crate::config::TransportConfig;
use crate::connection::connection_set::ConnectionSet;
use crate::messaging::message::Message;
use crate::messaging::message_channel::MessageChannel;
use crate::sync::deferral::EventOutcome;
use crate::transport::keep_alive_stream::ConnectionId;


/// A broadcast server: every message that arrives on one connection is written to all other
///  connections. Connections that break are removed and disposed.
pub struct Server {
    local_addr: SocketAddr,
    /// taken by the accept loop, and dropped when the loop terminates
    listener: Mutex<Option<TcpListener>>,
    shared: Arc<ServerShared>,
    shut_down: watch::Sender<bool>,
    accepting: watch::Sender<bool>,
}

/// Owns the listening socket while the accept loop runs. Closing the socket and announcing the
///  end of the loop happen on drop, so they also happen when `run` is cancelled.
struct AcceptLoop<'a> {
    listener: Option<TcpListener>,
    accepting: &'a watch::Sender<bool>,
}

impl Drop for AcceptLoop<'_> {
    fn drop(&mut self) {
        // the socket must be closed before shutdown() returns
        drop(self.listener.take());
        self.accepting.send_replace(false);
    }
}

struct ServerShared {
    config: TransportConfig,
    connections: ConnectionSet,
}

impl Server {
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> anyhow::Result<Server> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);

        Ok(Server {
            local_addr,
            listener: Mutex::new(Some(listener)),
            shared: Arc::new(ServerShared {
                config,
                connections: ConnectionSet::default(),
            }),
            shut_down: watch::channel(false).0,
            accepting: watch::channel(false).0,
        })
    }

    /// binds and runs the accept loop in the background
    pub async fn start(addr: SocketAddr, config: TransportConfig) -> anyhow::Result<Arc<Server>> {
        let server = Arc::new(Self::bind(addr, config).await?);
        let cloned = server.clone();
        tokio::spawn(async move { cloned.run().await });
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn num_connections(&self) -> usize {
        self.shared.connections.len().await
    }

    /// Accepts connections until the server is shut down. Failing to accept a single connection
    ///  does not terminate the loop.
    ///
    /// The listening socket is closed when the loop terminates, so `run` can only be called once.
    pub async fn run(&self) {
        let accept_loop = {
            let mut listener = self.listener.lock().await;
            match listener.take() {
                Some(listener) => {
                    self.accepting.send_replace(true);
                    AcceptLoop { listener: Some(listener), accepting: &self.accepting }
                }
                None => {
                    warn!("accept loop was already started or the server was shut down");
                    return;
                }
            }
        };
        let listener = match &accept_loop.listener {
            Some(listener) => listener,
            None => return,
        };

        let mut shut_down = self.shut_down.subscribe();
        loop {
            select! {
                r = listener.accept() => {
                    match r {
                        Ok((stream, addr)) => self.on_accepted(stream, addr).await,
                        Err(e) => warn!("error accepting connection: {}", e),
                    }
                }
                _ = async { let _ = shut_down.wait_for(|s| *s).await; } => {
                    break;
                }
            }
        }
        debug!("accept loop terminated");
    }

    #[instrument(name="accepted_connection", skip_all, fields(addr = %addr))]
    async fn on_accepted(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(self.shared.config.tcp_nodelay) {
            debug!("could not configure TCP_NODELAY: {}", e);
        }

        let channel = Arc::new(MessageChannel::new(stream, Some(addr), &self.shared.config));
        register_handlers(&self.shared, &channel);
        self.shared.connections.add(channel.clone()).await;

        let is_shutting_down = *self.shut_down.borrow();
        if is_shutting_down {
            debug!("server is shutting down, dropping connection {}", channel.id());
            self.shared.connections.remove_and_dispose(channel.id()).await;
            return;
        }

        match channel.start_reading() {
            Ok(()) => debug!("accepted connection {}", channel.id()),
            Err(e) => {
                warn!("could not start reading from connection {}: {}", channel.id(), e);
                self.shared.connections.remove_and_dispose(channel.id()).await;
            }
        }
    }

    /// Stops accepting connections and disposes all current connections. The listening socket is
    ///  closed when this returns.
    pub async fn shutdown(&self) {
        if self.shut_down.send_replace(true) {
            return;
        }
        info!("shutting down");

        // either the accept loop was not started yet, or it owns the listener and announced it
        drop(self.listener.lock().await.take());
        let mut accepting = self.accepting.subscribe();
        let _ = accepting.wait_for(|a| !*a).await;

        for connection in self.shared.connections.drain().await {
            connection.shutdown().await;
        }
    }
}

fn register_handlers(shared: &Arc<ServerShared>, channel: &MessageChannel) {
    let id = channel.id();

    let weak_shared = Arc::downgrade(shared);
    channel.on_message_arrived(move |evt| {
        match evt.outcome() {
            EventOutcome::Success(message) => {
                let shared = match weak_shared.upgrade() {
                    Some(shared) => shared,
                    None => return,
                };
                let mut deferral = evt.take_deferral();
                let message = message.clone();
                tokio::spawn(async move {
                    shared.broadcast(id, message).await;
                    deferral.release();
                }.instrument(Span::current()));
            }
            EventOutcome::Failed(e) => warn!("invalid data on connection {}: {}", id, e),
            EventOutcome::Cancelled => debug!("message arrival on connection {} was cancelled", id),
        }
    });

    let weak_shared: Weak<ServerShared> = Arc::downgrade(shared);
    channel.on_connection_broken(move |evt| {
        let shared = match weak_shared.upgrade() {
            Some(shared) => shared,
            None => return,
        };
        if let Some(e) = evt.error() {
            info!("connection {} broken: {}", id, e);
        }
        let mut deferral = evt.take_deferral();
        tokio::spawn(async move {
            shared.connections.remove_and_dispose(id).await;
            deferral.release();
        });
    });
}

impl ServerShared {
    /// Writes the message to all connections except the sender. The writes are not awaited, and
    ///  a failing write does not affect the other targets.
    async fn broadcast(&self, from: ConnectionId, message: Message) {
        let targets = self.connections.others(from).await;
        trace!("broadcasting message from {} to {} connections", from, targets.len());

        let message = Arc::new(message);
        for target in targets {
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(e) = target.write_message(&message).await {
                    debug!("broadcast to connection {} failed: {}", target.id(), e);
                }
            });
        }
    }
}
