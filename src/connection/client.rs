use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument, Span};
use crate::config::TransportConfig;
use crate::connection::endpoint_list::EndpointList;
use crate::error::{TransportError, TransportResult};
use crate::messaging::message::Message;
use crate::messaging::message_channel::MessageChannel;
use crate::sync::deferral::DeferredEvent;
use crate::transport::keep_alive_stream::ConnectionId;


pub type MessageHandler = Arc<dyn Fn(&DeferredEvent<Message>) + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// A client connection with failover: it connects to the first reachable endpoint of an
///  [EndpointList], and when the connection breaks (or a write fails) it moves on to the next
///  endpoint. Once all endpoints are used up, the client fails permanently with
///  [TransportError::NoReachableEndpoint].
///
/// Arriving messages go to a single application handler, which may take deferrals on the event.
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: TransportConfig,
    state: Mutex<ClientState>,
    message_handler: RwLock<Option<MessageHandler>>,
    failure_handler: RwLock<Option<FailureHandler>>,
}

struct ClientState {
    endpoints: EndpointList,
    connection: Option<Arc<MessageChannel>>,
    is_shut_down: bool,
}

impl ClientState {
    fn no_connection_error(&self) -> TransportError {
        if self.is_shut_down {
            TransportError::ConnectionClosed
        }
        else if self.endpoints.is_exhausted() {
            TransportError::NoReachableEndpoint
        }
        else {
            TransportError::NotConnected
        }
    }
}

impl Client {
    pub fn new(endpoints: EndpointList, config: TransportConfig) -> anyhow::Result<Client> {
        config.validate()?;
        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                state: Mutex::new(ClientState {
                    endpoints,
                    connection: None,
                    is_shut_down: false,
                }),
                message_handler: Default::default(),
                failure_handler: Default::default(),
            }),
        })
    }

    /// Replaces the message handler. Keep alive messages are never passed to it.
    pub fn on_message_arrived(&self, handler: impl Fn(&DeferredEvent<Message>) + Send + Sync + 'static) {
        let handler: MessageHandler = Arc::new(handler);
        *self.inner.message_handler.write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Replaces the handler that is notified when a broken connection can not be replaced.
    pub fn on_connection_broken(&self, handler: impl Fn(&TransportError) + Send + Sync + 'static) {
        let handler: FailureHandler = Arc::new(handler);
        *self.inner.failure_handler.write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Connects to the first reachable endpoint, starting at the cursor. Returns the endpoint
    ///  the client connected to.
    pub async fn connect(&self) -> TransportResult<SocketAddr> {
        let mut state = self.inner.state.lock().await;
        if state.is_shut_down {
            return Err(TransportError::ConnectionClosed);
        }
        if state.connection.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        ClientInner::connect_from_cursor(&self.inner, &mut state).await
    }

    /// Writes a message to the current connection. If the write fails because the connection
    ///  broke, the client fails over and retries the write once on the new connection.
    pub async fn write_message(&self, message: &Message) -> TransportResult<()> {
        let connection = self.inner.current_connection().await?;
        match connection.write_message(message).await {
            Err(e) if e.is_connection_failure() => {
                debug!("write on connection {} failed, failing over: {}", connection.id(), e);
                ClientInner::failover(&self.inner, connection.id()).await?;
                self.inner.current_connection().await?
                    .write_message(message).await
            }
            result => result,
        }
    }

    pub async fn current_endpoint(&self) -> Option<SocketAddr> {
        let state = self.inner.state.lock().await;
        state.connection.as_ref()
            .and_then(|_| state.endpoints.current())
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await
            .connection.as_ref()
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    pub async fn shutdown(&self) {
        let connection = {
            let mut state = self.inner.state.lock().await;
            state.is_shut_down = true;
            state.connection.take()
        };
        if let Some(connection) = connection {
            connection.shutdown().await;
        }
    }
}

impl ClientInner {
    async fn current_connection(&self) -> TransportResult<Arc<MessageChannel>> {
        let state = self.state.lock().await;
        match &state.connection {
            Some(connection) => Ok(connection.clone()),
            None => Err(state.no_connection_error()),
        }
    }

    async fn connect_from_cursor(self: &Arc<Self>, state: &mut ClientState) -> TransportResult<SocketAddr> {
        while let Some(addr) = state.endpoints.current() {
            match MessageChannel::connect(addr, &self.config).await {
                Ok(channel) => {
                    let channel = Arc::new(channel);
                    self.register_handlers(&channel);
                    match channel.start_reading() {
                        Ok(()) => {
                            info!("connected to {}", addr);
                            state.connection = Some(channel);
                            return Ok(addr);
                        }
                        Err(e) => {
                            warn!("could not start reading from {}: {}", addr, e);
                            channel.shutdown().await;
                        }
                    }
                }
                Err(e) => info!("could not connect to {}: {}", addr, e),
            }
            state.endpoints.advance();
        }

        warn!("no reachable endpoint");
        Err(TransportError::NoReachableEndpoint)
    }

    /// Replaces the connection `broken` with a connection to the next endpoint. If the current
    ///  connection is a different one, some other failover already replaced it.
    async fn failover(self: &Arc<Self>, broken: ConnectionId) -> TransportResult<()> {
        let mut state = self.state.lock().await;
        let current = match &state.connection {
            Some(connection) => connection.clone(),
            None => return Err(state.no_connection_error()),
        };
        if current.id() != broken {
            return Ok(());
        }

        info!("failing over from connection {}", broken);
        state.connection = None;
        current.shutdown().await;

        state.endpoints.advance();
        self.connect_from_cursor(&mut state).await
            .map(|_| ())
    }

    fn register_handlers(self: &Arc<Self>, channel: &MessageChannel) {
        let id = channel.id();

        let weak_inner = Arc::downgrade(self);
        channel.on_message_arrived(move |evt| {
            let handler = match weak_inner.upgrade() {
                Some(inner) => inner.message_handler.read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone(),
                None => None,
            };
            match handler {
                Some(handler) => handler(evt),
                None => debug!("no message handler registered - dropping message"),
            }
        });

        let weak_inner = Arc::downgrade(self);
        channel.on_connection_broken(move |evt| {
            let inner = match weak_inner.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            if let Some(e) = evt.error() {
                info!("connection {} broken: {}", id, e);
            }

            let mut deferral = evt.take_deferral();
            tokio::spawn(async move {
                if let Err(e) = inner.failover(id).await {
                    warn!("failover failed: {}", e);
                    inner.notify_failure(&e);
                }
                deferral.release();
            }.instrument(Span::current()));
        });
    }

    fn notify_failure(&self, error: &TransportError) {
        let handler = self.failure_handler.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }
}
