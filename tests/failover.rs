use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use sustained_tcp::config::TransportConfig;
use sustained_tcp::connection::client::Client;
use sustained_tcp::connection::endpoint_list::EndpointList;
use sustained_tcp::connection::server::Server;
use sustained_tcp::error::TransportError;
use sustained_tcp::messaging::message::Message;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .try_init()
        .ok();
}

fn config() -> TransportConfig {
    TransportConfig {
        keep_alive_timeout: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        ..TransportConfig::new()
    }
}

async fn start_server() -> (Arc<Server>, SocketAddr) {
    let server = Server::start("127.0.0.1:0".parse().unwrap(), config()).await.unwrap();
    let addr = server.local_addr();
    (server, addr)
}

/// an address that refuses connections
fn unreachable_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn wait_for_connections(server: &Server, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while server.num_connections().await != expected {
            sleep(Duration::from_millis(5)).await;
        }
    }).await.unwrap();
}

#[tokio::test]
async fn test_connect_skips_unreachable_endpoint() {
    let (server, addr) = start_server().await;
    let endpoints = EndpointList::new(vec![unreachable_addr(), addr]).unwrap();

    let client = Client::new(endpoints, config()).unwrap();
    assert_eq!(client.connect().await, Ok(addr));
    assert_eq!(client.current_endpoint().await, Some(addr));
    assert_eq!(client.connect().await, Err(TransportError::AlreadyConnected));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_skips_shut_down_server() {
    let (stopped, stopped_addr) = start_server().await;
    let (server, addr) = start_server().await;
    stopped.shutdown().await;

    let client = Client::new(EndpointList::new(vec![stopped_addr, addr]).unwrap(), config()).unwrap();
    assert_eq!(client.connect().await, Ok(addr));
    wait_for_connections(&server, 1).await;
    assert_eq!(stopped.num_connections().await, 0);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_no_reachable_endpoint() {
    let endpoints = EndpointList::new(vec![unreachable_addr(), unreachable_addr()]).unwrap();
    let client = Client::new(endpoints, config()).unwrap();
    assert_eq!(client.connect().await, Err(TransportError::NoReachableEndpoint));
}

#[tokio::test]
async fn test_failover_when_server_goes_away() {
    let (server1, addr1) = start_server().await;
    let (server2, addr2) = start_server().await;

    let client = Client::new(EndpointList::new(vec![addr1, addr2]).unwrap(), config()).unwrap();
    assert_eq!(client.connect().await, Ok(addr1));
    wait_for_connections(&server1, 1).await;

    let observer = Client::new(EndpointList::new(vec![addr2]).unwrap(), config()).unwrap();
    let (send, mut received) = mpsc::unbounded_channel();
    observer.on_message_arrived(move |evt| {
        if let Some(message) = evt.payload() {
            let _ = send.send(message.clone());
        }
    });
    observer.connect().await.unwrap();

    server1.shutdown().await;
    wait_for_connections(&server2, 2).await;
    assert_eq!(client.current_endpoint().await, Some(addr2));

    let m = Message::Text("after failover".to_string());
    client.write_message(&m).await.unwrap();
    let arrived = timeout(Duration::from_secs(5), received.recv()).await.unwrap();
    assert_eq!(arrived, Some(m));

    client.shutdown().await;
    observer.shutdown().await;
    server2.shutdown().await;
}

#[tokio::test]
async fn test_failover_exhausts_endpoints() {
    let (server, addr) = start_server().await;

    let client = Client::new(EndpointList::new(vec![addr]).unwrap(), config()).unwrap();
    let (send, mut failures) = mpsc::unbounded_channel();
    client.on_connection_broken(move |e| {
        let _ = send.send(e.clone());
    });
    client.connect().await.unwrap();
    wait_for_connections(&server, 1).await;

    server.shutdown().await;

    let failure = timeout(Duration::from_secs(5), failures.recv()).await.unwrap();
    assert_eq!(failure, Some(TransportError::NoReachableEndpoint));
    assert_eq!(client.write_message(&Message::Text("x".to_string())).await, Err(TransportError::NoReachableEndpoint));
    assert!(!client.is_connected().await);
}
