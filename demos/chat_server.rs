use clap::Parser;
use clap_derive::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use sustained_tcp::config::TransportConfig;
use sustained_tcp::connection::server::Server;
use tokio::select;
use tracing::{info, Level};

/// a chat server that forwards every message to all other connected clients
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 9100)]
    port: u16,

    #[clap(long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[clap(long, default_value_t = 5000)]
    keep_alive_millis: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let addr = SocketAddr::new(args.host, args.port);
    let config = TransportConfig::with_keep_alive_timeout(Duration::from_millis(args.keep_alive_millis));
    let server = Server::bind(addr, config).await?;

    select! {
        _ = server.run() => {}
        r = tokio::signal::ctrl_c() => {
            r?;
            info!("interrupted");
        }
    }
    server.shutdown().await;
    Ok(())
}
