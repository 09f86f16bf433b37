use clap::Parser;
use clap_derive::Parser;
use std::time::Duration;
use sustained_tcp::config::TransportConfig;
use sustained_tcp::connection::client::Client;
use sustained_tcp::connection::endpoint_list::EndpointList;
use sustained_tcp::messaging::message::Message;
use sustained_tcp::sync::deferral::EventOutcome;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, Level};

/// A chat client: every line read from stdin is sent to the server, messages from other clients
///  are printed. If the server goes away, the client fails over to the next endpoint.
#[derive(Parser)]
struct Args {
    /// candidate servers in the order they are tried
    #[clap(long, required = true, num_args = 1..)]
    endpoints: Vec<String>,

    #[clap(long)]
    name: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .try_init()
        .ok();

    let endpoints = EndpointList::parse(&args.endpoints)?;
    let client = Client::new(endpoints, TransportConfig::with_keep_alive_timeout(Duration::from_secs(5)))?;

    client.on_message_arrived(|evt| {
        match evt.outcome() {
            EventOutcome::Success(Message::Text(text)) => println!("{}", text),
            EventOutcome::Success(Message::Binary(data)) => println!("<{} bytes of binary data>", data.len()),
            EventOutcome::Success(Message::KeepAlive) => {}
            EventOutcome::Failed(e) => error!("received invalid data: {}", e),
            EventOutcome::Cancelled => {}
        }
    });

    let (fatal_send, mut fatal) = mpsc::unbounded_channel();
    client.on_connection_broken(move |e| {
        let _ = fatal_send.send(e.clone());
    });

    let addr = client.connect().await?;
    println!("connected to {}", addr);

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                let text = match &args.name {
                    Some(name) => format!("{}: {}", name, line),
                    None => line,
                };
                if let Err(e) = client.write_message(&Message::Text(text)).await {
                    error!("could not send message: {}", e);
                    break;
                }
            }
            e = fatal.recv() => {
                if let Some(e) = e {
                    error!("connection lost: {}", e);
                }
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
