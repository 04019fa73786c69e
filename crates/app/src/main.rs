//! Parley - dual-transport chat relay
//!
//! Console front end for the relay: `server` hosts a room, `client`
//! joins one. Configuration comes from the command line; everything
//! else lives in `parley-net`.

use anyhow::Result;
use chrono::{Local, LocalResult, TimeZone};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parley_net::{Client, ClientEvent, Server};

mod cli;

use crate::cli::{Cli, ClientArgs, Command, ServerArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await,
        Command::Client(args) => run_client(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let server = Server::start(args.host, args.port, args.protocol).await?;
    println!(
        "Relay listening on {} ({})",
        server.addr(),
        server.transport()
    );
    println!("Type 'stop' to shut down");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().eq_ignore_ascii_case("stop") => break,
                    Some(_) => continue,
                    None => break,
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Ctrl-c handler failed");
                }
                break;
            }
        }
    }

    server.shutdown().await;
    println!("Relay stopped");
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let mut client = Client::connect(args.host, args.port, args.protocol, args.name).await?;
    println!(
        "Connected to {}:{} ({}) as {}",
        args.host,
        args.port,
        args.protocol,
        client.name()
    );
    println!("Type 'exit' to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = client.next_event() => {
                match event {
                    Some(event) => {
                        if !render_event(event) {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if text.eq_ignore_ascii_case("exit") {
                            break;
                        }
                        client.send_chat(text).await?;
                    }
                    None => break,
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Ctrl-c handler failed");
                }
                break;
            }
        }
    }

    client.disconnect().await;
    println!("Left the chat");
    Ok(())
}

/// Print one relay event; returns false once the session is over
fn render_event(event: ClientEvent) -> bool {
    match event {
        ClientEvent::Chat {
            sender, text, time, ..
        } => {
            println!("[{}] <{}> {}", clock(time), sender, text);
            true
        }
        ClientEvent::System { text, time, .. } => {
            println!("[{}] *** {}", clock(time), text);
            true
        }
        ClientEvent::Disconnected => {
            println!("*** server closed the session");
            false
        }
    }
}

/// Render an epoch-second timestamp as local wall-clock time
fn clock(epoch: i64) -> String {
    match Local.timestamp_opt(epoch, 0) {
        LocalResult::Single(t) => t.format("%H:%M:%S").to_string(),
        _ => epoch.to_string(),
    }
}
