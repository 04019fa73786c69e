//! Command-line interface for the relay binary

use std::net::IpAddr;

use clap::{Args, Parser, Subcommand};
use parley_net::{Transport, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server
    Server(ServerArgs),
    /// Connect to a relay and chat
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Transport protocol (tcp or udp)
    #[arg(long, default_value = "tcp")]
    pub protocol: Transport,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay server
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port of the relay server
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Transport protocol (tcp or udp)
    #[arg(long, default_value = "tcp")]
    pub protocol: Transport,

    /// Display name used in the chat
    #[arg(long)]
    pub name: String,
}
