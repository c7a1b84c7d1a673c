use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "powchain", about = "Proof-of-work blockchain node")]
pub struct Opt {
    /// TOML settings file; environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createwallet", about = "Create the node wallet if it does not exist")]
    Createwallet,
    #[command(name = "address", about = "Print the node wallet address")]
    Address,
    #[command(name = "startnode", about = "Start a node")]
    StartNode {
        #[arg(long, help = "Mine blocks, paying rewards to the node wallet")]
        mine: bool,
    },
    #[command(name = "printchain", about = "Print the main chain from genesis")]
    Printchain,
    #[command(name = "getbalance", about = "Get the balance of an address")]
    GetBalance {
        #[arg(help = "The address")]
        address: String,
    },
    #[command(name = "send", about = "Pay an address from the node wallet")]
    Send {
        #[arg(help = "Destination address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long, help = "Node to submit to (host:port), defaults to the local node")]
        node: Option<String>,
    },
}
