use clap::Parser;
use log::{error, LevelFilter};
use powchain::network::client::send_transaction;
use powchain::network::Peer;
use powchain::node::{Node, NodeContext};
use powchain::{Blockchain, Command, Config, MemoryPool, Opt, Transaction, WalletStore};
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(opt.config.as_deref())?;
    match opt.command {
        Command::Createwallet => {
            let wallet = WalletStore::new(config.wallet_path()).load_or_create()?;
            println!("Your address: {}", wallet.get_address());
        }
        Command::Address => {
            let wallet = WalletStore::new(config.wallet_path()).require()?;
            println!("{}", wallet.get_address());
        }
        Command::StartNode { mine } => {
            let mut config = config;
            config.mine |= mine;
            let context = NodeContext::open(config)?;
            let node = Node::start(context)?;
            node.wait();
        }
        Command::Printchain => {
            let chain = Blockchain::open(config.store_path(), Arc::new(MemoryPool::new()))?;
            for block in chain.iter() {
                let block = block?;
                println!("Block {}: {}", block.get_block_number(), block.get_hash());
                println!("  previous:  {}", block.get_previous_hash());
                println!("  timestamp: {}", block.get_timestamp());
                println!("  nonce: {}, difficulty: {}", block.get_nonce(), block.get_difficulty());
                for tx in block.get_transactions() {
                    println!("  - transaction {}", tx.get_id());
                    if !tx.is_coinbase() {
                        for input in tx.get_inputs() {
                            println!(
                                "    in  {}:{}",
                                input.get_previous_tx_id(),
                                input.get_previous_output_index()
                            );
                        }
                    }
                    for output in tx.get_outputs() {
                        println!("    out {} to {}", output.get_amount(), output.get_lock());
                    }
                }
                println!();
            }
        }
        Command::GetBalance { address } => {
            let chain = Blockchain::open(config.store_path(), Arc::new(MemoryPool::new()))?;
            println!("Balance of {address}: {}", chain.get_balance(&address)?);
        }
        Command::Send { to, amount, node } => {
            let wallet = WalletStore::new(config.wallet_path()).require()?;
            let target = match node {
                Some(addr) => Peer::parse(&addr)?,
                None => Peer::new(config.advertise_address.clone(), config.listen_port),
            };
            // sled locks the store; this fails while a node runs on the same data_dir.
            let chain = Blockchain::open(config.store_path(), Arc::new(MemoryPool::new()))?;
            let (_, spendable) = chain.find_spendable_outputs(&wallet.get_address(), amount)?;
            let tx = Transaction::new_payment(&wallet, &to, amount, &spendable)?;
            drop(chain);
            send_transaction(&target, &config, tx.clone())?;
            println!("Submitted transaction {} to {}", tx.get_id(), target.get_addr());
        }
    }
    Ok(())
}
