use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use blocknode::block::Block;
use blocknode::chain::Chain;
use blocknode::config::NodeConfig;
use blocknode::crypto::{Address, PrivateKey};
use blocknode::server::Server;
use blocknode::storage::MemStorage;
use blocknode::transport::TcpTransport;

/// A minimal blockchain node: chain, mempool, stack VM, and gossip sync.
#[derive(Parser, Debug)]
#[command(name = "blocknoded")]
struct Cli {
    /// Node identifier reported in STATUS replies.
    #[arg(long, default_value = "node")]
    id: String,

    /// Address to listen on for peer TCP connections.
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,

    /// Block production interval, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    block_time_ms: u64,

    /// Seed peer address to dial at startup; may be repeated.
    #[arg(long = "seed", value_name = "ADDR")]
    seed_peers: Vec<String>,

    /// Run as a validator: generates a signing key and produces blocks.
    #[arg(long)]
    validator: bool,

    /// Maximum number of transactions the mempool will hold.
    #[arg(long, default_value_t = 1000)]
    mempool_max_length: usize,

    /// Address treated as an inexhaustible balance source (hex, with or
    /// without a `0x` prefix).
    #[arg(long, default_value = "0x996fb92427ae41e4649b934ca495991b7852b855")]
    faucet_address: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let faucet_address = Address::from_hex(&cli.faucet_address)
        .expect("--faucet-address must be a 20-byte hex address");

    let private_key = cli.validator.then(PrivateKey::generate);

    let config = NodeConfig {
        id: cli.id.clone(),
        block_time: Duration::from_millis(cli.block_time_ms),
        private_key,
        seed_peers: cli.seed_peers.clone(),
        mempool_max_length: cli.mempool_max_length,
        faucet_address,
    };

    // A lone validator signs its own genesis so the coinbase supply (see
    // chain::GENESIS_SUPPLY) lands on its address; a non-validator node
    // runs a validator-free genesis, per the "validator-free or pre-signed"
    // option in the genesis contract. Nodes meant to join the same network
    // must be given an identical, externally-agreed genesis; this binary
    // always mints a fresh one, so `--seed` peers here are for local
    // multi-process demos rather than joining an established network.
    let mut genesis = Block::genesis(vec![], 0);
    if let Some(ref key) = config.private_key {
        genesis.sign(key);
    }

    let chain = Chain::new(genesis, config.faucet_address, Arc::new(MemStorage::new()))
        .expect("genesis block must apply cleanly");

    let transport = Arc::new(TcpTransport::new(cli.listen.clone()));
    let server = Server::new(config, transport, chain);

    let shutdown_handle = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            shutdown_handle.shutdown();
        }
    });

    info!(id = %cli.id, listen = %cli.listen, "starting node");
    server.run().await;
}
