//! pyrite — command-line front end for the Pyrite node.
//!
//! Every command takes a persistent `--node` flag naming the node
//! identifier, which fixes both the data file suffixes and the TCP port.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use pyrite_chain::{Blockchain, UtxoIndex};
use pyrite_core::address;
use pyrite_core::transaction::Transaction;
use pyrite_node::{NodeConfig, Server, submit_transaction};
use pyrite_wallet::Wallet;

/// Pyrite: a small proof-of-work cryptocurrency node.
#[derive(Parser)]
#[command(name = "pyrite", version, about)]
struct Cli {
    /// Node identifier; also the TCP port and data file suffix.
    #[arg(long, global = true, default_value = "3000")]
    node: String,

    /// Data directory for chain databases and wallet files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a chain database and pay the genesis reward to an address.
    CreateChain(CreateChainArgs),
    /// Generate a new keypair and print its address.
    CreateWallet,
    /// Print every block, tip to genesis.
    PrintChain,
    /// List the addresses stored in the wallet file.
    PrintAddresses,
    /// Sum the unspent outputs locked to an address.
    GetBalance(GetBalanceArgs),
    /// Rebuild the UTXO index from a full chain replay.
    RebuildChainState,
    /// Send coins from one owned address to another address.
    Transfer(TransferArgs),
    /// Run the gossip server, optionally mining to an address.
    StartServer(StartServerArgs),
}

#[derive(Args)]
struct CreateChainArgs {
    /// The address the genesis block reward is paid to.
    #[arg(long)]
    address: String,
}

#[derive(Args)]
struct GetBalanceArgs {
    /// The address to sum unspent outputs for.
    #[arg(long)]
    address: String,
}

#[derive(Args)]
struct TransferArgs {
    /// Source wallet address.
    #[arg(long)]
    from: String,

    /// Destination address.
    #[arg(long)]
    to: String,

    /// Amount to transfer.
    #[arg(long)]
    amount: u64,

    /// Mine the transaction into a block locally instead of submitting it
    /// to the bootstrap node.
    #[arg(long)]
    mine: bool,
}

#[derive(Args)]
struct StartServerArgs {
    /// Mining reward address; mining is enabled when set.
    #[arg(long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig {
        node_id: cli.node.clone(),
        data_dir: cli
            .data_dir
            .unwrap_or_else(NodeConfig::default_data_dir),
        bootstrap_addr: pyrite_node::config::DEFAULT_BOOTSTRAP.to_string(),
    };

    match cli.command {
        Commands::CreateChain(args) => create_chain(&config, args),
        Commands::CreateWallet => create_wallet(&config),
        Commands::PrintChain => print_chain(&config),
        Commands::PrintAddresses => print_addresses(&config),
        Commands::GetBalance(args) => get_balance(&config, args),
        Commands::RebuildChainState => rebuild_chain_state(&config),
        Commands::Transfer(args) => transfer(&config, args).await,
        Commands::StartServer(args) => start_server(&config, args).await,
    }
}

fn create_chain(config: &NodeConfig, args: CreateChainArgs) -> Result<()> {
    if !address::validate(&args.address) {
        bail!("address is not valid: {}", args.address);
    }

    let chain = Blockchain::create(config.db_path(), &args.address)
        .context("create chain database")?;
    UtxoIndex::new(&chain)
        .rebuild()
        .context("build chain state")?;

    println!("Done!");
    Ok(())
}

fn create_wallet(config: &NodeConfig) -> Result<()> {
    let mut wallet = Wallet::load_or_create(config.wallet_path())?;
    let addr = wallet.create_account();
    wallet.save().context("save wallet")?;

    println!("New address: {addr}");
    Ok(())
}

fn print_chain(config: &NodeConfig) -> Result<()> {
    let chain = Blockchain::open(config.db_path())?;

    chain.for_each(|block| {
        println!("============ Block {} ============", block.hash);
        println!("Height: {}", block.height);
        println!("Prev. block: {}", block.prev_hash);
        let valid = block.validate_pow().map(|ok| ok.to_string());
        println!("PoW: {}\n", valid.unwrap_or_else(|e| e.to_string()));
        for tx in &block.transactions {
            println!("{tx}");
        }
        println!();
        Ok(())
    })?;
    Ok(())
}

fn print_addresses(config: &NodeConfig) -> Result<()> {
    let wallet = Wallet::load_or_create(config.wallet_path())?;
    let addresses = wallet.addresses();
    for (i, addr) in addresses.iter().enumerate() {
        println!("{}: {addr}", i + 1);
    }
    println!("total addresses: {}", addresses.len());
    Ok(())
}

fn get_balance(config: &NodeConfig, args: GetBalanceArgs) -> Result<()> {
    if !address::validate(&args.address) {
        bail!("address is not valid: {}", args.address);
    }

    let chain = Blockchain::open(config.db_path())?;
    let index = UtxoIndex::new(&chain);
    let pub_key_hash = address::pub_key_hash_of(&args.address)?;
    let balance: u64 = index
        .utxos_for(&pub_key_hash)?
        .iter()
        .map(|out| out.value)
        .sum();

    println!("Balance of '{}': {balance}", args.address);
    Ok(())
}

fn rebuild_chain_state(config: &NodeConfig) -> Result<()> {
    let chain = Blockchain::open(config.db_path())?;
    let index = UtxoIndex::new(&chain);
    index.rebuild()?;

    println!(
        "There are {} transactions in the UTXO set.",
        index.tx_count()?
    );
    Ok(())
}

async fn transfer(config: &NodeConfig, args: TransferArgs) -> Result<()> {
    if !address::validate(&args.from) {
        bail!("sender address is not valid: {}", args.from);
    }
    if !address::validate(&args.to) {
        bail!("recipient address is not valid: {}", args.to);
    }

    let chain = Blockchain::open(config.db_path())?;
    let index = UtxoIndex::new(&chain);
    let wallet = Wallet::load_or_create(config.wallet_path())?;
    let keypair = wallet.account(&args.from)?;

    let tx = Transaction::new_transfer(keypair, &args.to, args.amount, &index, &chain)?;

    if args.mine {
        let reward = Transaction::new_coinbase(&args.from, "")?;
        let block = chain.mine(vec![reward, tx])?;
        index.update(&block)?;
    } else {
        submit_transaction(config, &tx)
            .await
            .context("submit transaction to bootstrap node")?;
    }

    println!("Success!");
    Ok(())
}

async fn start_server(config: &NodeConfig, args: StartServerArgs) -> Result<()> {
    if let Some(addr) = &args.address {
        if !address::validate(addr) {
            bail!("miner address is not valid: {addr}");
        }
    }

    let chain = Blockchain::open(config.db_path())?;
    let server = Server::new(config, chain, args.address);
    server.run().await?;
    Ok(())
}
