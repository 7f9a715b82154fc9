use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain_core::{mine, PendingBlock, SignedTx, State, Tx, REWARD_DATA};
use shared::{Account, ChainError, KeyPair};

mod http;
mod node;
mod sync;
mod wallet;

use node::{Node, NodeConfig, PeerNode, DEFAULT_HTTP_PORT};

const MAJOR: &str = "0";
const MINOR: &str = "9";
const FIX: &str = "0";
const VERBAL: &str = "Signed transactions and peer sync";

#[derive(Parser)]
#[command(name = "minichain", about = "Minichain - proof-of-work blockchain node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describes version
    Version,
    /// Interacts with account balances
    Balances {
        #[command(subcommand)]
        command: BalancesCommands,
    },
    /// Launches the node and its HTTP API
    Run(RunArgs),
    /// Seeds the datadir with development blocks
    Migrate {
        /// Absolute path to the node data dir
        #[arg(long)]
        datadir: PathBuf,
    },
    /// Manages accounts and keys
    Wallet {
        #[command(subcommand)]
        command: WalletCommands,
    },
}

#[derive(Subcommand)]
enum BalancesCommands {
    /// Lists all account balances at the latest block
    List {
        /// Absolute path to the node data dir
        #[arg(long)]
        datadir: PathBuf,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Creates a new account with an encrypted keystore file
    NewAccount {
        /// Absolute path to the node data dir
        #[arg(long)]
        datadir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Absolute path to the node data dir
    #[arg(long)]
    datadir: PathBuf,

    /// IP address the HTTP API binds to
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Exposed HTTP port for communication with peers
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Account that collects block rewards
    #[arg(long)]
    miner: Account,

    /// Bootstrap peer IP address
    #[arg(long)]
    bootstrap_ip: Option<String>,

    /// Bootstrap peer port
    #[arg(long)]
    bootstrap_port: Option<u16>,

    /// Bootstrap peer account
    #[arg(long)]
    bootstrap_account: Option<Account>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match cli.command {
        Commands::Version => {
            println!("Version: {MAJOR}.{MINOR}.{FIX}-beta {VERBAL}");
            Ok(())
        }
        Commands::Balances {
            command: BalancesCommands::List { datadir },
        } => list_balances(&datadir),
        Commands::Run(args) => run_node(args).await,
        Commands::Migrate { datadir } => migrate(&datadir),
        Commands::Wallet {
            command: WalletCommands::NewAccount { datadir },
        } => new_account(&datadir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}

fn list_balances(datadir: &Path) -> shared::Result<()> {
    let state = State::new_from_disk(datadir)?;

    println!("Account balances at {}:", state.latest_block_hash());
    println!("-------------------");
    let sorted: BTreeMap<_, _> = state.balances().iter().collect();
    for (account, balance) in sorted {
        println!("{account}: {balance}");
    }

    Ok(())
}

async fn run_node(args: RunArgs) -> shared::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bootstrap = match (args.bootstrap_ip, args.bootstrap_port) {
        (Some(ip), Some(port)) => Some(PeerNode::new(
            ip,
            port,
            true,
            args.bootstrap_account.unwrap_or_default(),
            true,
        )),
        (None, None) => None,
        _ => {
            return Err(ChainError::Config(
                "bootstrap requires both --bootstrap-ip and --bootstrap-port".to_string(),
            ))
        }
    };

    let config = NodeConfig {
        data_dir: args.datadir,
        ip: args.ip,
        port: args.port,
        miner: args.miner,
        bootstrap,
    };

    let (shutdown_sender, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 shutdown signal received");
            let _ = shutdown_sender.send(true);
        }
    });

    let node = Node::new(config)?;
    node.run(shutdown).await
}

/// Semeia três blocos de desenvolvimento: uma cunhagem inicial para uma conta
/// descartável e transferências comuns entre duas contas geradas na hora
fn migrate(datadir: &Path) -> shared::Result<()> {
    let mut state = State::new_from_disk(datadir)?;
    if state.has_genesis_block() {
        return Err(ChainError::Config(
            "datadir already contains blocks".to_string(),
        ));
    }

    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    let never_cancel = AtomicBool::new(false);

    let add_seed_block = |state: &mut State, miner: Account, txs: Vec<SignedTx>| {
        let pending = PendingBlock::new(
            state.latest_block_hash(),
            state.next_block_number(),
            miner,
            txs,
        );
        let block = mine(&pending, &never_cancel)?;
        let hash = state.add_block(block)?;
        println!("Block {} added: {hash}", pending.number);
        shared::Result::Ok(())
    };

    // Bloco 0: cunhagem de desenvolvimento para a conta da Alice
    add_seed_block(
        &mut state,
        alice.account,
        vec![SignedTx::sign(
            Tx::new(alice.account, alice.account, 1_000, REWARD_DATA),
            &alice.secret,
        )?],
    )?;

    // Bloco 1: transferências comuns Alice -> Bob
    add_seed_block(
        &mut state,
        alice.account,
        vec![
            SignedTx::sign(Tx::new(alice.account, bob.account, 250, ""), &alice.secret)?,
            SignedTx::sign(Tx::new(alice.account, bob.account, 50, ""), &alice.secret)?,
        ],
    )?;

    // Bloco 2: Bob devolve uma parte
    add_seed_block(
        &mut state,
        bob.account,
        vec![SignedTx::sign(
            Tx::new(bob.account, alice.account, 75, ""),
            &bob.secret,
        )?],
    )?;

    println!("Migration finished. Balances:");
    let sorted: BTreeMap<_, _> = state.balances().iter().collect();
    for (account, balance) in sorted {
        println!("{account}: {balance}");
    }

    Ok(())
}

fn new_account(datadir: &Path) -> shared::Result<()> {
    let passphrase =
        rpassword::prompt_password("Please enter a password to encrypt the new wallet: ")
            .map_err(|e| ChainError::Keystore(e.to_string()))?;
    let confirmation = rpassword::prompt_password("Please confirm the password: ")
        .map_err(|e| ChainError::Keystore(e.to_string()))?;
    if passphrase != confirmation {
        return Err(ChainError::Keystore("passwords do not match".to_string()));
    }

    let account = wallet::new_account(datadir, &passphrase)?;
    println!("New account created: {account}");

    Ok(())
}
