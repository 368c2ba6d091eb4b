//! CEX-DEX Arbitrage Bot (Coinbase Exchange ↔ Uniswap V3, EURC/USDC)
//!
//! Main entry point. Wires four long-lived loops over one provider:
//! - Opportunity detector: polls the exchange book against pool quotes
//! - Task executor: drains the priority queue one task at a time
//! - Chain indexer: folds position-manager events into SQLite
//! - Position analyzer: values indexed LP positions once synced

use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use cexarb_bot::account::AccountManager;
use cexarb_bot::analyzer::PositionAnalyzer;
use cexarb_bot::arbitrage::{CostModel, OpportunityDetector};
use cexarb_bot::chain::{UniswapPool, WalletService};
use cexarb_bot::config::load_config;
use cexarb_bot::contracts::addresses_for;
use cexarb_bot::exchange::CoinbaseClient;
use cexarb_bot::execution::{TaskExecutor, TaskQueue};
use cexarb_bot::indexer::ChainIndexer;
use cexarb_bot::notify::Notifier;
use cexarb_bot::store::SqliteStore;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};

/// CEX-DEX Arbitrage Bot — Coinbase Exchange ↔ Uniswap V3
#[derive(Parser)]
#[command(name = "cexarb-bot")]
struct Args {
    /// Database path (overrides DB_PATH from the environment)
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = load_config()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    info!(
        "CEX-DEX Arbitrage Bot Starting — {} on chain {}",
        config.product_id, config.chain_id
    );

    // Fail fast on unsupported chains before touching the network.
    let addrs = addresses_for(config.chain_id)?;

    let signer: PrivateKeySigner = config
        .private_key
        .parse()
        .context("Invalid PRIVATE_KEY")?;
    let wallet_address = signer.address();

    let provider = Arc::new(
        ProviderBuilder::new()
            .wallet(signer)
            .connect_http(config.rpc_url.parse().context("Invalid RPC_URL")?),
    );

    // Verify connection
    let block = provider.get_block_number().await?;
    info!("Connected! Current block: {} (wallet {:?})", block, wallet_address);

    let store = SqliteStore::open(&config.db_path)?;
    let notifier = Notifier::new(config.telegram_token.clone(), config.telegram_chat_id.clone());

    let exchange = Arc::new(CoinbaseClient::new(&config));
    let pool = Arc::new(UniswapPool::new(Arc::clone(&provider), &config, wallet_address).await?);
    let wallet = Arc::new(WalletService::new(Arc::clone(&provider), wallet_address));
    let accounts = Arc::new(AccountManager::new(
        Arc::clone(&exchange),
        Arc::clone(&wallet),
        addrs.usdc,
        addrs.eurc,
    ));
    let costs = Arc::new(CostModel::new(
        Arc::clone(&provider),
        Arc::clone(&exchange),
        Arc::clone(&pool),
        config.taker_fee_rate,
    ));
    let queue = Arc::new(TaskQueue::new());

    // The indexer refuses to start against a syncing node.
    let indexer = ChainIndexer::new(
        Arc::clone(&provider),
        store.clone(),
        Arc::clone(&pool),
        addrs.position_manager,
        wallet_address,
        config.indexer_start_block,
        config.blocks_per_call,
    )
    .await?;

    let position_analyzer = PositionAnalyzer::new(
        Arc::clone(&provider),
        store.clone(),
        Arc::clone(&pool),
        addrs.position_manager,
        wallet_address,
    );

    let detector = OpportunityDetector::new(
        config.clone(),
        Arc::clone(&exchange),
        Arc::clone(&pool),
        Arc::clone(&wallet),
        Arc::clone(&accounts),
        Arc::clone(&costs),
        Arc::clone(&queue),
    );
    let executor = TaskExecutor::new(Arc::clone(&queue), notifier.clone());

    notifier
        .send(&format!(
            "🚀 Bot started: {} on chain {}",
            config.product_id, config.chain_id
        ))
        .await;

    tokio::join!(
        detector.run(),
        executor.run(),
        indexer.run(),
        position_analyzer.run(),
    );

    Ok(())
}
