//! Chain indexer
//!
//! Scans the position manager's IncreaseLiquidity / DecreaseLiquidity /
//! Collect events in bounded block windows, keeps only those originated by
//! our account, and folds them into the position store. The cursor only
//! advances after a whole window processes cleanly, so a failed window is
//! re-scanned; every event row is keyed by tx hash and commits atomically
//! with its position fold, making the re-scan harmless.

use crate::chain::UniswapPool;
use crate::contracts::INonfungiblePositionManager;
use crate::store::SqliteStore;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, SyncStatus};
use alloy::sol_types::SolEvent;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Refuse to index against a node lagging more than this many blocks.
const SYNC_LAG_TOLERANCE: u64 = 2;

/// Pause between cycles once caught up to the chain head.
const CAUGHT_UP_SLEEP_SECS: u64 = 10;

/// The window to scan next, given the cursor. `None` when there is nothing
/// new. Windows are clamped to `window` blocks so the node's log-range
/// limits are never hit.
pub fn next_window(latest_indexed: u64, start_block: u64, head: u64, window: u64) -> Option<(u64, u64)> {
    let from = if latest_indexed == 0 {
        start_block
    } else {
        latest_indexed + 1
    };
    if from > head {
        return None;
    }
    Some((from, (from + window - 1).min(head)))
}

pub struct ChainIndexer<P> {
    provider: Arc<P>,
    store: SqliteStore,
    pool: Arc<UniswapPool<P>>,
    position_manager: Address,
    /// Only events from transactions sent by this account are indexed.
    account: Address,
    start_block: u64,
    blocks_per_call: u64,
}

impl<P: Provider + 'static> ChainIndexer<P> {
    /// Build the indexer, refusing to start against a syncing node.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        provider: Arc<P>,
        store: SqliteStore,
        pool: Arc<UniswapPool<P>>,
        position_manager: Address,
        account: Address,
        start_block: u64,
        blocks_per_call: u64,
    ) -> Result<Self> {
        match provider.syncing().await.context("eth_syncing failed")? {
            SyncStatus::None => {}
            SyncStatus::Info(sync) => {
                let lag = sync.highest_block.saturating_sub(sync.current_block);
                if lag > U256::from(SYNC_LAG_TOLERANCE) {
                    bail!(
                        "Node is syncing ({} blocks behind), refusing to index",
                        lag
                    );
                }
            }
        }

        Ok(Self {
            provider,
            store,
            pool,
            position_manager,
            account,
            start_block,
            blocks_per_call,
        })
    }

    /// Main loop. Never returns. Errors inside a window are logged and the
    /// window is retried without advancing the cursor.
    pub async fn run(&self) {
        info!(
            "Chain indexer started: position manager {:?}, window {} blocks",
            self.position_manager, self.blocks_per_call
        );

        loop {
            match self.step().await {
                Ok(true) => {
                    tokio::time::sleep(Duration::from_secs(CAUGHT_UP_SLEEP_SECS)).await;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Indexing window failed (will retry): {:#}", e);
                    tokio::time::sleep(Duration::from_secs(CAUGHT_UP_SLEEP_SECS)).await;
                }
            }
        }
    }

    /// Process one window. Returns true when caught up to the head.
    pub async fn step(&self) -> Result<bool> {
        let cursor = self.store.cursor()?;
        let head = self
            .provider
            .get_block_number()
            .await
            .context("Failed to get chain head")?;

        let (from, to) = match next_window(
            cursor.latest_block,
            self.start_block,
            head,
            self.blocks_per_call,
        ) {
            Some(w) => w,
            None => {
                self.store.set_synced(true)?;
                return Ok(true);
            }
        };

        debug!("Indexing blocks {}..={} (head {})", from, to, head);
        self.scan_increases(from, to).await?;
        self.scan_decreases(from, to).await?;
        self.scan_collects(from, to).await?;

        // The whole window processed cleanly; only now does the cursor move.
        self.store.set_latest_block(to)?;
        let caught_up = to == head;
        self.store.set_synced(caught_up)?;
        Ok(caught_up)
    }

    async fn scan_increases(&self, from: u64, to: u64) -> Result<()> {
        let logs = self
            .get_logs(
                from,
                to,
                INonfungiblePositionManager::IncreaseLiquidity::SIGNATURE_HASH,
            )
            .await?;

        for log in logs {
            let tx_hash = log.transaction_hash.context("Log missing tx hash")?;
            let block = log.block_number.context("Log missing block number")?;
            if !self.is_ours(tx_hash).await? {
                continue;
            }

            let ev = INonfungiblePositionManager::IncreaseLiquidity::decode_log(&log.inner)
                .context("Failed to decode IncreaseLiquidity")?;
            let token_id: u64 = ev
                .data
                .tokenId
                .try_into()
                .context("Token id out of range")?;
            let liquidity: u128 = ev.data.liquidity;
            let amount0 = ev.data.amount0.to_string();
            let amount1 = ev.data.amount1.to_string();

            // First sight of a position fetches its tick bounds from the
            // position manager and the IL baseline from the pool price at
            // the mint block; known positions reuse the stored values.
            let known = self.store.position_by_token_id(token_id)?;
            let (tick_lower, tick_upper, entry_price) = match &known {
                Some(pos) => (pos.tick_lower, pos.tick_upper, pos.entry_price),
                None => {
                    let npm = INonfungiblePositionManager::new(
                        self.position_manager,
                        self.provider.clone(),
                    );
                    let details = npm
                        .positions(ev.data.tokenId)
                        .call()
                        .await
                        .with_context(|| format!("positions({}) failed", token_id))?;
                    (
                        i32::try_from(details.tickLower).unwrap_or(0),
                        i32::try_from(details.tickUpper).unwrap_or(0),
                        self.pool.price_at_block(block).await?,
                    )
                }
            };

            // The mint row and the position fold commit in one transaction,
            // so a replayed window either skips here or applies fully.
            let applied = self.store.apply_increase(
                &format!("{:?}", tx_hash),
                token_id,
                liquidity,
                &amount0,
                &amount1,
                tick_lower,
                tick_upper,
                block,
                entry_price,
            )?;
            if !applied {
                debug!("IncreaseLiquidity {:?} already indexed, skipping", tx_hash);
                continue;
            }

            if known.is_some() {
                info!(
                    "Position {} increased by {} liquidity at block {}",
                    token_id, liquidity, block
                );
            } else {
                info!(
                    "New position {}: ticks [{}, {}], entry price {:.5}, block {}",
                    token_id, tick_lower, tick_upper, entry_price, block
                );
            }
        }

        Ok(())
    }

    async fn scan_decreases(&self, from: u64, to: u64) -> Result<()> {
        let logs = self
            .get_logs(
                from,
                to,
                INonfungiblePositionManager::DecreaseLiquidity::SIGNATURE_HASH,
            )
            .await?;

        for log in logs {
            let tx_hash = log.transaction_hash.context("Log missing tx hash")?;
            let block = log.block_number.context("Log missing block number")?;
            if !self.is_ours(tx_hash).await? {
                continue;
            }

            let ev = INonfungiblePositionManager::DecreaseLiquidity::decode_log(&log.inner)
                .context("Failed to decode DecreaseLiquidity")?;
            let token_id: u64 = ev
                .data
                .tokenId
                .try_into()
                .context("Token id out of range")?;

            if self.store.position_by_token_id(token_id)?.is_none() {
                warn!("DecreaseLiquidity for unknown position {}", token_id);
                continue;
            }

            // Idempotent on tx hash: a replayed window subtracts nothing.
            let applied = self.store.apply_decrease(
                &format!("{:?}", tx_hash),
                token_id,
                ev.data.liquidity,
                &ev.data.amount0.to_string(),
                &ev.data.amount1.to_string(),
                block,
            )?;
            match applied {
                Some(remaining) => info!(
                    "Position {} decreased to {} liquidity{}",
                    token_id,
                    remaining,
                    if remaining > 0 { "" } else { " (closed)" }
                ),
                None => debug!("DecreaseLiquidity {:?} already indexed, skipping", tx_hash),
            }
        }

        Ok(())
    }

    async fn scan_collects(&self, from: u64, to: u64) -> Result<()> {
        let logs = self
            .get_logs(from, to, INonfungiblePositionManager::Collect::SIGNATURE_HASH)
            .await?;

        for log in logs {
            let tx_hash = log.transaction_hash.context("Log missing tx hash")?;
            if !self.is_ours(tx_hash).await? {
                continue;
            }

            let ev = INonfungiblePositionManager::Collect::decode_log(&log.inner)
                .context("Failed to decode Collect")?;
            let token_id: u64 = ev
                .data
                .tokenId
                .try_into()
                .context("Token id out of range")?;

            let Some(pos) = self.store.position_by_token_id(token_id)? else {
                warn!("Collect for unknown position {}", token_id);
                continue;
            };

            let inserted = self.store.insert_collect_event(
                &format!("{:?}", tx_hash),
                token_id,
                &ev.data.amount0.to_string(),
                &ev.data.amount1.to_string(),
                pos.id,
            )?;
            if inserted {
                info!(
                    "Position {} collected {} / {}",
                    token_id, ev.data.amount0, ev.data.amount1
                );
            } else {
                debug!("Collect {:?} already indexed, skipping", tx_hash);
            }
        }

        Ok(())
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        topic: alloy::primitives::B256,
    ) -> Result<Vec<alloy::rpc::types::Log>> {
        let filter = Filter::new()
            .address(self.position_manager)
            .from_block(from)
            .to_block(to)
            .event_signature(topic);
        self.provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("get_logs failed for blocks {}..={}", from, to))
    }

    /// Whether the transaction that emitted a log was sent by our account.
    async fn is_ours(&self, tx_hash: TxHash) -> Result<bool> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .context("Failed to get receipt")?
            .with_context(|| format!("No receipt for {:?}", tx_hash))?;
        Ok(receipt.from == self.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_window_starts_at_deployment_block() {
        let (from, to) = next_window(0, 24_454_082, 25_000_000, 2000).unwrap();
        assert_eq!(from, 24_454_082);
        assert_eq!(to, 24_456_081);
    }

    #[test]
    fn test_window_resumes_after_cursor() {
        let (from, to) = next_window(24_456_081, 24_454_082, 25_000_000, 2000).unwrap();
        assert_eq!(from, 24_456_082);
        assert_eq!(to, 24_458_081);
    }

    #[test]
    fn test_window_clamped_to_head() {
        let (from, to) = next_window(24_999_000, 24_454_082, 25_000_000, 2000).unwrap();
        assert_eq!(from, 24_999_001);
        assert_eq!(to, 25_000_000);
    }

    #[test]
    fn test_no_window_when_caught_up() {
        assert!(next_window(25_000_000, 24_454_082, 25_000_000, 2000).is_none());
    }

    #[test]
    fn test_single_block_window_at_head() {
        let (from, to) = next_window(24_999_999, 24_454_082, 25_000_000, 2000).unwrap();
        assert_eq!(from, 25_000_000);
        assert_eq!(to, 25_000_000);
    }
}
