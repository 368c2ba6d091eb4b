//! Centralized Contract Definitions
//!
//! All Solidity contract interfaces used by the bot, defined with alloy's
//! `sol!` macro. Each interface is annotated with `#[sol(rpc)]` to generate
//! contract instance types that can make RPC calls via any alloy Provider.
//!
//! Also holds the per-chain deployment address book, validated at startup.

use alloy::primitives::{address, Address};
use alloy::sol;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
    }
}

// ── Uniswap V3 ───────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface UniswapV3Pool {
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked);
        function liquidity() external view returns (uint128);
        function fee() external view returns (uint24);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    interface ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
    }
}

sol! {
    #[sol(rpc)]
    interface IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        struct QuoteExactOutputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amount;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params) external returns (uint256 amountOut, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate);
        function quoteExactOutputSingle(QuoteExactOutputSingleParams memory params) external returns (uint256 amountIn, uint160 sqrtPriceX96After, uint32 initializedTicksCrossed, uint256 gasEstimate);
    }
}

sol! {
    #[sol(rpc)]
    interface INonfungiblePositionManager {
        event IncreaseLiquidity(uint256 indexed tokenId, uint128 liquidity, uint256 amount0, uint256 amount1);
        event DecreaseLiquidity(uint256 indexed tokenId, uint128 liquidity, uint256 amount0, uint256 amount1);
        event Collect(uint256 indexed tokenId, address recipient, uint256 amount0, uint256 amount1);

        struct CollectParams {
            uint256 tokenId;
            address recipient;
            uint128 amount0Max;
            uint128 amount1Max;
        }

        function positions(uint256 tokenId) external view returns (uint96 nonce, address operator, address token0, address token1, uint24 fee, int24 tickLower, int24 tickUpper, uint128 liquidity, uint256 feeGrowthInside0LastX128, uint256 feeGrowthInside1LastX128, uint128 tokensOwed0, uint128 tokensOwed1);
        function collect(CollectParams calldata params) external payable returns (uint256 amount0, uint256 amount1);
    }
}

// ── Address book ─────────────────────────────────────────────────────

/// Canonical deployment addresses for one chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainAddresses {
    pub swap_router: Address,
    pub quoter_v2: Address,
    pub position_manager: Address,
    pub usdc: Address,
    pub eurc: Address,
}

static CHAIN_ADDRESSES: Lazy<HashMap<u64, ChainAddresses>> = Lazy::new(|| {
    let mut m = HashMap::new();
    // Ethereum mainnet
    m.insert(
        1,
        ChainAddresses {
            swap_router: address!("0xe592427a0aece92de3edee1f18e0157c05861564"),
            quoter_v2: address!("0x61ffe014ba17989e743c5f6cb21bf9697530b21e"),
            position_manager: address!("0xc36442b4a4522e871399cd717abdd847ab11fe88"),
            usdc: address!("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            eurc: address!("0x1abaea1f7c830bd89acc67ec4af516284b1bc33c"),
        },
    );
    // Base
    m.insert(
        8453,
        ChainAddresses {
            swap_router: address!("0x2626664c2603336e57b271c5c0b26f421741e481"),
            quoter_v2: address!("0x3d4e44eb1374240ce5f1b871ab261cd16335b76a"),
            position_manager: address!("0x03a520b32c04bf3beef7beb72e919cf822ed34f1"),
            usdc: address!("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"),
            eurc: address!("0x808456652fdb597867f38412077a9182bf77359f"),
        },
    );
    m
});

/// Look up the address book for a chain. Fails fast on unsupported chains.
pub fn addresses_for(chain_id: u64) -> Result<ChainAddresses> {
    CHAIN_ADDRESSES
        .get(&chain_id)
        .copied()
        .with_context(|| format!("Unsupported chain id {} (supported: 1, 8453)", chain_id))
}

/// Helper: convert a u32 fee tier to alloy's uint24 type for contract calls.
/// Uses from_limbs() because Uint<24, 1> doesn't impl From<u32>.
pub fn fee_to_u24(fee: u32) -> alloy::primitives::Uint<24, 1> {
    debug_assert!(fee <= 0xFFFFFF, "fee {} exceeds U24 max", fee);
    alloy::primitives::Uint::from_limbs([fee as u64])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_book_known_chains() {
        assert!(addresses_for(1).is_ok());
        assert!(addresses_for(8453).is_ok());
        assert!(addresses_for(137).is_err());
    }

    #[test]
    fn test_fee_to_u24() {
        assert_eq!(fee_to_u24(500).to::<u32>(), 500);
        assert_eq!(fee_to_u24(3000).to::<u32>(), 3000);
    }
}
