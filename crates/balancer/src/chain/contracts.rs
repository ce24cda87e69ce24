//! Compile-time ABI definitions for on-chain contracts via Alloy `sol!`.

use alloy::sol;

// ---------------------------------------------------------------------------
// Chainlink Aggregator V3
// ---------------------------------------------------------------------------

sol! {
    /// Chainlink price feed interface — direct-publisher USD quotes.
    #[sol(rpc)]
    interface IAggregatorV3 {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );

        function decimals() external view returns (uint8);
    }
}

// ---------------------------------------------------------------------------
// Uniswap V3 Pool
// ---------------------------------------------------------------------------

sol! {
    /// Concentrated-liquidity pool observation interface.
    ///
    /// `observe` returns cumulative tick and seconds-per-liquidity readings
    /// at the requested seconds-ago offsets; the adapter differences two
    /// readings into a mean tick and a harmonic-mean liquidity.
    #[sol(rpc)]
    interface IUniswapV3Pool {
        function observe(uint32[] calldata secondsAgos) external view returns (
            int56[] memory tickCumulatives,
            uint160[] memory secondsPerLiquidityCumulativeX128s
        );
    }
}

// ---------------------------------------------------------------------------
// ERC-20
// ---------------------------------------------------------------------------

sol! {
    /// Minimal ERC-20 surface: balance reads and treasury transfers.
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
    }
}
