//! Default chain adapters
//!
//! - [`bitcoin::BlockstreamChain`]: Bitcoin lock chain (feature `utxo`)
//! - [`evm::EvmMintChain`]: EVM mint chain via the gateway registry (feature `evm`)

#[cfg(feature = "utxo")]
pub mod bitcoin;
#[cfg(feature = "evm")]
pub mod evm;

#[cfg(feature = "utxo")]
pub use self::bitcoin::BlockstreamChain;
#[cfg(feature = "evm")]
pub use self::evm::EvmMintChain;

/// Decimals of a RenVM asset, shared by its native and representative forms
pub fn asset_decimals(asset: &str) -> u8 {
    match asset {
        "BTC" | "BCH" | "ZEC" | "DGB" | "DOGE" => 8,
        "LUNA" => 6,
        _ => 18,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_decimals() {
        assert_eq!(asset_decimals("BTC"), 8);
        assert_eq!(asset_decimals("DOGE"), 8);
        assert_eq!(asset_decimals("ETH"), 18);
    }
}
