//! Per-asset amount scales.
//!
//! Every asset is assigned a ledger number and a decimal scale at
//! bootstrap. Ledger amounts are unsigned 128-bit integers at that scale
//! (`1.5 BTC` at scale 8 is `150_000_000`). The registry freezes after
//! bootstrap; later writes require an explicit per-call migration override.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::LedgerError;

/// One registered asset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetScale {
    /// Asset symbol, stored uppercase.
    pub asset: String,
    /// Ledger number shared by all accounts of this asset.
    pub ledger: u32,
    /// Decimal places carried by integer amounts of this asset.
    pub scale: u32,
}

/// Process-wide asset → (ledger, scale) table.
///
/// Flipped to frozen exactly once by the production bootstrap; after that,
/// `register` fails unless called with `migration_mode = true`.
#[derive(Debug, Default)]
pub struct AssetScaleRegistry {
    by_asset: HashMap<String, AssetScale>,
    by_ledger: HashMap<u32, String>,
    next_ledger: u32,
    frozen: bool,
}

impl AssetScaleRegistry {
    /// Create an empty, unfrozen registry.
    pub fn new() -> Self {
        Self {
            next_ledger: 1,
            ..Default::default()
        }
    }

    /// Register an asset and return its ledger number.
    ///
    /// Registering an already-known asset with the same scale is
    /// idempotent. A frozen registry rejects new entries unless
    /// `migration_mode` is set for this call.
    pub fn register(
        &mut self,
        asset: &str,
        scale: u32,
        migration_mode: bool,
    ) -> Result<u32, LedgerError> {
        let key = asset.to_uppercase();
        if let Some(existing) = self.by_asset.get(&key) {
            if existing.scale == scale {
                return Ok(existing.ledger);
            }
            return Err(LedgerError::RegistryFrozen);
        }
        if self.frozen && !migration_mode {
            return Err(LedgerError::RegistryFrozen);
        }

        let ledger = self.next_ledger;
        self.next_ledger += 1;
        self.by_asset.insert(
            key.clone(),
            AssetScale {
                asset: key.clone(),
                ledger,
                scale,
            },
        );
        self.by_ledger.insert(ledger, key);
        Ok(ledger)
    }

    /// Freeze the table. Idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether the table is frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Look up an asset's entry.
    pub fn get(&self, asset: &str) -> Result<&AssetScale, LedgerError> {
        self.by_asset
            .get(&asset.to_uppercase())
            .ok_or_else(|| LedgerError::UnknownAsset(asset.to_string()))
    }

    /// Look up the asset registered under a ledger number.
    pub fn asset_for_ledger(&self, ledger: u32) -> Option<&AssetScale> {
        self.by_ledger
            .get(&ledger)
            .and_then(|asset| self.by_asset.get(asset))
    }

    /// All registered assets, in no particular order.
    pub fn assets(&self) -> impl Iterator<Item = &AssetScale> {
        self.by_asset.values()
    }

    /// Convert an exact decimal amount to integer units of `asset`.
    ///
    /// Fails when the decimal carries more fractional digits than the
    /// asset's scale, or is negative.
    pub fn to_units(&self, asset: &str, amount: Decimal) -> Result<Option<u128>, LedgerError> {
        let scale = self.get(asset)?.scale;
        let scaled = amount * Decimal::from(10u64.pow(scale));
        if scaled.fract() != Decimal::ZERO || scaled.is_sign_negative() {
            return Ok(None);
        }
        Ok(scaled.trunc().to_u128())
    }

    /// Convert integer units of `asset` back to a decimal amount.
    ///
    /// Units beyond Decimal's 96-bit mantissa saturate at `Decimal::MAX`.
    pub fn to_decimal(&self, asset: &str, units: u128) -> Result<Decimal, LedgerError> {
        let scale = self.get(asset)?.scale;
        let mantissa = units.min(i128::MAX as u128) as i128;
        Ok(Decimal::try_from_i128_with_scale(mantissa, scale).unwrap_or(Decimal::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = AssetScaleRegistry::new();
        let btc = registry.register("BTC", 8, false).unwrap();
        let usdc = registry.register("USDC", 6, false).unwrap();
        assert_ne!(btc, usdc);
        assert_eq!(registry.get("btc").unwrap().ledger, btc);
        assert_eq!(registry.asset_for_ledger(usdc).unwrap().asset, "USDC");
    }

    #[test]
    fn test_register_idempotent_same_scale() {
        let mut registry = AssetScaleRegistry::new();
        let first = registry.register("BTC", 8, false).unwrap();
        let second = registry.register("btc", 8, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_frozen_rejects_without_override() {
        let mut registry = AssetScaleRegistry::new();
        registry.register("BTC", 8, false).unwrap();
        registry.freeze();

        assert!(registry.register("ETH", 18, false).is_err());
        // Explicit migration override is allowed per call.
        assert!(registry.register("ETH", 18, true).is_ok());
        assert!(registry.is_frozen());
    }

    #[test]
    fn test_to_units() {
        let mut registry = AssetScaleRegistry::new();
        registry.register("USDC", 6, false).unwrap();

        let units = registry
            .to_units("USDC", Decimal::from_str("12.345678").unwrap())
            .unwrap();
        assert_eq!(units, Some(12_345_678));

        // Over-precise input does not round silently.
        let units = registry
            .to_units("USDC", Decimal::from_str("0.0000001").unwrap())
            .unwrap();
        assert_eq!(units, None);
    }

    #[test]
    fn test_units_decimal_roundtrip() {
        let mut registry = AssetScaleRegistry::new();
        registry.register("BTC", 8, false).unwrap();

        let amount = Decimal::from_str("1.23456789").unwrap();
        let units = registry.to_units("BTC", amount).unwrap().unwrap();
        assert_eq!(units, 123_456_789);
        assert_eq!(registry.to_decimal("BTC", units).unwrap(), amount);
    }
}
