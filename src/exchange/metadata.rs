//! Market metadata resolver.
//!
//! Maps ticker symbols to the exchange's positional asset ids and carries the
//! per-asset leverage limits used by the risk analysis.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{info, warn};

use super::client::InfoClient;
use super::error::ExchangeError;
use super::types::UniverseEntry;

/// Used when the universe cannot be loaded.
const FALLBACK_ASSETS: [&str; 3] = ["BTC", "ETH", "ARB"];
const FALLBACK_MAX_LEVERAGE: u32 = 10;

/// One entry of the asset universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    /// Position in the universe enumeration
    pub id: u32,
    pub name: String,
    pub max_leverage: u32,
    pub sz_decimals: u8,
}

/// Leverage allowed once position notional reaches `lower_bound_usd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginTier {
    pub lower_bound_usd: Decimal,
    pub max_leverage: u32,
}

/// Estimated tier table for an asset with the given headline max leverage.
pub fn margin_tiers(max_leverage: u32) -> Vec<MarginTier> {
    let tier = |lower_bound_usd: Decimal, max_leverage: u32| MarginTier {
        lower_bound_usd,
        max_leverage,
    };

    match max_leverage {
        l if l >= 40 => vec![tier(Decimal::ZERO, 40), tier(dec!(50_000_000), 20)],
        l if l >= 25 => vec![tier(Decimal::ZERO, 25), tier(dec!(100_000_000), 15)],
        l if l >= 20 => vec![tier(Decimal::ZERO, 20), tier(dec!(40_000_000), 10)],
        l => vec![tier(Decimal::ZERO, l.max(1))],
    }
}

/// Id↔name lookup over one universe load.
///
/// Names keep the exchange's casing; lookups by name are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct MarketMetadata {
    assets: Vec<AssetMetadata>,
    by_name: HashMap<String, u32>,
    fallback: bool,
}

impl MarketMetadata {
    /// Build from universe entries; ids follow enumeration order.
    ///
    /// A repeated name keeps its first id so the mapping stays a bijection.
    pub fn from_universe(universe: &[UniverseEntry]) -> Self {
        let mut assets = Vec::with_capacity(universe.len());
        let mut by_name = HashMap::with_capacity(universe.len());

        for (idx, entry) in universe.iter().enumerate() {
            let id = idx as u32;
            let lookup = entry.name.to_uppercase();

            if by_name.contains_key(&lookup) {
                warn!(asset = %entry.name, id, "Duplicate asset name in universe, keeping first id");
                continue;
            }

            by_name.insert(lookup, id);
            assets.push(AssetMetadata {
                id,
                name: entry.name.clone(),
                max_leverage: entry.max_leverage,
                sz_decimals: entry.sz_decimals,
            });
        }

        Self {
            assets,
            by_name,
            fallback: false,
        }
    }

    /// Reduced hard-coded universe for when loading fails.
    pub fn fallback() -> Self {
        let assets: Vec<AssetMetadata> = FALLBACK_ASSETS
            .iter()
            .enumerate()
            .map(|(idx, name)| AssetMetadata {
                id: idx as u32,
                name: name.to_string(),
                max_leverage: FALLBACK_MAX_LEVERAGE,
                sz_decimals: 0,
            })
            .collect();
        let by_name = assets.iter().map(|a| (a.name.to_uppercase(), a.id)).collect();

        Self {
            assets,
            by_name,
            fallback: true,
        }
    }

    /// Fetch the universe once and replace the current map wholesale.
    ///
    /// On failure the fallback set is installed and the error is returned so
    /// the caller can report it; lookups keep working either way.
    pub async fn load(&mut self, client: &InfoClient) -> Result<(), ExchangeError> {
        let loaded = client.meta().await.and_then(|meta| {
            if meta.universe.is_empty() {
                Err(ExchangeError::Domain("asset universe is empty".into()))
            } else {
                Ok(Self::from_universe(&meta.universe))
            }
        });

        match loaded {
            Ok(metadata) => {
                info!(assets = metadata.len(), "Market metadata loaded");
                *self = metadata;
                Ok(())
            }
            Err(e) => {
                *self = Self::fallback();
                warn!(
                    error = %e,
                    fallback = ?FALLBACK_ASSETS,
                    "Failed to load market metadata, continuing with fallback assets"
                );
                Err(e)
            }
        }
    }

    /// Asset id for a ticker (case-insensitive).
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(&name.trim().to_uppercase()).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.asset_by_id(id).map(|a| a.name.as_str())
    }

    pub fn asset(&self, name: &str) -> Option<&AssetMetadata> {
        self.id_of(name).and_then(|id| self.asset_by_id(id))
    }

    fn asset_by_id(&self, id: u32) -> Option<&AssetMetadata> {
        // Ids are dense except where duplicates were skipped.
        self.assets
            .get(id as usize)
            .filter(|a| a.id == id)
            .or_else(|| self.assets.iter().find(|a| a.id == id))
    }

    pub fn max_leverage(&self, name: &str) -> Option<u32> {
        self.asset(name).map(|a| a.max_leverage)
    }

    /// Leverage allowed for a position of `notional_usd` under the estimated tiers.
    pub fn max_leverage_for(&self, name: &str, notional_usd: Decimal) -> Option<u32> {
        let tiers = margin_tiers(self.max_leverage(name)?);
        tiers
            .iter()
            .take_while(|t| notional_usd >= t.lower_bound_usd)
            .last()
            .or_else(|| tiers.first())
            .map(|t| t.max_leverage)
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetMetadata> {
        self.assets.iter()
    }
}
