//! Asset Catalog Types
//!
//! Instruments known to the upstream provider. The catalog is how clients
//! discover the instrument ids they query and subscribe to.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::market::{InstrumentId, Provider};

/// One tradable instrument in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Upstream instrument identifier.
    pub instrument_id: InstrumentId,
    /// Ticker symbol (e.g. `"EUR/USD"`).
    pub symbol: String,
    /// Asset class (e.g. `"forex"`).
    pub kind: String,
    /// Human-readable name.
    pub description: String,
    /// Quote currency.
    pub currency: String,
    /// Providers that carry data for this instrument.
    pub providers: Vec<Provider>,
}

/// Assets whose instrument id is not in `known`, first occurrence wins.
#[must_use]
pub fn unseen_assets(known: &HashSet<InstrumentId>, candidates: Vec<Asset>) -> Vec<Asset> {
    let mut seen = known.clone();
    candidates
        .into_iter()
        .filter(|asset| seen.insert(asset.instrument_id))
        .collect()
}
