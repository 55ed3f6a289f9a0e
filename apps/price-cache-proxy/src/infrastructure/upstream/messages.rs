//! Upstream Wire Types
//!
//! JSON shapes exchanged with the upstream market data provider.
//!
//! # REST
//!
//! Bar endpoints answer `{"data": [{"t", "o", "h", "l", "c", "v"}, ...]}`.
//! The instrument endpoint answers `{"data": [...], "paging": {"page", "pages", "items"}}`;
//! the providers of an instrument are the keys of its `mappings` object.
//!
//! # Live stream
//!
//! - Outbound: `l1-subscription` frames, one per instrument.
//! - Inbound: tick documents carrying an `instrumentId`; they are relayed
//!   to clients verbatim, so only the id is ever decoded.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::application::ports::{InstrumentPage, UpstreamSubscription};
use crate::domain::asset::Asset;
use crate::domain::market::{Bar, InstrumentId, InstrumentKey};

/// Query-string timestamp format accepted by the bar endpoints.
pub const QUERY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// =============================================================================
// REST: Bars
// =============================================================================

/// Bar endpoint response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BarsResponse {
    /// Bars, in upstream order.
    #[serde(default)]
    pub data: Vec<WireBar>,
}

/// One bar as sent by upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireBar {
    /// Bar open time.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub t: DateTime<Utc>,
    /// Open.
    pub o: Decimal,
    /// High.
    pub h: Decimal,
    /// Low.
    pub l: Decimal,
    /// Close.
    pub c: Decimal,
    /// Volume, not cached.
    #[serde(default)]
    pub v: Option<Decimal>,
}

impl WireBar {
    /// Attach the cache key to produce a domain bar.
    #[must_use]
    pub fn into_bar(self, key: &InstrumentKey) -> Bar {
        Bar {
            instrument_id: key.instrument_id,
            provider: key.provider.clone(),
            timestamp: self.t,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
        }
    }
}

/// Accept RFC 3339 timestamps as well as offset-less ones, read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Parse an upstream timestamp.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

// =============================================================================
// REST: Instruments
// =============================================================================

/// Instrument endpoint response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentsResponse {
    /// Instruments on this page.
    #[serde(default)]
    pub data: Vec<WireInstrument>,
    /// Page position.
    #[serde(default)]
    pub paging: Paging,
}

/// Paging block of the instrument endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Paging {
    /// Current page, 1-based.
    #[serde(default)]
    pub page: u32,
    /// Total pages.
    #[serde(default)]
    pub pages: u32,
    /// Total instruments.
    #[serde(default)]
    pub items: u32,
}

/// One instrument as sent by upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct WireInstrument {
    /// Instrument id.
    pub id: InstrumentId,
    /// Ticker symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Asset class.
    #[serde(default)]
    pub kind: Option<String>,
    /// Human-readable name.
    #[serde(default)]
    pub description: Option<String>,
    /// Quote currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Provider-specific symbol mappings, keyed by provider.
    #[serde(default)]
    pub mappings: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<WireInstrument> for Asset {
    fn from(wire: WireInstrument) -> Self {
        Self {
            instrument_id: wire.id,
            symbol: wire.symbol.unwrap_or_default(),
            kind: wire.kind.unwrap_or_default(),
            description: wire.description.unwrap_or_default(),
            currency: wire.currency.unwrap_or_default(),
            providers: wire
                .mappings
                .map(|mappings| mappings.into_iter().map(|(provider, _)| provider).collect())
                .unwrap_or_default(),
        }
    }
}

impl InstrumentsResponse {
    /// Convert to a catalog page; `requested` fills in a missing page number.
    #[must_use]
    pub fn into_page(self, requested: u32) -> InstrumentPage {
        InstrumentPage {
            assets: self.data.into_iter().map(Asset::from).collect(),
            page: if self.paging.page == 0 {
                requested
            } else {
                self.paging.page
            },
            pages: self.paging.pages,
        }
    }
}

// =============================================================================
// Stream: Subscription Frames
// =============================================================================

/// Outbound live subscription frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFrame {
    /// Always `l1-subscription`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Request id, fresh per frame.
    pub id: Uuid,
    /// Instrument to stream.
    pub instrument_id: InstrumentId,
    /// Data provider.
    pub provider: String,
    /// Always `true`; upstream unsubscribes are never sent.
    pub subscribe: bool,
    /// Tick kinds.
    pub kinds: Vec<String>,
}

impl SubscribeFrame {
    /// Frame type tag.
    pub const TYPE: &'static str = "l1-subscription";

    /// Build a frame for `subscription` with a fresh request id.
    #[must_use]
    pub fn new(subscription: &UpstreamSubscription) -> Self {
        Self {
            kind: Self::TYPE,
            id: Uuid::new_v4(),
            instrument_id: subscription.instrument_id,
            provider: subscription.provider.clone(),
            subscribe: true,
            kinds: subscription.kinds.clone(),
        }
    }

    /// Serialize to the text sent on the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Stream: Inbound Ticks
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickEnvelope {
    instrument_id: Option<serde_json::Value>,
}

/// Instrument id of an inbound tick, if it carries a valid one.
#[must_use]
pub fn tick_instrument_id(text: &str) -> Option<InstrumentId> {
    let envelope: TickEnvelope = serde_json::from_str(text).ok()?;
    match envelope.instrument_id? {
        serde_json::Value::String(id) => Uuid::parse_str(&id).ok().filter(|id| !id.is_nil()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bars_response_parses_numbers_and_strings() {
        let json = r#"{"data":[
            {"t":"2024-03-01T10:00:00Z","o":1.0851,"h":"1.0872","l":1.0840,"c":1.0866,"v":1200},
            {"t":"2024-03-01T11:00:00","o":1,"h":2,"l":0.5,"c":1.5}
        ]}"#;

        let response: BarsResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].h, Decimal::new(10872, 4));
        assert_eq!(
            response.data[1].t,
            Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap()
        );
        assert!(response.data[1].v.is_none());
    }

    #[test]
    fn missing_data_is_empty() {
        let response: BarsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.data.is_empty());
    }

    #[test]
    fn wire_bar_takes_key() {
        let wire = WireBar {
            t: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            o: Decimal::ONE,
            h: Decimal::TWO,
            l: Decimal::ZERO,
            c: Decimal::ONE,
            v: None,
        };
        let key = InstrumentKey::new(Uuid::from_u128(9), "oanda");

        let bar = wire.into_bar(&key);

        assert_eq!(bar.key(), key);
        assert_eq!(bar.high, Decimal::TWO);
    }

    #[test]
    fn offset_timestamps_normalize_to_utc() {
        assert_eq!(
            parse_timestamp("2024-03-01T12:00:00+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn instruments_response_maps_providers() {
        let json = r#"{
            "paging": {"page": 2, "pages": 3, "items": 250},
            "data": [
                {"id": "ad9e5345-4c3b-41fc-9437-1d253f62db52", "symbol": "EUR/USD",
                 "kind": "forex", "description": "Euro vs US Dollar", "currency": "USD",
                 "mappings": {"oanda": {"symbol": "EUR_USD"}, "simulation": {"symbol": "EURUSD"}}},
                {"id": "b2f3c8c5-0f4d-4d4e-9b62-6d2f2fb0d4a1", "symbol": "XAU/USD",
                 "kind": "metal", "description": null, "currency": "USD"}
            ]
        }"#;

        let page = serde_json::from_str::<InstrumentsResponse>(json)
            .unwrap()
            .into_page(2);

        assert_eq!((page.page, page.pages), (2, 3));
        assert_eq!(page.assets.len(), 2);
        assert_eq!(page.assets[0].symbol, "EUR/USD");
        assert_eq!(page.assets[0].providers, ["oanda", "simulation"]);
        assert!(page.assets[1].providers.is_empty());
        assert_eq!(page.assets[1].description, "");
    }

    #[test]
    fn missing_paging_keeps_requested_page() {
        let page = serde_json::from_str::<InstrumentsResponse>(r#"{"data": []}"#)
            .unwrap()
            .into_page(4);

        assert_eq!((page.page, page.pages), (4, 0));
    }

    #[test]
    fn subscribe_frame_shape() {
        let subscription = UpstreamSubscription {
            instrument_id: Uuid::from_u128(1),
            provider: "oanda".to_string(),
            kinds: vec!["bid".to_string(), "ask".to_string()],
        };

        let value: serde_json::Value =
            serde_json::from_str(&SubscribeFrame::new(&subscription).to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "l1-subscription");
        assert_eq!(value["instrumentId"], Uuid::from_u128(1).to_string());
        assert_eq!(value["provider"], "oanda");
        assert_eq!(value["subscribe"], true);
        assert_eq!(value["kinds"], serde_json::json!(["bid", "ask"]));
        assert!(Uuid::parse_str(value["id"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn tick_instrument_extraction() {
        let id = Uuid::from_u128(77);
        assert_eq!(
            tick_instrument_id(&format!(r#"{{"instrumentId":"{id}","bid":{{"price":1.1}}}}"#)),
            Some(id)
        );
        assert_eq!(tick_instrument_id(r#"{"type":"heartbeat"}"#), None);
        assert_eq!(tick_instrument_id(r#"{"instrumentId":42}"#), None);
        assert_eq!(tick_instrument_id(r#"{"instrumentId":"not-a-uuid"}"#), None);
        assert_eq!(tick_instrument_id("[1,2,3]"), None);
        assert_eq!(
            tick_instrument_id(&format!(r#"{{"instrumentId":"{}"}}"#, Uuid::nil())),
            None
        );
    }
}
