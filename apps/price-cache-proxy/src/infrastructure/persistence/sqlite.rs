//! SQLite bar, coverage and asset store.
//!
//! Timestamps are stored as Unix milliseconds and prices as decimal text so
//! that no precision is lost on the round trip. Asset providers are stored
//! as a JSON array.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::ports::{AssetStore, BarStore, CoverageStore, StoreError};
use crate::domain::asset::Asset;
use crate::domain::coverage::CoverageSet;
use crate::domain::market::{Bar, InstrumentKey, TimeRange};

/// Bars per multi-row insert; keeps bind count well under SQLite limits.
const INSERT_CHUNK: usize = 100;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS price_bars (
    instrument_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    ts INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    PRIMARY KEY (instrument_id, provider, ts)
);

CREATE TABLE IF NOT EXISTS price_coverage (
    instrument_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    start_ts INTEGER NOT NULL,
    end_ts INTEGER NOT NULL,
    PRIMARY KEY (instrument_id, provider, start_ts)
);

CREATE TABLE IF NOT EXISTS price_assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument_id TEXT NOT NULL UNIQUE,
    symbol TEXT NOT NULL,
    kind TEXT NOT NULL,
    description TEXT NOT NULL,
    currency TEXT NOT NULL,
    providers TEXT NOT NULL
);
";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Durable store on a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    ///
    /// Use `max_connections = 1` for `sqlite::memory:` so every query sees
    /// the same database.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the database cannot be
    /// opened, or the schema cannot be applied.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Price store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The schema is not applied.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, StoreError> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).map_err(|e| StoreError::Corrupt(format!("{column}={text}: {e}")))
}

fn parse_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {millis}")))
}

fn bar_from_row(row: &SqliteRow) -> Result<Bar, StoreError> {
    let instrument: String = row.try_get("instrument_id")?;
    Ok(Bar {
        instrument_id: Uuid::parse_str(&instrument)
            .map_err(|e| StoreError::Corrupt(format!("instrument_id={instrument}: {e}")))?,
        provider: row.try_get("provider")?,
        timestamp: parse_millis(row.try_get("ts")?)?,
        open: parse_decimal(row, "open")?,
        high: parse_decimal(row, "high")?,
        low: parse_decimal(row, "low")?,
        close: parse_decimal(row, "close")?,
    })
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset, StoreError> {
    let instrument: String = row.try_get("instrument_id")?;
    let providers: String = row.try_get("providers")?;
    Ok(Asset {
        instrument_id: Uuid::parse_str(&instrument)
            .map_err(|e| StoreError::Corrupt(format!("instrument_id={instrument}: {e}")))?,
        symbol: row.try_get("symbol")?,
        kind: row.try_get("kind")?,
        description: row.try_get("description")?,
        currency: row.try_get("currency")?,
        providers: serde_json::from_str(&providers)
            .map_err(|e| StoreError::Corrupt(format!("providers={providers}: {e}")))?,
    })
}

#[async_trait]
impl BarStore for SqliteStore {
    async fn append(&self, bars: &[Bar]) -> Result<usize, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in bars.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO price_bars (instrument_id, provider, ts, open, high, low, close) ",
            );
            builder.push_values(chunk, |mut row, bar| {
                row.push_bind(bar.instrument_id.to_string())
                    .push_bind(bar.provider.clone())
                    .push_bind(bar.timestamp.timestamp_millis())
                    .push_bind(bar.open.to_string())
                    .push_bind(bar.high.to_string())
                    .push_bind(bar.low.to_string())
                    .push_bind(bar.close.to_string());
            });
            builder.push(" ON CONFLICT (instrument_id, provider, ts) DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(received = bars.len(), inserted, "Bars appended");
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }

    async fn query(
        &self,
        key: &InstrumentKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT instrument_id, provider, ts, open, high, low, close
            FROM price_bars
            WHERE instrument_id = ?1 AND provider = ?2 AND ts >= ?3 AND ts <= ?4
            ORDER BY ts ASC
            ",
        )
        .bind(key.instrument_id.to_string())
        .bind(&key.provider)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(bar_from_row).collect()
    }

    async fn latest(&self, key: &InstrumentKey) -> Result<Option<Bar>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT instrument_id, provider, ts, open, high, low, close
            FROM price_bars
            WHERE instrument_id = ?1 AND provider = ?2
            ORDER BY ts DESC
            LIMIT 1
            ",
        )
        .bind(key.instrument_id.to_string())
        .bind(&key.provider)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(bar_from_row).transpose()
    }
}

#[async_trait]
impl CoverageStore for SqliteStore {
    async fn load_coverage(&self, key: &InstrumentKey) -> Result<CoverageSet, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT start_ts, end_ts
            FROM price_coverage
            WHERE instrument_id = ?1 AND provider = ?2
            ORDER BY start_ts ASC
            ",
        )
        .bind(key.instrument_id.to_string())
        .bind(&key.provider)
        .fetch_all(&self.pool)
        .await?;

        let intervals = rows
            .iter()
            .map(|row| -> Result<TimeRange, StoreError> {
                Ok(TimeRange::new(
                    parse_millis(row.try_get("start_ts")?)?,
                    parse_millis(row.try_get("end_ts")?)?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CoverageSet::from_intervals(intervals))
    }

    async fn save_coverage(
        &self,
        key: &InstrumentKey,
        set: &CoverageSet,
    ) -> Result<(), StoreError> {
        let instrument = key.instrument_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM price_coverage WHERE instrument_id = ?1 AND provider = ?2")
            .bind(&instrument)
            .bind(&key.provider)
            .execute(&mut *tx)
            .await?;

        for interval in set.intervals() {
            sqlx::query(
                r"
                INSERT INTO price_coverage (instrument_id, provider, start_ts, end_ts)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(&instrument)
            .bind(&key.provider)
            .bind(interval.start.timestamp_millis())
            .bind(interval.end.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AssetStore for SqliteStore {
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT instrument_id, symbol, kind, description, currency, providers
            FROM price_assets
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(asset_from_row).collect()
    }

    async fn insert_new_assets(&self, assets: &[Asset]) -> Result<usize, StoreError> {
        if assets.is_empty() {
            return Ok(0);
        }

        let rows = assets
            .iter()
            .map(|asset| {
                serde_json::to_string(&asset.providers)
                    .map(|providers| (asset, providers))
                    .map_err(|e| StoreError::Query(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO price_assets (instrument_id, symbol, kind, description, currency, providers) ",
            );
            builder.push_values(chunk, |mut row, (asset, providers)| {
                row.push_bind(asset.instrument_id.to_string())
                    .push_bind(asset.symbol.clone())
                    .push_bind(asset.kind.clone())
                    .push_bind(asset.description.clone())
                    .push_bind(asset.currency.clone())
                    .push_bind(providers.clone());
            });
            builder.push(" ON CONFLICT (instrument_id) DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        info!(received = assets.len(), inserted, "Assets stored");
        Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
    }
}
