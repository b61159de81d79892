//! SQLite-backed opportunity store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{OpportunityStore, StoreError};
use crate::types::{Opportunity, OpportunityStatus, Side};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS opportunities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market_id TEXT NOT NULL,
        ticker TEXT NOT NULL,
        title TEXT NOT NULL,
        side TEXT NOT NULL,
        score REAL NOT NULL,
        confidence TEXT NOT NULL,
        position_size REAL NOT NULL,
        rationale TEXT NOT NULL,
        breakdown TEXT NOT NULL,
        market TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        executed_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_opportunities_active
        ON opportunities (status, score DESC, created_at DESC);
";

type OpportunityRow = (
    i64,
    String,
    f64,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
);

/// One pooled connection: SQLite serialises writers anyway, and an
/// in-memory database only exists on the connection that created it.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let store = Self::connect(options).await?;
        info!(path = %path.display(), "Opportunity store opened");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("connecting to SQLite")?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("creating schema")?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Closed.into());
        }
        Ok(())
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

fn decode_row(row: OpportunityRow) -> Result<Opportunity> {
    let (id, side, position_size, rationale, breakdown, market, status, created_at, executed_at) =
        row;
    Ok(Opportunity {
        id: Some(id),
        market: serde_json::from_str(&market).context("decoding market")?,
        breakdown: serde_json::from_str(&breakdown).context("decoding breakdown")?,
        side: Side::from_str(&side)?,
        position_size,
        rationale,
        status: OpportunityStatus::from_str(&status)?,
        created_at: parse_timestamp(&created_at)?,
        executed_at: executed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[async_trait]
impl OpportunityStore for SqliteStore {
    async fn store_opportunities(&self, opportunities: Vec<Opportunity>) -> Result<Vec<i64>> {
        self.ensure_open()?;
        if opportunities.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(opportunities.len());
        for opp in &opportunities {
            let result = sqlx::query(
                r"
                INSERT INTO opportunities
                    (market_id, ticker, title, side, score, confidence, position_size,
                     rationale, breakdown, market, status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11)
                ",
            )
            .bind(opp.market.market_id())
            .bind(&opp.market.ticker)
            .bind(&opp.market.title)
            .bind(opp.side.to_string())
            .bind(opp.score())
            .bind(opp.confidence().as_str())
            .bind(opp.position_size)
            .bind(&opp.rationale)
            .bind(serde_json::to_string(&opp.breakdown)?)
            .bind(serde_json::to_string(&opp.market)?)
            .bind(timestamp(opp.created_at))
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }
        tx.commit().await?;

        debug!(count = ids.len(), "Stored opportunities");
        Ok(ids)
    }

    async fn get_active_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>> {
        self.ensure_open()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, OpportunityRow>(
            r"
            SELECT id, side, position_size, rationale, breakdown, market,
                   status, created_at, executed_at
            FROM opportunities
            WHERE status = 'active'
            ORDER BY score DESC, created_at DESC
            LIMIT ?1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_row).collect()
    }

    async fn mark_executed(&self, id: i64) -> Result<()> {
        self.ensure_open()?;
        let result = sqlx::query(
            "UPDATE opportunities SET status = 'executed', executed_at = ?1 \
             WHERE id = ?2 AND status = 'active'",
        )
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(id, "Opportunity marked executed");
            return Ok(());
        }

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT status FROM opportunities WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Err(StoreError::AlreadyExecuted(id).into()),
            None => Err(StoreError::NotFound(id).into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        anyhow::ensure!(one == 1, "unexpected ping result {one}");
        Ok(())
    }
}
