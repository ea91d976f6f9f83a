//! PostgreSQL Tick Repository
//!
//! Each tick is inserted in its own transaction. The schema lives in
//! `migrations/` and is applied with `sqlx::migrate!`; on TimescaleDB the
//! `market_data` table becomes a hypertable partitioned on `time`.
//!
//! Minute bars use `time_bucket` when the `timescaledb` extension is
//! installed and `date_trunc` otherwise; both yield the same buckets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::ports::{PersistenceError, TickQueryPort, TickRepositoryPort};
use crate::domain::bar::MinuteBar;
use crate::domain::tick::Tick;

const INSERT_TICK: &str = r"
    INSERT INTO market_data (
        id, tick_id, type, sequence, product_id, price, open_24h, volume_24h,
        low_24h, high_24h, volume_30d, best_bid, best_ask, best_bid_size,
        best_ask_size, side, time, trade_id, last_size, source, created_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
        $15, $16, $17, $18, $19, $20, $21
    )
";

macro_rules! select_ticks {
    ($tail:literal) => {
        concat!(
            "SELECT id, tick_id, type, sequence, product_id, price, open_24h, volume_24h, ",
            "low_24h, high_24h, volume_30d, best_bid, best_ask, best_bid_size, ",
            "best_ask_size, side, time, trade_id, last_size, source, created_at ",
            "FROM market_data ",
            $tail
        )
    };
}

macro_rules! minute_bars {
    ($bucket:literal) => {
        concat!(
            "SELECT ", $bucket, " AS bucket, AVG(price) AS avg_price, ",
            "MAX(price) AS max_price, MIN(price) AS min_price, ",
            "SUM(volume_24h) AS total_volume, COUNT(*) AS ticks ",
            "FROM market_data WHERE product_id = $1 AND time >= $2 ",
            "GROUP BY bucket ORDER BY bucket DESC"
        )
    };
}

const LATEST_TICK: &str = select_ticks!("WHERE product_id = $1 ORDER BY time DESC LIMIT 1");
const TICKS_BETWEEN: &str =
    select_ticks!("WHERE product_id = $1 AND time BETWEEN $2 AND $3 ORDER BY time DESC");
const RECENT_TICKS: &str =
    select_ticks!("WHERE product_id = $1 AND time >= $2 ORDER BY time DESC LIMIT $3");
const MINUTE_BARS_TIMESCALE: &str = minute_bars!("time_bucket('1 minute', time)");
const MINUTE_BARS_PORTABLE: &str = minute_bars!("date_trunc('minute', time)");

const HAS_TIMESCALE: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'timescaledb')";

/// How minute buckets are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    /// TimescaleDB `time_bucket`.
    TimeBucket,
    /// Plain PostgreSQL `date_trunc`.
    DateTrunc,
}

impl Bucketing {
    const fn minute_bars_sql(self) -> &'static str {
        match self {
            Self::TimeBucket => MINUTE_BARS_TIMESCALE,
            Self::DateTrunc => MINUTE_BARS_PORTABLE,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TickRow {
    id: Uuid,
    tick_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    kind: Option<String>,
    sequence: Option<i64>,
    product_id: String,
    price: Option<Decimal>,
    open_24h: Option<Decimal>,
    volume_24h: Option<Decimal>,
    low_24h: Option<Decimal>,
    high_24h: Option<Decimal>,
    volume_30d: Option<Decimal>,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    best_bid_size: Option<Decimal>,
    best_ask_size: Option<Decimal>,
    side: Option<String>,
    time: DateTime<Utc>,
    trade_id: Option<i64>,
    last_size: Option<Decimal>,
    source: String,
    created_at: DateTime<Utc>,
}

impl From<TickRow> for Tick {
    fn from(row: TickRow) -> Self {
        Self {
            id: row.id,
            tick_id: row.tick_id,
            kind: row.kind,
            sequence: row.sequence,
            product_id: row.product_id,
            price: row.price,
            open_24h: row.open_24h,
            volume_24h: row.volume_24h,
            low_24h: row.low_24h,
            high_24h: row.high_24h,
            volume_30d: row.volume_30d,
            best_bid: row.best_bid,
            best_ask: row.best_ask,
            best_bid_size: row.best_bid_size,
            best_ask_size: row.best_ask_size,
            side: row.side,
            time: row.time,
            trade_id: row.trade_id,
            last_size: row.last_size,
            source: row.source,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MinuteBarRow {
    bucket: DateTime<Utc>,
    avg_price: Option<Decimal>,
    max_price: Option<Decimal>,
    min_price: Option<Decimal>,
    total_volume: Option<Decimal>,
    ticks: i64,
}

impl From<MinuteBarRow> for MinuteBar {
    fn from(row: MinuteBarRow) -> Self {
        Self {
            bucket: row.bucket,
            avg_price: row.avg_price,
            max_price: row.max_price,
            min_price: row.min_price,
            total_volume: row.total_volume,
            ticks: row.ticks,
        }
    }
}

/// Database connection settings.
#[derive(Clone)]
pub struct DatabaseSettings {
    /// Connection string.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Apply pending migrations at startup.
    pub run_migrations: bool,
}

impl DatabaseSettings {
    /// Default pool settings for `url`.
    #[must_use]
    pub const fn new(url: String) -> Self {
        Self {
            url,
            max_connections: 10,
            run_migrations: true,
        }
    }

    /// The connection string with any password masked.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:[REDACTED]@{host}"),
            None => self.url.clone(),
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.redacted_url())
            .field("max_connections", &self.max_connections)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

/// Tick repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgTickRepository {
    pool: PgPool,
    bucketing: Bucketing,
}

impl PgTickRepository {
    /// Connect a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        let bucketing = detect_bucketing(&pool).await;

        info!(
            max_connections = settings.max_connections,
            url = %settings.redacted_url(),
            ?bucketing,
            "PostgreSQL connection pool initialized"
        );

        Ok(Self { pool, bucketing })
    }

    /// Wrap an existing pool. Minute bars use `date_trunc`.
    #[must_use]
    pub const fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            bucketing: Bucketing::DateTrunc,
        }
    }

    /// Minute bucketing in use.
    #[must_use]
    pub const fn bucketing(&self) -> Bucketing {
        self.bucketing
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::Migration(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl TickRepositoryPort for PgTickRepository {
    async fn insert(&self, tick: &Tick) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(INSERT_TICK)
            .bind(tick.id)
            .bind(tick.tick_id)
            .bind(tick.kind.as_deref())
            .bind(tick.sequence)
            .bind(&tick.product_id)
            .bind(tick.price)
            .bind(tick.open_24h)
            .bind(tick.volume_24h)
            .bind(tick.low_24h)
            .bind(tick.high_24h)
            .bind(tick.volume_30d)
            .bind(tick.best_bid)
            .bind(tick.best_ask)
            .bind(tick.best_bid_size)
            .bind(tick.best_ask_size)
            .bind(tick.side.as_deref())
            .bind(tick.time)
            .bind(tick.trade_id)
            .bind(tick.last_size)
            .bind(&tick.source)
            .bind(tick.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl TickQueryPort for PgTickRepository {
    async fn latest(&self, product_id: &str) -> Result<Option<Tick>, PersistenceError> {
        let row = sqlx::query_as::<_, TickRow>(LATEST_TICK)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Tick::from))
    }

    async fn between(
        &self,
        product_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, PersistenceError> {
        let rows = sqlx::query_as::<_, TickRow>(TICKS_BETWEEN)
            .bind(product_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Tick::from).collect())
    }

    async fn recent(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Tick>, PersistenceError> {
        let rows = sqlx::query_as::<_, TickRow>(RECENT_TICKS)
            .bind(product_id)
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Tick::from).collect())
    }

    async fn minute_bars(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MinuteBar>, PersistenceError> {
        let rows = sqlx::query_as::<_, MinuteBarRow>(self.bucketing.minute_bars_sql())
            .bind(product_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(MinuteBar::from).collect())
    }
}

async fn detect_bucketing(pool: &PgPool) -> Bucketing {
    match sqlx::query_scalar::<_, bool>(HAS_TIMESCALE).fetch_one(pool).await {
        Ok(true) => Bucketing::TimeBucket,
        Ok(false) => Bucketing::DateTrunc,
        Err(e) => {
            warn!(error = %e, "Could not check for TimescaleDB, using date_trunc");
            Bucketing::DateTrunc
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => PersistenceError::Connection(err.to_string()),
        other => PersistenceError::Query(other.to_string()),
    }
}
