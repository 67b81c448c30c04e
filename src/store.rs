//! Position store
//!
//! One row per strategy with the optimizer's last decision. Rows are created
//! on the first optimizer run, rewritten with compare-and-swap on
//! `last_updated`, and never deleted.

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{eyre, Result, WrapErr};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::CompounderError;
use crate::types::{Position, Split};

const CREATE_POSITIONS: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    strategy      TEXT PRIMARY KEY NOT NULL,
    split_mtoken  INTEGER NOT NULL,
    split_vault   INTEGER NOT NULL,
    strategy_type TEXT,
    apy           TEXT NOT NULL,
    last_updated  TEXT NOT NULL
)
"#;

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get(&self, strategy: Address) -> Result<Option<Position>>;

    /// Fails with `PositionConflict` if a row already exists.
    async fn insert(&self, position: &Position) -> Result<()>;

    /// Overwrite the row only if it still carries `expected_last_updated`;
    /// otherwise fails with `PositionConflict`.
    async fn update(&self, position: &Position, expected_last_updated: DateTime<Utc>) -> Result<()>;
}

#[derive(Clone)]
pub struct SqlitePositionStore {
    pool: Pool<Sqlite>,
}

impl SqlitePositionStore {
    /// Open (creating if needed) the database and make sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .wrap_err_with(|| format!("invalid DATABASE_URL {}", database_url))?
            .create_if_missing(true);

        // Each in-memory connection is its own database
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(std::time::Duration::from_secs(1800)) })
            .connect_with(options)
            .await
            .wrap_err("position store unreachable")?;

        sqlx::query(CREATE_POSITIONS)
            .execute(&pool)
            .await
            .wrap_err("failed to create positions table")?;

        info!("position store ready");
        Ok(Self { pool })
    }
}

fn key(strategy: &Address) -> String {
    strategy.to_string().to_lowercase()
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    let strategy: String = row.try_get("strategy")?;
    let mtoken: i64 = row.try_get("split_mtoken")?;
    let vault: i64 = row.try_get("split_vault")?;
    let apy: String = row.try_get("apy")?;
    let last_updated: String = row.try_get("last_updated")?;

    Ok(Position {
        strategy: Address::from_str(&strategy)?,
        split: Split::new(
            u32::try_from(mtoken).map_err(|_| eyre!("split_mtoken out of range: {}", mtoken))?,
            u32::try_from(vault).map_err(|_| eyre!("split_vault out of range: {}", vault))?,
        ),
        strategy_type: row.try_get("strategy_type")?,
        apy: Decimal::from_str(&apy).wrap_err("stored apy is not a decimal")?,
        last_updated: DateTime::parse_from_rfc3339(&last_updated)?.with_timezone(&Utc),
    })
}

#[async_trait]
impl PositionStore for SqlitePositionStore {
    async fn get(&self, strategy: Address) -> Result<Option<Position>> {
        let row = sqlx::query(
            "SELECT strategy, split_mtoken, split_vault, strategy_type, apy, last_updated \
             FROM positions WHERE strategy = ?",
        )
        .bind(key(&strategy))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn insert(&self, position: &Position) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO positions (strategy, split_mtoken, split_vault, strategy_type, apy, last_updated) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(strategy) DO NOTHING",
        )
        .bind(key(&position.strategy))
        .bind(i64::from(position.split.mtoken))
        .bind(i64::from(position.split.vault))
        .bind(position.strategy_type.as_deref())
        .bind(position.apy.to_string())
        .bind(timestamp(&position.last_updated))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CompounderError::PositionConflict(position.strategy).into());
        }
        debug!(strategy = %position.strategy, split = %position.split, "position inserted");
        Ok(())
    }

    async fn update(&self, position: &Position, expected_last_updated: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE positions SET split_mtoken = ?, split_vault = ?, strategy_type = ?, apy = ?, last_updated = ? \
             WHERE strategy = ? AND last_updated = ?",
        )
        .bind(i64::from(position.split.mtoken))
        .bind(i64::from(position.split.vault))
        .bind(position.strategy_type.as_deref())
        .bind(position.apy.to_string())
        .bind(timestamp(&position.last_updated))
        .bind(key(&position.strategy))
        .bind(timestamp(&expected_last_updated))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CompounderError::PositionConflict(position.strategy).into());
        }
        debug!(strategy = %position.strategy, split = %position.split, apy = %position.apy, "position updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use rust_decimal_macros::dec;

    fn position(split: Split, apy: Decimal) -> Position {
        Position {
            strategy: Address::repeat_byte(0x31),
            split,
            strategy_type: Some("USDC".into()),
            apy,
            last_updated: Utc::now().trunc_subsecs(6),
        }
    }

    async fn store() -> SqlitePositionStore {
        SqlitePositionStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store().await;
        assert!(store.get(Address::repeat_byte(0x31)).await.unwrap().is_none());

        let p = position(Split::new(4_000, 6_000), dec!(4.25));
        store.insert(&p).await.unwrap();

        let loaded = store.get(p.strategy).await.unwrap().unwrap();
        assert_eq!(loaded, p);
    }

    #[tokio::test]
    async fn test_double_insert_conflicts() {
        let store = store().await;
        let p = position(Split::new(0, 10_000), dec!(5));
        store.insert(&p).await.unwrap();

        let err = store.insert(&p).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompounderError>(),
            Some(CompounderError::PositionConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = store().await;
        let original = position(Split::new(0, 10_000), dec!(5.0));
        store.insert(&original).await.unwrap();

        let next = Position {
            apy: dec!(6.3),
            last_updated: original.last_updated + Duration::seconds(60),
            ..original.clone()
        };
        store.update(&next, original.last_updated).await.unwrap();
        assert_eq!(store.get(original.strategy).await.unwrap().unwrap().apy, dec!(6.3));

        // A writer holding the old timestamp loses
        let stale = Position { apy: dec!(1), ..original.clone() };
        let err = store.update(&stale, original.last_updated).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompounderError>(),
            Some(CompounderError::PositionConflict(_))
        ));
        assert_eq!(store.get(original.strategy).await.unwrap().unwrap().apy, dec!(6.3));
    }

    #[tokio::test]
    async fn test_update_of_missing_row_conflicts() {
        let store = store().await;
        let p = position(Split::new(5_000, 5_000), dec!(3));
        assert!(store.update(&p, p.last_updated).await.is_err());
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let store = store().await;
        sqlx::query(CREATE_POSITIONS).execute(&store.pool).await.unwrap();
    }
}
