//! PostgreSQL implementation of the submission store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num::BigInt;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::models::{AttemptRow, FilledOrderRow, nonce_from_column, nonce_to_column};
use super::{SubmissionStore, plan_update, require_error_text};
use crate::codec;
use crate::config::LedgerConfig;
use crate::domain::{
    Address, FilledOrder, FilledOrderRecord, Hash, NewAttempt, ResultUpdate, SubmissionAttempt,
    SubmitStatus, UpdateTarget,
};
use crate::error::{LedgerError, Result};

const ATTEMPT_COLUMNS: &str = "id, ring_hash, unique_id, protocol_address, order_count, \
     protocol_data, protocol_gas, protocol_gas_price, protocol_used_gas, protocol_tx_hash, \
     tx_nonce, status, ring_index, block_number, miner, err, create_time";

const FILL_COLUMNS: &str = "id, ring_hash, order_hash, fee_selection, rate_amount_s, \
     available_amount_s, available_amount_b, fill_amount_s, fill_amount_b, lrc_reward, \
     lrc_fee, fee_s, legal_fee, s_price, b_price";

/// PostgreSQL-backed submission store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresSubmissionStore {
    pool: PgPool,
}

impl PostgresSubmissionStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool from `config` and, when enabled, applies
    /// the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the database cannot be
    /// reached and [`LedgerError::Persistence`] if a migration fails.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;

        if config.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("ledger migrations applied");
        }

        tracing::info!(
            max_connections = config.database_max_connections,
            "connected to submission store"
        );
        Ok(Self::new(pool))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_attempts(&self, sql: &str, bind: &str) -> Result<Vec<SubmissionAttempt>> {
        let rows = sqlx::query(sql)
            .bind(bind)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;
        decode_attempts(&rows)
    }
}

fn attempt_row(row: &PgRow) -> std::result::Result<AttemptRow, sqlx::Error> {
    Ok(AttemptRow {
        id: row.try_get("id")?,
        ring_hash: row.try_get("ring_hash")?,
        unique_id: row.try_get("unique_id")?,
        protocol_address: row.try_get("protocol_address")?,
        order_count: row.try_get("order_count")?,
        protocol_data: row.try_get("protocol_data")?,
        protocol_gas: row.try_get("protocol_gas")?,
        protocol_gas_price: row.try_get("protocol_gas_price")?,
        protocol_used_gas: row.try_get("protocol_used_gas")?,
        protocol_tx_hash: row.try_get("protocol_tx_hash")?,
        tx_nonce: row.try_get("tx_nonce")?,
        status: row.try_get("status")?,
        ring_index: row.try_get("ring_index")?,
        block_number: row.try_get("block_number")?,
        miner: row.try_get("miner")?,
        err: row.try_get("err")?,
        create_time: row.try_get("create_time")?,
    })
}

fn fill_row(row: &PgRow) -> std::result::Result<FilledOrderRow, sqlx::Error> {
    Ok(FilledOrderRow {
        id: row.try_get("id")?,
        ring_hash: row.try_get("ring_hash")?,
        order_hash: row.try_get("order_hash")?,
        fee_selection: row.try_get("fee_selection")?,
        rate_amount_s: row.try_get("rate_amount_s")?,
        available_amount_s: row.try_get("available_amount_s")?,
        available_amount_b: row.try_get("available_amount_b")?,
        fill_amount_s: row.try_get("fill_amount_s")?,
        fill_amount_b: row.try_get("fill_amount_b")?,
        lrc_reward: row.try_get("lrc_reward")?,
        lrc_fee: row.try_get("lrc_fee")?,
        fee_s: row.try_get("fee_s")?,
        legal_fee: row.try_get("legal_fee")?,
        s_price: row.try_get("s_price")?,
        b_price: row.try_get("b_price")?,
    })
}

fn decode_attempt(row: &PgRow) -> Result<SubmissionAttempt> {
    let row = attempt_row(row).map_err(|e| LedgerError::from_sqlx(e, None))?;
    SubmissionAttempt::try_from(row)
}

fn decode_attempts(rows: &[PgRow]) -> Result<Vec<SubmissionAttempt>> {
    rows.iter().map(decode_attempt).collect()
}

#[async_trait]
impl SubmissionStore for PostgresSubmissionStore {
    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<SubmissionAttempt> {
        let row = AttemptRow::from_new(attempt, Utc::now())?;
        let sql = format!(
            "INSERT INTO ring_submit_attempts (ring_hash, unique_id, protocol_address, \
             order_count, protocol_data, protocol_gas, protocol_gas_price, protocol_used_gas, \
             protocol_tx_hash, tx_nonce, status, ring_index, block_number, miner, err) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {ATTEMPT_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(&row.ring_hash)
            .bind(&row.unique_id)
            .bind(&row.protocol_address)
            .bind(row.order_count)
            .bind(&row.protocol_data)
            .bind(&row.protocol_gas)
            .bind(&row.protocol_gas_price)
            .bind(&row.protocol_used_gas)
            .bind(&row.protocol_tx_hash)
            .bind(row.tx_nonce)
            .bind(row.status)
            .bind(&row.ring_index)
            .bind(&row.block_number)
            .bind(&row.miner)
            .bind(&row.err)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::from_sqlx(e, Some((row.miner.as_str(), attempt.tx_nonce)))
            })?;
        decode_attempt(&inserted)
    }

    async fn attempt_by_id(&self, id: i64) -> Result<SubmissionAttempt> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM ring_submit_attempts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?
            .ok_or_else(|| LedgerError::NotFound(format!("attempt {id}")))?;
        decode_attempt(&row)
    }

    async fn attempt_by_ring_hash(&self, ring_hash: &Hash) -> Result<SubmissionAttempt> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM ring_submit_attempts WHERE ring_hash = $1 \
             ORDER BY id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(ring_hash.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?
            .ok_or_else(|| LedgerError::NotFound(format!("ring {ring_hash}")))?;
        decode_attempt(&row)
    }

    async fn attempts_by_ring_hash(&self, ring_hash: &Hash) -> Result<Vec<SubmissionAttempt>> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM ring_submit_attempts WHERE ring_hash = $1 \
             ORDER BY id ASC"
        );
        self.fetch_attempts(&sql, &ring_hash.to_hex()).await
    }

    async fn attempts_by_tx_hash(&self, tx_hash: &Hash) -> Result<Vec<SubmissionAttempt>> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM ring_submit_attempts WHERE protocol_tx_hash = $1 \
             ORDER BY id ASC"
        );
        self.fetch_attempts(&sql, &tx_hash.to_hex()).await
    }

    async fn update_result(&self, update: &ResultUpdate) -> Result<u64> {
        let nonce = update.nonce_to_apply().map(nonce_to_column).transpose()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;

        let locked: Vec<(i64, i32, String)> = match update.target {
            UpdateTarget::Id(id) => {
                sqlx::query_as(
                    "SELECT id, status, miner FROM ring_submit_attempts WHERE id = $1 FOR UPDATE",
                )
                .bind(id)
                .fetch_all(&mut *tx)
                .await
            }
            UpdateTarget::RingTx { ring_hash, tx_hash } => {
                sqlx::query_as(
                    "SELECT id, status, miner FROM ring_submit_attempts \
                     WHERE ring_hash = $1 AND protocol_tx_hash = $2 ORDER BY id FOR UPDATE",
                )
                .bind(ring_hash.to_hex())
                .bind(tx_hash.to_hex())
                .fetch_all(&mut *tx)
                .await
            }
        }
        .map_err(|e| LedgerError::from_sqlx(e, None))?;

        let matched = locked
            .iter()
            .map(|(id, status, _)| {
                SubmitStatus::from_code(*status)
                    .map(|s| (*id, s))
                    .map_err(|e| LedgerError::corrupt("status", e))
            })
            .collect::<Result<Vec<_>>>()?;
        let writes = plan_update(&matched, update)?;
        if writes.is_empty() {
            return Ok(0);
        }

        let miner = locked
            .first()
            .map(|(_, _, miner)| miner.as_str())
            .unwrap_or_default();
        let result = sqlx::query(
            "UPDATE ring_submit_attempts SET status = $1, ring_index = $2, block_number = $3, \
             protocol_used_gas = $4, protocol_tx_hash = COALESCE($5, protocol_tx_hash), \
             err = $6, tx_nonce = COALESCE($7, tx_nonce) WHERE id = ANY($8)",
        )
        .bind(update.status.code())
        .bind(codec::encode(update.ring_index.as_ref()))
        .bind(codec::encode(update.block_number.as_ref()))
        .bind(codec::encode(update.used_gas.as_ref()))
        .bind(update.tx_hash.map(|h| h.to_hex()))
        .bind(&update.error)
        .bind(nonce)
        .bind(&writes)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, Some((miner, update.tx_nonce))))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;
        Ok(result.rows_affected())
    }

    async fn update_used_gas(&self, tx_hash: &Hash, used_gas: &BigInt) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE ring_submit_attempts SET protocol_used_gas = $1 WHERE protocol_tx_hash = $2",
        )
        .bind(codec::encode(Some(used_gas)))
        .bind(tx_hash.to_hex())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, None))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("tx {tx_hash}")));
        }
        Ok(result.rows_affected())
    }

    async fn update_error(&self, id: i64, error: &str) -> Result<()> {
        require_error_text(id, error)?;
        let result = sqlx::query("UPDATE ring_submit_attempts SET err = $1 WHERE id = $2")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("attempt {id}")));
        }
        Ok(())
    }

    async fn has_resubmitted(
        &self,
        after: DateTime<Utc>,
        miner: &Address,
        nonce: u64,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM ring_submit_attempts \
             WHERE miner = $1 AND tx_nonce = $2 AND create_time > $3)",
        )
        .bind(miner.to_hex())
        .bind(nonce_to_column(nonce)?)
        .bind(after)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, None))
    }

    async fn pending_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<SubmissionAttempt>> {
        let blocking: Vec<i32> = SubmitStatus::BLOCKING.iter().map(|s| s.code()).collect();
        let sql = format!(
            "WITH blocked AS ( \
                 SELECT miner, MAX(tx_nonce) AS blocked_nonce FROM ring_submit_attempts \
                 WHERE status = ANY($2) GROUP BY miner \
             ) \
             SELECT {cols} FROM ring_submit_attempts AS infos \
             LEFT JOIN blocked ON blocked.miner = infos.miner \
             WHERE infos.status = $1 AND infos.create_time < $3 \
               AND (blocked.blocked_nonce IS NULL OR infos.tx_nonce > blocked.blocked_nonce) \
             ORDER BY infos.miner, infos.tx_nonce, infos.id",
            cols = qualified("infos", ATTEMPT_COLUMNS)
        );
        let rows = sqlx::query(&sql)
            .bind(SubmitStatus::Pending.code())
            .bind(&blocking)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;
        decode_attempts(&rows)
    }

    async fn max_nonce(&self, miner: &Address) -> Result<Option<u64>> {
        sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(tx_nonce) FROM ring_submit_attempts WHERE miner = $1",
        )
        .bind(miner.to_hex())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, None))?
        .map(nonce_from_column)
        .transpose()
    }

    async fn insert_filled_orders(
        &self,
        ring_hash: &Hash,
        fills: &[FilledOrder],
    ) -> Result<Vec<i64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;

        let known = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM ring_submit_attempts WHERE ring_hash = $1)",
        )
        .bind(ring_hash.to_hex())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::from_sqlx(e, None))?;
        if !known {
            return Err(LedgerError::NotFound(format!("ring {ring_hash}")));
        }

        let mut ids = Vec::with_capacity(fills.len());
        for fill in fills {
            let row = FilledOrderRow::from_fill(ring_hash, fill);
            let id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO filled_orders (ring_hash, order_hash, fee_selection, rate_amount_s, \
                 available_amount_s, available_amount_b, fill_amount_s, fill_amount_b, \
                 lrc_reward, lrc_fee, fee_s, legal_fee, s_price, b_price) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                 RETURNING id",
            )
            .bind(&row.ring_hash)
            .bind(&row.order_hash)
            .bind(row.fee_selection)
            .bind(&row.rate_amount_s)
            .bind(&row.available_amount_s)
            .bind(&row.available_amount_b)
            .bind(&row.fill_amount_s)
            .bind(&row.fill_amount_b)
            .bind(&row.lrc_reward)
            .bind(&row.lrc_fee)
            .bind(&row.fee_s)
            .bind(&row.legal_fee)
            .bind(&row.s_price)
            .bind(&row.b_price)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;
            ids.push(id);
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;
        Ok(ids)
    }

    async fn filled_orders_by_ring_hash(
        &self,
        ring_hash: &Hash,
    ) -> Result<Vec<FilledOrderRecord>> {
        let sql =
            format!("SELECT {FILL_COLUMNS} FROM filled_orders WHERE ring_hash = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(ring_hash.to_hex())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::from_sqlx(e, None))?;

        rows.iter()
            .map(|row| {
                let row = fill_row(row).map_err(|e| LedgerError::from_sqlx(e, None))?;
                FilledOrderRecord::try_from(row)
            })
            .collect()
    }
}

/// Prefixes every column of a comma-separated list with `alias.`.
fn qualified(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|col| format!("{alias}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
