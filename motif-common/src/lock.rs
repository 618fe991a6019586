//! Advisory locks on derived tables
//!
//! Destructive refresh jobs must not run concurrently against the same derived
//! table. A row in `job_locks` keyed by table name marks the table as taken;
//! a second job trying to claim it fails fast with [`Error::LockHeld`].
//! A job that crashed leaves its row behind; `force_unlock` clears it.

use crate::{Error, Result};
use sqlx::SqlitePool;
use std::future::Future;
use tracing::{debug, warn};
use uuid::Uuid;

/// A held advisory lock on one derived table
#[derive(Debug)]
pub struct TableLock {
    pool: SqlitePool,
    table: String,
    token: String,
}

impl TableLock {
    /// Claim the lock for `table` on behalf of `holder`
    pub async fn acquire(pool: &SqlitePool, table: &str, holder: &str) -> Result<Self> {
        let token = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_locks (table_name, holder, token, acquired_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(table_name) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(holder)
        .bind(&token)
        .execute(pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT holder FROM job_locks WHERE table_name = ?")
                    .bind(table)
                    .fetch_optional(pool)
                    .await?;
            return Err(Error::LockHeld {
                table: table.to_string(),
                holder: current.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        debug!(table, holder, "Acquired table lock");
        Ok(Self {
            pool: pool.clone(),
            table: table.to_string(),
            token,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Release the lock. Only removes the row this lock created.
    pub async fn release(self) -> Result<()> {
        sqlx::query("DELETE FROM job_locks WHERE table_name = ? AND token = ?")
            .bind(&self.table)
            .bind(&self.token)
            .execute(&self.pool)
            .await?;
        debug!(table = %self.table, "Released table lock");
        Ok(())
    }
}

/// Run `job` while holding locks on every table in `tables`.
///
/// Locks are taken in the given order and released whether the job succeeds
/// or fails. If any lock is already held, the ones taken so far are released
/// and the job is not started.
pub async fn with_table_locks<F, Fut, T>(
    pool: &SqlitePool,
    tables: &[&str],
    holder: &str,
    job: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut held = Vec::with_capacity(tables.len());
    for table in tables {
        match TableLock::acquire(pool, table, holder).await {
            Ok(lock) => held.push(lock),
            Err(e) => {
                release_all(held).await;
                return Err(e);
            }
        }
    }

    let result = job().await;
    release_all(held).await;
    result
}

async fn release_all(locks: Vec<TableLock>) {
    for lock in locks.into_iter().rev() {
        let table = lock.table().to_string();
        if let Err(e) = lock.release().await {
            warn!(table = %table, error = %e, "Failed to release table lock");
        }
    }
}

/// Remove a lock regardless of holder. Returns true if a lock was removed.
pub async fn force_unlock(pool: &SqlitePool, table: &str) -> Result<bool> {
    let removed = sqlx::query("DELETE FROM job_locks WHERE table_name = ?")
        .bind(table)
        .execute(pool)
        .await?
        .rows_affected();
    if removed > 0 {
        warn!(table, "Forcibly removed table lock");
    }
    Ok(removed > 0)
}
