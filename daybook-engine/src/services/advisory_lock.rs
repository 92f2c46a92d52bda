//! Non-blocking advisory lock keyed by run
//!
//! SQLite has no session advisory locks, so a row in `advisory_locks` stands
//! in for one: a conflict-free insert acquires, a holder-matched delete
//! releases. Every process sharing the database file sees the same rows.
//! Acquisition is try-once: a live lock is reported as `TickInProgress`
//! immediately and never waited on. A row older than `stale_after` belongs to
//! a crashed holder and is taken over.

use crate::db::format_ts;
use crate::error::{EngineError, EngineResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Map a run id to its lock key: first 8 bytes of sha256, big-endian, signed
pub fn compute_lock_key(run_id: &str) -> i64 {
    let digest = Sha256::digest(run_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[derive(Clone)]
pub struct AdvisoryLockService {
    pool: SqlitePool,
    stale_after: Duration,
}

impl AdvisoryLockService {
    pub fn new(pool: SqlitePool, stale_after: Duration) -> Self {
        Self { pool, stale_after }
    }

    /// Run `f` while holding the lock for `run_id`.
    ///
    /// Fails with `TickInProgress` without running `f` if the lock is held.
    /// The lock is released whether `f` succeeds or fails; if the future is
    /// dropped or panics, release happens in a background task.
    pub async fn with_lock<F, Fut, T>(&self, run_id: &str, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let guard = self.try_acquire(run_id).await?.ok_or_else(|| {
            EngineError::TickInProgress {
                run_id: run_id.to_string(),
            }
        })?;

        let result = f().await;

        if let Err(e) = guard.release().await {
            warn!(run_id, "Failed to release advisory lock: {}", e);
        }
        result
    }

    /// Attempt to take the lock once. `None` means another holder has it.
    pub async fn try_acquire(&self, run_id: &str) -> EngineResult<Option<LockGuard>> {
        let lock_key = compute_lock_key(run_id);
        let holder = Uuid::new_v4().to_string();
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO advisory_locks (lock_key, holder, acquired_at) VALUES (?, ?, ?)
            ON CONFLICT(lock_key) DO NOTHING
            "#,
        )
        .bind(lock_key)
        .bind(&holder)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            let stale_window = chrono::Duration::from_std(self.stale_after)
                .map_err(|e| EngineError::Internal(format!("invalid lock TTL: {}", e)))?;
            let cutoff = format_ts(now - stale_window);

            let taken_over = sqlx::query(
                "UPDATE advisory_locks SET holder = ?, acquired_at = ? WHERE lock_key = ? AND acquired_at < ?",
            )
            .bind(&holder)
            .bind(format_ts(now))
            .bind(lock_key)
            .bind(&cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if taken_over == 0 {
                debug!(run_id, lock_key, "Advisory lock busy");
                return Ok(None);
            }
            warn!(run_id, lock_key, "Took over stale advisory lock");
        }

        debug!(run_id, lock_key, "Advisory lock acquired");
        Ok(Some(LockGuard {
            pool: self.pool.clone(),
            lock_key,
            holder,
            released: false,
        }))
    }

    /// Whether any holder currently has the lock for `run_id`
    pub async fn is_locked(&self, run_id: &str) -> EngineResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM advisory_locks WHERE lock_key = ?")
            .bind(compute_lock_key(run_id))
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

/// Held lock. Release explicitly; dropping unreleased schedules a release.
pub struct LockGuard {
    pool: SqlitePool,
    lock_key: i64,
    holder: String,
    released: bool,
}

impl LockGuard {
    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    pub async fn release(mut self) -> EngineResult<()> {
        self.released = true;
        delete_lock_row(&self.pool, self.lock_key, &self.holder).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pool = self.pool.clone();
        let lock_key = self.lock_key;
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = delete_lock_row(&pool, lock_key, &holder).await {
                        warn!(lock_key, "Deferred advisory lock release failed: {}", e);
                    }
                });
            }
            Err(_) => warn!(lock_key, "No runtime to release advisory lock; it will expire"),
        }
    }
}

async fn delete_lock_row(pool: &SqlitePool, lock_key: i64, holder: &str) -> EngineResult<()> {
    sqlx::query("DELETE FROM advisory_locks WHERE lock_key = ? AND holder = ?")
        .bind(lock_key)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}
