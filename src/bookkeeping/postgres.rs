//! PostgreSQL bookkeeping backend.
//!
//! History lives in [`HISTORY_TABLE`] in the meta database; stores are
//! databases on the same server, so the catalog is read from
//! `pg_catalog.pg_database`.

use async_trait::async_trait;
use refresh_naming::{StoreNameCodec, StoreRecord};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};

use super::{BookkeepingBackend, BookkeepingSession, ImportsSnapshot, StoreAdmin};
use crate::config::DatabaseConfig;
use crate::error::{RefreshError, Result};

/// Table holding one row per successful import.
pub const HISTORY_TABLE: &str = "latest_successful_imports";

const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_DUPLICATE_TABLE: &str = "42P07";
const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

const HISTORY_BY_PREFIX: &str = "\
    SELECT store_name \
    FROM latest_successful_imports \
    WHERE substring(store_name FOR character_length($1)) = $1 \
    ORDER BY imported_at DESC, store_name DESC";

const CATALOG_BY_PREFIX: &str = "\
    SELECT datname::text \
    FROM pg_catalog.pg_database \
    WHERE substring(datname FOR character_length($1)) = $1 \
    AND datname <> current_database() \
    ORDER BY datname ASC";

/// Quote `name` as a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(code),
        _ => false,
    }
}

fn decode_history(codec: &StoreNameCodec, names: Vec<String>) -> Vec<StoreRecord> {
    names
        .into_iter()
        .filter_map(|name| {
            let record = codec.decode(&name);
            if record.is_none() {
                tracing::warn!(store = %name, "ignoring history entry with a foreign name");
            }
            record
        })
        .collect()
}

/// Backend connected to the meta database.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Connect using the configured parameters. Unset parameters fall back
    /// to the driver defaults.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let mut opts = PgConnectOptions::new();
        if let Some(host) = &cfg.host {
            opts = opts.host(host);
        }
        if let Some(port) = cfg.port {
            opts = opts.port(port);
        }
        if let Some(user) = &cfg.user {
            opts = opts.username(user);
        }
        if let Some(password) = &cfg.password {
            opts = opts.password(password);
        }
        if let Some(db) = &cfg.meta_database {
            opts = opts.database(db);
        }

        tracing::info!(
            host = cfg.host.as_deref().unwrap_or("<default>"),
            port = cfg.port,
            database = cfg.meta_database.as_deref().unwrap_or("<default>"),
            user = cfg.user.as_deref().unwrap_or("<default>"),
            "connecting to bookkeeping database"
        );

        // One connection for the cycle's transaction, one for store admin.
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await
            .map_err(|e| RefreshError::backend("connect to bookkeeping database", e))?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Store admin sharing this backend's pool.
    pub fn admin(&self) -> PgStoreAdmin {
        PgStoreAdmin {
            pool: self.pool.clone(),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl BookkeepingBackend for PgBackend {
    async fn ensure_schema(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {HISTORY_TABLE} (\
                store_name TEXT PRIMARY KEY, \
                imported_at BIGINT NOT NULL, \
                feed_digest TEXT NOT NULL\
            )"
        );
        match sqlx::raw_sql(&ddl).execute(&self.pool).await {
            Ok(_) => Ok(()),
            // A concurrent cycle created it between our check and create.
            Err(e)
                if has_sqlstate(&e, SQLSTATE_UNIQUE_VIOLATION)
                    || has_sqlstate(&e, SQLSTATE_DUPLICATE_TABLE) =>
            {
                Ok(())
            }
            Err(e) => Err(RefreshError::backend("create history table", e)),
        }
    }

    async fn begin(&self) -> Result<Box<dyn BookkeepingSession>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RefreshError::backend("begin bookkeeping transaction", e))?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn list_imports(&self, codec: &StoreNameCodec) -> Result<ImportsSnapshot> {
        let history = match sqlx::query_scalar::<_, String>(HISTORY_BY_PREFIX)
            .bind(codec.prefix())
            .fetch_all(&self.pool)
            .await
        {
            Ok(names) => decode_history(codec, names),
            Err(e) if has_sqlstate(&e, SQLSTATE_UNDEFINED_TABLE) => Vec::new(),
            Err(e) => return Err(RefreshError::backend("read import history", e)),
        };

        let catalog = sqlx::query_scalar::<_, String>(CATALOG_BY_PREFIX)
            .bind(codec.prefix())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RefreshError::backend("read store catalog", e))?;

        Ok(ImportsSnapshot { history, catalog })
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookkeepingSession for PgSession {
    async fn acquire_exclusive_lock(&mut self) -> Result<()> {
        // EXCLUSIVE conflicts with every write lock but still admits plain
        // SELECTs, so `list` keeps working while a cycle runs.
        let sql = format!("LOCK TABLE {HISTORY_TABLE} IN EXCLUSIVE MODE NOWAIT");
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if has_sqlstate(&e, SQLSTATE_LOCK_NOT_AVAILABLE) {
                    RefreshError::Contention
                } else {
                    RefreshError::backend("lock history table", e)
                }
            })?;
        Ok(())
    }

    async fn read_latest(&mut self, codec: &StoreNameCodec) -> Result<Vec<StoreRecord>> {
        let names = sqlx::query_scalar::<_, String>(HISTORY_BY_PREFIX)
            .bind(codec.prefix())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| RefreshError::backend("read import history", e))?;
        Ok(decode_history(codec, names))
    }

    async fn read_catalog(&mut self, codec: &StoreNameCodec) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(CATALOG_BY_PREFIX)
            .bind(codec.prefix())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| RefreshError::backend("read store catalog", e))
    }

    async fn record_success(&mut self, record: &StoreRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {HISTORY_TABLE} (store_name, imported_at, feed_digest) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (store_name) DO UPDATE \
             SET imported_at = EXCLUDED.imported_at, feed_digest = EXCLUDED.feed_digest"
        );
        sqlx::query(&sql)
            .bind(&record.name)
            .bind(record.created_at)
            .bind(&record.feed_digest)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| RefreshError::backend("record successful import", e))?;
        Ok(())
    }

    async fn forget(&mut self, name: &str) -> Result<()> {
        let sql = format!("DELETE FROM {HISTORY_TABLE} WHERE store_name = $1");
        sqlx::query(&sql)
            .bind(name)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| RefreshError::backend("remove history entry", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgSession { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| RefreshError::backend("commit bookkeeping transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgSession { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| RefreshError::backend("roll back bookkeeping transaction", e))
    }
}

/// `CREATE DATABASE`/`DROP DATABASE` on pooled connections, outside the
/// bookkeeping transaction.
#[derive(Clone)]
pub struct PgStoreAdmin {
    pool: PgPool,
}

#[async_trait]
impl StoreAdmin for PgStoreAdmin {
    async fn create_store(&self, name: &str) -> Result<()> {
        let sql = format!("CREATE DATABASE {}", quote_ident(name));
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| RefreshError::backend(format!("create store {name}"), e))?;
        Ok(())
    }

    async fn drop_store(&self, name: &str) -> Result<()> {
        let sql = format!("DROP DATABASE {}", quote_ident(name));
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| RefreshError::backend(format!("drop store {name}"), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("feed_1700000000_abc123"), "\"feed_1700000000_abc123\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_decode_history_skips_foreign_names() {
        let codec = StoreNameCodec::new("feed_");
        let records = decode_history(
            &codec,
            vec![
                "feed_1700000200_cccccc".to_string(),
                "feed_legacy".to_string(),
                "feed_1700000100_bbbbbb".to_string(),
            ],
        );

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["feed_1700000200_cccccc", "feed_1700000100_bbbbbb"]);
    }

    #[test]
    fn test_queries_filter_by_prefix() {
        assert!(HISTORY_BY_PREFIX.contains("ORDER BY imported_at DESC"));
        assert!(CATALOG_BY_PREFIX.contains("current_database()"));
    }
}
