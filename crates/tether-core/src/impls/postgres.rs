//! PgStore - sqlx + PgPool の StoreWriter 実装
//!
//! `cache (id SERIAL PRIMARY KEY, message TEXT)` に 1 件ずつ追記する。

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{error, info};

use crate::config::DatabaseSettings;
use crate::domain::{PersistenceError, RecordId};
use crate::ports::StoreWriter;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache (id SERIAL PRIMARY KEY, message TEXT)";
const INSERT_MESSAGE: &str = "INSERT INTO cache (message) VALUES ($1) RETURNING id";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// pool を開いて 1 往復だけ問い合わせる。host やパスワードの誤りは
    /// 最初の append ではなく起動時に分かる
    pub async fn connect(
        settings: &DatabaseSettings,
        password: &str,
    ) -> Result<Self, PersistenceError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(password)
            .database(&settings.name);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(connection_error)?;

        info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.name,
            max_connections = settings.max_connections,
            "database pool ready"
        );
        Ok(Self { pool })
    }
}

fn connection_error(err: sqlx::Error) -> PersistenceError {
    PersistenceError::Connection(err.to_string())
}

fn classify(err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => connection_error(err),
        other => PersistenceError::Query(other.to_string()),
    }
}

#[async_trait]
impl StoreWriter for PgStore {
    async fn append(&self, text: &str) -> Result<RecordId, PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let id: i32 = sqlx::query_scalar(INSERT_MESSAGE)
            .bind(text)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(RecordId::new(i64::from(id)))
    }

    async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(err) => {
                error!(error = %err, "database health check failed");
                false
            }
        }
    }

    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}
