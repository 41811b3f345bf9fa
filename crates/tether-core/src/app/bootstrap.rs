//! 起動時の DB 初期化
//!
//! 失敗してもプロセスは落とさない。UnavailableStore を差し込み、`/health` が 500 を返す。

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{DbCredential, Settings};
use crate::domain::{PersistenceError, SecretError};
use crate::impls::{PgStore, UnavailableStore};
use crate::ports::{SecretSource, StoreWriter};

#[derive(Debug, thiserror::Error)]
pub enum StoreInitError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// パスワードを解決して接続し、テーブルを作る
pub async fn connect_store(
    settings: &Settings,
    secrets: &dyn SecretSource,
) -> Result<PgStore, StoreInitError> {
    let database = settings.database().map_err(SecretError::from)?;
    let password = match &database.credential {
        DbCredential::Password(password) => password.clone(),
        DbCredential::Secret(name) => secrets.access(name).await?,
    };

    let store = PgStore::connect(&database, &password).await?;
    store.ensure_schema().await?;
    Ok(store)
}

/// [`connect_store`] と同じだが失敗しない。失敗時に返す store は
/// append をすべて拒否し、health check も false を返す
pub async fn init_store(settings: &Settings, secrets: &dyn SecretSource) -> Arc<dyn StoreWriter> {
    match connect_store(settings, secrets).await {
        Ok(store) => {
            info!("database initialized");
            Arc::new(store)
        }
        Err(err) => {
            error!(error = %err, "database initialization failed; running without a store");
            Arc::new(UnavailableStore::new(err.to_string()))
        }
    }
}
