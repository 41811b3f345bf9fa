//! InMemoryStore / UnavailableStore - テスト用と縮退用の StoreWriter

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{PersistenceError, RecordId, StoredRecord};
use crate::ports::StoreWriter;

#[derive(Debug)]
struct InMemoryStoreState {
    records: Vec<StoredRecord>,
    next_id: i64,
    /// これまでの `append` 呼び出し回数（失敗も含む）
    append_calls: usize,
    /// 失敗させる `append` の呼び出し番号（1 始まり）
    failing_calls: HashSet<usize>,
    available: bool,
}

/// InMemoryStore はメモリ上の append-only テーブル。id は SERIAL 列と同じく 1 から
///
/// 失敗した append は id を消費しない。
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState {
                records: Vec::new(),
                next_id: 1,
                append_calls: 0,
                failing_calls: HashSet::new(),
                available: true,
            })),
        }
    }

    /// n 回目（生成時から数えて 1 始まり）の `append` を失敗させる
    pub async fn fail_append_at(&self, call: usize) {
        self.state.lock().await.failing_calls.insert(call);
    }

    /// 接続の切断・復旧を再現する
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    pub async fn records(&self) -> Vec<StoredRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn append_calls(&self) -> usize {
        self.state.lock().await.append_calls
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreWriter for InMemoryStore {
    async fn append(&self, text: &str) -> Result<RecordId, PersistenceError> {
        let mut state = self.state.lock().await;
        state.append_calls += 1;
        if !state.available {
            return Err(PersistenceError::Connection("store is unreachable".into()));
        }
        if state.failing_calls.contains(&state.append_calls) {
            return Err(PersistenceError::Connection(format!(
                "injected failure on append #{}",
                state.append_calls
            )));
        }

        let id = RecordId::new(state.next_id);
        state.next_id += 1;
        state.records.push(StoredRecord {
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn health_check(&self) -> bool {
        self.state.lock().await.available
    }

    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// UnavailableStore は起動時にデータベースを初期化できなかったときの代役
///
/// append はすべて失敗する。pull したメッセージは ack されず、正常なインスタンスが
/// 動いたときに再配信される。
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl StoreWriter for UnavailableStore {
    async fn append(&self, _text: &str) -> Result<RecordId, PersistenceError> {
        Err(PersistenceError::Unavailable(self.reason.clone()))
    }

    async fn health_check(&self) -> bool {
        tracing::error!(reason = %self.reason, "no database connection");
        false
    }

    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unavailable(self.reason.clone()))
    }
}
