//! StoreWriter port - 追記専用テーブル（PostgreSQL または InMemory）
//!
//! # 実装
//! - **PgStore**: 本番用（sqlx + PgPool）
//! - **InMemoryStore**: テスト用（失敗の注入ができる）
//! - **UnavailableStore**: 起動時に DB を初期化できなかったときの代役

use async_trait::async_trait;

use crate::domain::{PersistenceError, RecordId};

/// StoreWriter は 1 メッセージ = 1 行を追記する
///
/// # 設計原則
/// - `append` は 1 件ごとに独立したトランザクションで commit する（cycle 全体をまとめない）
/// - 失敗しても内部で retry しない。呼び出し側が「保存されなかった」と扱う
/// - 行の更新・削除はしない
#[async_trait]
pub trait StoreWriter: Send + Sync {
    /// 1 行 insert して commit する。id を返すのは commit の後
    async fn append(&self, text: &str) -> Result<RecordId, PersistenceError>;

    /// 往復するだけの問い合わせ。使えなければ `false`。エラーにはしない
    async fn health_check(&self) -> bool;

    /// テーブルがなければ作る
    async fn ensure_schema(&self) -> Result<(), PersistenceError>;
}
