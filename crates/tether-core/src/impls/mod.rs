//! Impls - ports の実装
//!
//! # 本番用
//! - **PubSubClient**: Pub/Sub v1 REST（emulator 対応）
//! - **SecretManagerClient**: Secret Manager v1 REST
//! - **PgStore**: PostgreSQL（sqlx）
//!
//! # 開発用・テスト用
//! - **InMemoryQueue**: Pub/Sub 風の in-memory キュー（失敗の注入ができる）
//! - **InMemoryStore**: in-memory の追記専用テーブル
//! - **UnavailableStore**: DB を初期化できなかったときの代役

pub mod auth;
pub mod inmem_queue;
pub mod inmem_store;
pub mod postgres;
pub mod pubsub;
pub mod secret_manager;

pub use self::auth::{TokenError, TokenSource};
pub use self::inmem_queue::InMemoryQueue;
pub use self::inmem_store::{InMemoryStore, UnavailableStore};
pub use self::postgres::PgStore;
pub use self::pubsub::PubSubClient;
pub use self::secret_manager::SecretManagerClient;
