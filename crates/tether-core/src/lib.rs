//! tether-core
//!
//! Pub/Sub のメッセージを PostgreSQL の追記専用テーブルへ運ぶための部品。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, outcome, errors）
//! - **ports**: 抽象化レイヤー（QueueClient, StoreWriter, SecretSource, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, pipeline, publish, inspect, bootstrap）
//! - **impls**: 実装（PubSubClient, PgStore, SecretManagerClient と InMemory 版）
//! - **config**: 環境変数からの設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
