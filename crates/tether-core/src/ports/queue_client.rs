//! QueueClient port - pull 型メッセージキュー（Pub/Sub または InMemory）
//!
//! # 実装
//! - **PubSubClient**: 本番用（REST API）
//! - **InMemoryQueue**: 開発・テスト用

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{AckBatch, InboundMessage, MessageId, QueueError, SubscriptionPath, TopicPath};

/// QueueClient は at-least-once 配送のキューへのインターフェース
///
/// # 設計原則
/// - ack されなかったメッセージの再配送はキュー側の責任（tether は状態を持たない）
/// - `acknowledge` の失敗は store への書き込みを巻き戻さない
/// - 呼び出しはキャンセルできない前提で扱う
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// 最大 `max_messages` 件を pull する。`timeout` を超えて待たない。
    /// 空の vec は何もなかったという意味
    async fn pull(
        &self,
        subscription: &SubscriptionPath,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, QueueError>;

    /// handle のメッセージを処理済みにする
    async fn acknowledge(
        &self,
        subscription: &SubscriptionPath,
        batch: &AckBatch,
    ) -> Result<(), QueueError>;

    /// メッセージを返してすぐ再配信させる（ack deadline 0）
    async fn release(
        &self,
        subscription: &SubscriptionPath,
        batch: &AckBatch,
    ) -> Result<(), QueueError>;

    /// payload を 1 件 publish し、サーバが振った id を待つ
    async fn publish(
        &self,
        topic: &TopicPath,
        payload: Vec<u8>,
        attributes: BTreeMap<String, String>,
    ) -> Result<MessageId, QueueError>;
}
