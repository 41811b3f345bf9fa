//! PublishGateway - テキストを topic に publish する薄い層

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::domain::{ConfigError, MessageId, TopicPath};
use crate::ports::QueueClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered(MessageId),
    /// ログに残すだけ。HTTP の呼び出し側には成功として見える
    NotDelivered { reason: String },
}

/// PublishGateway はテキストを publish し、queue の確認を待つ
///
/// 配送の失敗は呼び出し側にエラーとして届かない。届くのは topic の設定漏れだけ。
pub struct PublishGateway {
    queue: Arc<dyn QueueClient>,
    topic: Result<TopicPath, ConfigError>,
}

impl PublishGateway {
    pub fn new(queue: Arc<dyn QueueClient>, topic: Result<TopicPath, ConfigError>) -> Self {
        Self { queue, topic }
    }

    pub async fn publish(&self, text: &str) -> Result<PublishOutcome, ConfigError> {
        let topic = self.topic.as_ref().map_err(|e| e.clone())?;
        info!(%topic, bytes = text.len(), "publishing message");

        match self
            .queue
            .publish(topic, text.as_bytes().to_vec(), BTreeMap::new())
            .await
        {
            Ok(message_id) => {
                info!(%topic, %message_id, "message published");
                Ok(PublishOutcome::Delivered(message_id))
            }
            Err(err) => {
                error!(%topic, error = %err, "publish failed");
                Ok(PublishOutcome::NotDelivered {
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueError;
    use crate::impls::InMemoryQueue;

    fn topic() -> TopicPath {
        TopicPath::new("test", "topic")
    }

    #[tokio::test]
    async fn published_text_becomes_pullable() {
        let queue = Arc::new(InMemoryQueue::new());
        let gateway = PublishGateway::new(queue.clone(), Ok(topic()));

        let outcome = gateway.publish("hello").await.unwrap();

        assert!(matches!(outcome, PublishOutcome::Delivered(_)));
        assert_eq!(queue.pending_payloads().await, vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn delivery_failure_is_reported_but_not_an_error() {
        let queue = Arc::new(InMemoryQueue::new());
        queue
            .fail_next_publish(QueueError::Transient("unreachable".into()))
            .await;
        let gateway = PublishGateway::new(queue.clone(), Ok(topic()));

        let outcome = gateway.publish("lost").await.unwrap();

        assert!(matches!(outcome, PublishOutcome::NotDelivered { .. }));
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn missing_topic_is_a_config_error() {
        let gateway = PublishGateway::new(
            Arc::new(InMemoryQueue::new()),
            Err(ConfigError::Missing("PUBSUB_TOPIC")),
        );
        assert_eq!(
            gateway.publish("x").await,
            Err(ConfigError::Missing("PUBSUB_TOPIC"))
        );
    }
}
