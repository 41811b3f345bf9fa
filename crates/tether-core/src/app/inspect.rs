//! Inspector - `/fetch` のための「覗き見」pull
//!
//! store には書き込まない。pull したメッセージの扱いは [`FetchMode`] で決まる:
//! - Release: ack deadline を 0 にして即座に返す（何も消費しない）
//! - Acknowledge: ack する（覗いたメッセージはサブスクリプションから消える）

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::decoder::Decoder;
use crate::config::{FetchMode, PullTarget};
use crate::domain::{AckBatch, ConfigError, MessageId};
use crate::ports::QueueClient;

/// InspectedMessage は pull したメッセージを呼び出し側に見せる形
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectedMessage {
    pub id: MessageId,
    /// 空、テキストでない、または転送形式が壊れているときは `None`
    pub data: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
}

pub struct Inspector {
    queue: Arc<dyn QueueClient>,
    decoder: Decoder,
    target: Result<PullTarget, ConfigError>,
    mode: FetchMode,
}

impl Inspector {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        target: Result<PullTarget, ConfigError>,
        mode: FetchMode,
    ) -> Self {
        Self {
            queue,
            decoder: Decoder::new(),
            target,
            mode,
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// pull の失敗はログに残し、空のリストを返す
    pub async fn inspect(&self, max_messages: usize) -> Result<Vec<InspectedMessage>, ConfigError> {
        let target = self.target.as_ref().map_err(|e| e.clone())?;

        let messages = match self
            .queue
            .pull(&target.subscription, max_messages.max(1), target.timeout)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                warn!(subscription = %target.subscription, error = %err, "inspection pull failed");
                return Ok(Vec::new());
            }
        };
        if messages.is_empty() {
            info!(subscription = %target.subscription, "no messages to inspect");
            return Ok(Vec::new());
        }

        let handles: AckBatch = messages.iter().map(|m| m.ack_handle.clone()).collect();
        let settled = match self.mode {
            FetchMode::Release => self.queue.release(&target.subscription, &handles).await,
            FetchMode::Acknowledge => self.queue.acknowledge(&target.subscription, &handles).await,
        };
        match settled {
            Ok(()) => info!(count = handles.len(), mode = ?self.mode, "inspected messages settled"),
            Err(err) => warn!(
                count = handles.len(),
                mode = ?self.mode,
                error = %err,
                "could not settle inspected messages"
            ),
        }

        Ok(messages
            .into_iter()
            .map(|m| {
                let data = if let Some(reason) = &m.transport_fault {
                    warn!(message_id = %m.id, %reason, "inspected message has malformed transport data");
                    None
                } else {
                    match self.decoder.decode(&m.payload) {
                        Ok("") => None,
                        Ok(text) => Some(text.to_string()),
                        Err(failure) => {
                            warn!(message_id = %m.id, %failure, "inspected payload is not text");
                            None
                        }
                    }
                };
                InspectedMessage {
                    id: m.id,
                    data,
                    attributes: m.attributes,
                    publish_time: m.publish_time,
                }
            })
            .collect())
    }
}
