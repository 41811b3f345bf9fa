//! Pub/Sub v1 REST の JSON 形
//!
//! `data` は base64。ここで 1 回だけ decode する。

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AckBatch, AckHandle, InboundMessage, MessageId};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub max_messages: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub data: String,
    pub message_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
}

impl ReceivedMessage {
    /// base64 が壊れていても ack handle は失わない。そのメッセージだけが
    /// `transport_fault` 付きになり、同じバッチの他のメッセージには影響しない。
    pub fn into_inbound(self) -> InboundMessage {
        let id = MessageId::new(self.message.message_id);
        let handle = AckHandle::new(self.ack_id);

        let payload = match STANDARD.decode(self.message.data.as_bytes()) {
            Ok(payload) => payload,
            Err(e) => {
                return InboundMessage::undecodable(id, handle, format!("invalid base64 data: {e}"));
            }
        };

        let mut inbound =
            InboundMessage::new(id, payload, handle).with_attributes(self.message.attributes);
        if let Some(at) = self.message.publish_time {
            inbound = inbound.with_publish_time(at);
        }
        inbound
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest<'a> {
    pub ack_ids: Vec<&'a str>,
}

impl<'a> AcknowledgeRequest<'a> {
    pub fn new(handles: &'a AckBatch) -> Self {
        Self {
            ack_ids: handles.iter().map(AckHandle::as_str).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyAckDeadlineRequest<'a> {
    pub ack_ids: Vec<&'a str>,
    pub ack_deadline_seconds: u32,
}

impl<'a> ModifyAckDeadlineRequest<'a> {
    /// deadline 0。すぐに再配信させる
    pub fn release(handles: &'a AckBatch) -> Self {
        Self {
            ack_ids: handles.iter().map(AckHandle::as_str).collect(),
            ack_deadline_seconds: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublishRequest {
    pub messages: Vec<OutboundMessage>,
}

#[derive(Debug, Serialize)]
pub struct OutboundMessage {
    pub data: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl PublishRequest {
    pub fn single(payload: &[u8], attributes: BTreeMap<String, String>) -> Self {
        Self {
            messages: vec![OutboundMessage {
                data: STANDARD.encode(payload),
                attributes,
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Google API のエラー形式 `{"error": {"code", "message", "status"}}`
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pull_response_decodes_transport_base64_once() {
        let body = json!({
            "receivedMessages": [{
                "ackId": "ack-1",
                "message": {
                    "data": "aGVsbG8=",
                    "messageId": "101",
                    "attributes": {"origin": "test"},
                    "publishTime": "2026-03-01T12:00:00.5Z"
                }
            }]
        });
        let response: PullResponse = serde_json::from_value(body).unwrap();
        let inbound = response
            .received_messages
            .into_iter()
            .next()
            .unwrap()
            .into_inbound();

        assert_eq!(inbound.payload, b"hello");
        assert_eq!(inbound.id.as_str(), "101");
        assert_eq!(inbound.ack_handle.as_str(), "ack-1");
        assert_eq!(inbound.attributes.get("origin").map(String::as_str), Some("test"));
        assert!(inbound.publish_time.is_some());
    }

    #[test]
    fn empty_pull_response_has_no_field() {
        let response: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(response.received_messages.is_empty());
    }

    #[test]
    fn missing_data_is_an_empty_payload() {
        let received: ReceivedMessage = serde_json::from_value(json!({
            "ackId": "a",
            "message": {"messageId": "1"}
        }))
        .unwrap();
        let inbound = received.into_inbound();
        assert!(inbound.payload.is_empty());
        assert!(inbound.transport_fault.is_none());
    }

    #[test]
    fn bad_base64_faults_only_that_message() {
        let response: PullResponse = serde_json::from_value(json!({
            "receivedMessages": [
                {"ackId": "a1", "message": {"messageId": "1", "data": "b2s="}},
                {"ackId": "a2", "message": {"messageId": "2", "data": "not base64!"}},
                {"ackId": "a3", "message": {"messageId": "3", "data": "b2sy"}}
            ]
        }))
        .unwrap();

        let inbound: Vec<_> = response
            .received_messages
            .into_iter()
            .map(ReceivedMessage::into_inbound)
            .collect();

        assert_eq!(inbound.len(), 3);
        assert_eq!(inbound[0].payload, b"ok");
        assert_eq!(inbound[2].payload, b"ok2");
        assert_eq!(inbound[1].ack_handle.as_str(), "a2");
        assert!(inbound[1].payload.is_empty());
        assert!(
            inbound[1]
                .transport_fault
                .as_deref()
                .is_some_and(|reason| reason.contains("base64"))
        );
        assert!(inbound[0].transport_fault.is_none());
    }

    #[test]
    fn request_bodies_match_the_rest_api() {
        let batch: AckBatch = ["h1", "h2"].into_iter().map(AckHandle::new).collect();

        assert_eq!(
            serde_json::to_value(PullRequest { max_messages: 5 }).unwrap(),
            json!({"maxMessages": 5})
        );
        assert_eq!(
            serde_json::to_value(AcknowledgeRequest::new(&batch)).unwrap(),
            json!({"ackIds": ["h1", "h2"]})
        );
        assert_eq!(
            serde_json::to_value(ModifyAckDeadlineRequest::release(&batch)).unwrap(),
            json!({"ackIds": ["h1", "h2"], "ackDeadlineSeconds": 0})
        );
        assert_eq!(
            serde_json::to_value(PublishRequest::single(b"hi", BTreeMap::new())).unwrap(),
            json!({"messages": [{"data": "aGk="}]})
        );
    }
}
