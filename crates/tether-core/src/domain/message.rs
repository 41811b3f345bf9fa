//! Message model: what is pulled, what is decoded, what is stored, what is acked.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AckHandle, MessageId, RecordId};

/// InboundMessage は 1 回の pull で配送されたメッセージ
///
/// cycle の間だけ pipeline が持つ。書き換えず、分類するだけ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
    pub ack_handle: AckHandle,
    pub attributes: BTreeMap<String, String>,
    pub publish_time: Option<DateTime<Utc>>,
    /// 転送形式（base64 など）が壊れていて payload を取り出せなかった理由。
    /// `Some` のとき payload は空。
    pub transport_fault: Option<String>,
}

impl InboundMessage {
    pub fn new(id: MessageId, payload: impl Into<Vec<u8>>, ack_handle: AckHandle) -> Self {
        Self {
            id,
            payload: payload.into(),
            ack_handle,
            attributes: BTreeMap::new(),
            publish_time: None,
            transport_fault: None,
        }
    }

    /// payload を取り出せなかったメッセージ。ack handle は残るので個別に扱える
    pub fn undecodable(id: MessageId, ack_handle: AckHandle, reason: impl Into<String>) -> Self {
        let mut message = Self::new(id, Vec::<u8>::new(), ack_handle);
        message.transport_fault = Some(reason.into());
        message
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_publish_time(mut self, publish_time: DateTime<Utc>) -> Self {
        self.publish_time = Some(publish_time);
        self
    }
}

/// DecodedMessage は payload がテキストだと確認済みのメッセージ
#[derive(Debug, Clone, Copy)]
pub struct DecodedMessage<'a> {
    pub source: &'a InboundMessage,
    pub text: &'a str,
}

/// append-only テーブルの 1 行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub text: String,
}

/// AckBatch は 1 cycle で永続化できたメッセージの ack handle
///
/// pull 順を保つ。同じ handle の 2 回目の insert は何もしない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckBatch {
    handles: Vec<AckHandle>,
    seen: HashSet<AckHandle>,
}

impl AckBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// すでにあった handle なら false
    pub fn insert(&mut self, handle: AckHandle) -> bool {
        if !self.seen.insert(handle.clone()) {
            return false;
        }
        self.handles.push(handle);
        true
    }

    pub fn contains(&self, handle: &AckHandle) -> bool {
        self.seen.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[AckHandle] {
        &self.handles
    }

    pub fn iter(&self) -> impl Iterator<Item = &AckHandle> {
        self.handles.iter()
    }
}

impl FromIterator<AckHandle> for AckBatch {
    fn from_iter<I: IntoIterator<Item = AckHandle>>(iter: I) -> Self {
        let mut batch = AckBatch::new();
        for handle in iter {
            batch.insert(handle);
        }
        batch
    }
}

/// subscription の完全な名前 (`projects/{project}/subscriptions/{id}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionPath(String);

impl SubscriptionPath {
    pub fn new(project: &str, subscription: &str) -> Self {
        Self(format!("projects/{project}/subscriptions/{subscription}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// topic の完全な名前 (`projects/{project}/topics/{id}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath(String);

impl TopicPath {
    pub fn new(project: &str, topic: &str) -> Self {
        Self(format!("projects/{project}/topics/{topic}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
