//! Outcome model: what happened to each message in a cycle, and to the cycle itself.
//!
//! The "drop and let the queue redeliver" paths are named outcomes here so callers
//! and tests can tell "dropped, not acknowledged" apart from "stored and acknowledged".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CycleId, MessageId, RecordId};

/// MessageOutcome は cycle 内の 1 メッセージの結果
///
/// 状態遷移:
/// - Received -> Decoded -> Stored -> (Acknowledged、[`AckStatus`] を参照)
/// - Received -> Decoded -> StoreFailed（あとで再配送）
/// - Received -> DecodeFailed（あとで再配送）
/// - Received -> TransportMalformed（あとで再配送）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    Stored { record_id: RecordId },
    DecodeFailed { reason: String },
    /// 転送形式が壊れていて payload 自体を取り出せなかった
    TransportMalformed { reason: String },
    StoreFailed { reason: String },
}

impl MessageOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, MessageOutcome::Stored { .. })
    }

    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            MessageOutcome::Stored { record_id } => Some(*record_id),
            _ => None,
        }
    }
}

/// AckStatus は cycle の ack がどうなったか
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckStatus {
    /// 何も保存されなかったので何も送っていない
    NotAttempted,
    Confirmed { count: usize },
    /// 書き込みは残る。メッセージは再配信され、もう一度保存される
    Failed { count: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReport {
    pub message_id: MessageId,
    #[serde(flatten)]
    pub outcome: MessageOutcome,
}

/// CycleReport は 1 cycle の結果。`messages` は pull 順
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub messages: Vec<MessageReport>,
    pub ack: AckStatus,
}

impl CycleReport {
    pub fn new(cycle_id: CycleId, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            finished_at: started_at,
            messages: Vec::new(),
            ack: AckStatus::NotAttempted,
        }
    }

    pub fn push(&mut self, message_id: MessageId, outcome: MessageOutcome) {
        self.messages.push(MessageReport {
            message_id,
            outcome,
        });
    }

    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }

    /// この cycle で作られた record の id（pull 順）
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.messages
            .iter()
            .filter_map(|m| m.outcome.record_id())
            .collect()
    }

    pub fn stored_count(&self) -> usize {
        self.messages.iter().filter(|m| m.outcome.is_stored()).count()
    }

    pub fn dropped_count(&self) -> usize {
        self.messages.len() - self.stored_count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn report_collects_record_ids_in_pull_order() {
        let mut report = CycleReport::new(CycleId::from_ulid(Ulid::new()), Utc::now());
        report.push(
            MessageId::new("1"),
            MessageOutcome::Stored {
                record_id: RecordId::new(7),
            },
        );
        report.push(
            MessageId::new("2"),
            MessageOutcome::DecodeFailed {
                reason: "bad".into(),
            },
        );
        report.push(
            MessageId::new("3"),
            MessageOutcome::Stored {
                record_id: RecordId::new(8),
            },
        );

        assert_eq!(report.record_ids(), vec![RecordId::new(7), RecordId::new(8)]);
        assert_eq!(report.stored_count(), 2);
        assert_eq!(report.dropped_count(), 1);
    }

    #[test]
    fn outcomes_serialize_with_a_tag() {
        let report = MessageReport {
            message_id: MessageId::new("42"),
            outcome: MessageOutcome::StoreFailed {
                reason: "down".into(),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message_id": "42", "outcome": "store_failed", "reason": "down"})
        );
    }
}
