//! Domain model (IDs, messages, outcomes, errors).
//!
//! ports や impls には依存しない。キュー・ストア・HTTP のどれも知らずに
//! 「何が起きたか」の形だけを定義する。

pub mod errors;
pub mod ids;
pub mod message;
pub mod outcome;

pub use self::errors::{
    ConfigError, CycleFault, DecodeFailure, ErrorKind, PersistenceError, QueueError, SecretError,
};
pub use self::ids::{AckHandle, CycleId, DeliveryId, MessageId, RecordId};
pub use self::message::{
    AckBatch, DecodedMessage, InboundMessage, StoredRecord, SubscriptionPath, TopicPath,
};
pub use self::outcome::{AckStatus, CycleReport, MessageOutcome, MessageReport};
