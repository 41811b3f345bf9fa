//! IngestionPipeline - pull→decode→persist→acknowledge を 1 cycle 実行する
//!
//! # フロー
//! 1. QueueClient::pull() でバッチを取得
//! 2. 各メッセージを Decoder で判定
//! 3. テキストなら StoreWriter::append()（1 件ずつ commit）
//! 4. 保存できたメッセージの ack handle だけを集める
//! 5. すべての commit が終わってから QueueClient::acknowledge() を 1 回だけ呼ぶ
//!
//! 5 の順序により「ack 済みなのに保存されていない」は起こらない。逆に
//! 「保存済みなのに ack されていない」は起こりうるが、再配送で重複行になるだけ。

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::decoder::Decoder;
use crate::config::PullTarget;
use crate::domain::{
    AckBatch, AckStatus, ConfigError, CycleFault, CycleId, CycleReport, InboundMessage,
    MessageOutcome,
};
use crate::ports::{Clock, IdGenerator, QueueClient, StoreWriter};

/// IngestionPipeline は呼び出し 1 回につき 1 cycle を回す
///
/// cycle は重ならない。2 つ目の呼び出しは先の cycle の終了を待つ。
pub struct IngestionPipeline {
    queue: Arc<dyn QueueClient>,
    store: Arc<dyn StoreWriter>,
    decoder: Decoder,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    target: Result<PullTarget, ConfigError>,
    cycle_lock: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn StoreWriter>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        target: Result<PullTarget, ConfigError>,
    ) -> Self {
        Self {
            queue,
            store,
            decoder: Decoder::new(),
            ids,
            clock,
            target,
            cycle_lock: Mutex::new(()),
        }
    }

    /// 最大 `max_messages` 件で 1 cycle を回す（0 は 1 として扱う）
    ///
    /// 一時的な pull の失敗は fault ではなく、メッセージのない cycle になる。
    pub async fn run(&self, max_messages: usize) -> Result<CycleReport, CycleFault> {
        let target = self.target.clone()?;
        let _cycle = self.cycle_lock.lock().await;

        let cycle_id = self.ids.generate_cycle_id();
        let span = info_span!("cycle", %cycle_id, subscription = %target.subscription);
        self.run_cycle(cycle_id, &target, max_messages.max(1))
            .instrument(span)
            .await
    }

    async fn run_cycle(
        &self,
        cycle_id: CycleId,
        target: &PullTarget,
        max_messages: usize,
    ) -> Result<CycleReport, CycleFault> {
        let mut report = CycleReport::new(cycle_id, self.clock.now());

        let messages = match self
            .queue
            .pull(&target.subscription, max_messages, target.timeout)
            .await
        {
            Ok(messages) => messages,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "pull failed; no messages this cycle");
                return Ok(report.finish(self.clock.now()));
            }
            Err(err) => {
                error!(error = %err, kind = ?err.kind(), "pull failed; aborting cycle");
                return Err(CycleFault::Pull(err));
            }
        };

        if messages.is_empty() {
            debug!("no messages received");
            return Ok(report.finish(self.clock.now()));
        }
        info!(count = messages.len(), "pulled batch");

        let mut ack = AckBatch::with_capacity(messages.len());
        for message in &messages {
            let outcome = self.process(message).await;
            if outcome.is_stored() {
                ack.insert(message.ack_handle.clone());
            }
            report.push(message.id.clone(), outcome);
        }

        if !ack.is_empty() {
            report.ack = match self.queue.acknowledge(&target.subscription, &ack).await {
                Ok(()) => {
                    info!(count = ack.len(), "acknowledged");
                    AckStatus::Confirmed { count: ack.len() }
                }
                Err(err) => {
                    // 書き込みは取り消さない。再配送されて重複行になる
                    warn!(
                        count = ack.len(),
                        error = %err,
                        "acknowledge failed; stored messages will be redelivered"
                    );
                    AckStatus::Failed {
                        count: ack.len(),
                        reason: err.to_string(),
                    }
                }
            };
        }

        info!(
            stored = report.stored_count(),
            dropped = report.dropped_count(),
            "cycle finished"
        );
        Ok(report.finish(self.clock.now()))
    }

    async fn process(&self, message: &InboundMessage) -> MessageOutcome {
        if let Some(reason) = &message.transport_fault {
            warn!(
                message_id = %message.id,
                %reason,
                "dropping message with malformed transport data; it will be redelivered"
            );
            return MessageOutcome::TransportMalformed {
                reason: reason.clone(),
            };
        }

        let decoded = match self.decoder.decode_message(message) {
            Ok(decoded) => decoded,
            Err(failure) => {
                warn!(
                    message_id = %message.id,
                    %failure,
                    "dropping non-text payload; it will be redelivered"
                );
                return MessageOutcome::DecodeFailed {
                    reason: failure.to_string(),
                };
            }
        };

        match self.store.append(decoded.text).await {
            Ok(record_id) => {
                info!(
                    message_id = %message.id,
                    %record_id,
                    bytes = message.payload.len(),
                    publish_time = ?message.publish_time,
                    "stored"
                );
                MessageOutcome::Stored { record_id }
            }
            Err(err) => {
                error!(
                    message_id = %message.id,
                    error = %err,
                    kind = ?err.kind(),
                    "store failed; message will be redelivered"
                );
                MessageOutcome::StoreFailed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AckHandle, QueueError, RecordId, SubscriptionPath};
    use crate::impls::{InMemoryQueue, InMemoryStore};
    use crate::ports::{FixedClock, SystemClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::time::Duration;

    struct Harness {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryStore>,
        pipeline: Arc<IngestionPipeline>,
    }

    fn target() -> PullTarget {
        PullTarget {
            subscription: SubscriptionPath::new("test", "sub"),
            timeout: Duration::from_millis(50),
        }
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Arc::new(IngestionPipeline::new(
            queue.clone(),
            store.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
            Ok(target()),
        ));
        Harness {
            queue,
            store,
            pipeline,
        }
    }

    /// すべての acknowledge 呼び出しの handle
    async fn acked(queue: &InMemoryQueue) -> Vec<AckHandle> {
        queue.ack_calls().await.into_iter().flatten().collect()
    }

    #[tokio::test]
    async fn scenario_a_all_messages_stored_and_acknowledged() {
        let h = harness();
        for p in ["alpha", "beta", "gamma"] {
            h.queue.push(p).await;
        }

        let report = h.pipeline.run(10).await.unwrap();

        assert_eq!(
            report.record_ids(),
            vec![RecordId::new(1), RecordId::new(2), RecordId::new(3)]
        );
        assert_eq!(report.ack, AckStatus::Confirmed { count: 3 });
        assert_eq!(h.queue.ack_calls().await.len(), 1);
        assert_eq!(acked(&h.queue).await.len(), 3);
        assert_eq!(h.queue.outstanding_len().await, 0);

        let texts: Vec<_> = h.store.records().await.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn scenario_b_malformed_payload_is_neither_stored_nor_acknowledged() {
        let h = harness();
        h.queue.push("ok").await;
        let bad = h.queue.push(vec![0xffu8, 0xfe, 0x41]).await;
        h.queue.push("ok2").await;

        let report = h.pipeline.run(10).await.unwrap();

        assert_eq!(report.record_ids().len(), 2);
        assert_eq!(report.ack, AckStatus::Confirmed { count: 2 });
        assert!(matches!(
            report.messages[1].outcome,
            MessageOutcome::DecodeFailed { .. }
        ));
        assert_eq!(report.messages[1].message_id, bad);

        let texts: Vec<_> = h.store.records().await.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["ok", "ok2"]);
        assert!(!h.queue.acknowledged().await.contains(&bad));
        // 不正な payload は outstanding に残り、いずれ再配送される
        assert_eq!(h.queue.outstanding_len().await, 1);
    }

    #[tokio::test]
    async fn malformed_transport_data_is_isolated_from_its_siblings() {
        let h = harness();
        let first = h.queue.push("ok").await;
        let bad = h.queue.push_undecodable("invalid base64").await;
        let third = h.queue.push("ok2").await;

        let report = h.pipeline.run(10).await.unwrap();

        assert_eq!(report.record_ids(), vec![RecordId::new(1), RecordId::new(2)]);
        assert_eq!(
            report.messages[1].outcome,
            MessageOutcome::TransportMalformed {
                reason: "invalid base64".into()
            }
        );
        assert_eq!(h.queue.acknowledged().await, vec![first, third]);
        assert!(!h.queue.acknowledged().await.contains(&bad));
        assert_eq!(h.queue.outstanding_len().await, 1);
    }

    #[tokio::test]
    async fn scenario_c_store_failure_on_second_insert_only() {
        let h = harness();
        let first = h.queue.push("first").await;
        h.queue.push("second").await;
        h.store.fail_append_at(2).await;

        let report = h.pipeline.run(10).await.unwrap();

        assert_eq!(report.record_ids(), vec![RecordId::new(1)]);
        assert_eq!(h.queue.acknowledged().await, vec![first]);
        assert!(matches!(
            report.messages[1].outcome,
            MessageOutcome::StoreFailed { .. }
        ));
    }

    #[tokio::test]
    async fn scenario_d_empty_pull_never_acknowledges() {
        let h = harness();

        let report = h.pipeline.run(10).await.unwrap();

        assert!(report.is_empty());
        assert!(report.record_ids().is_empty());
        assert_eq!(report.ack, AckStatus::NotAttempted);
        assert!(h.queue.ack_calls().await.is_empty());
    }

    #[tokio::test]
    async fn failure_on_message_k_does_not_stop_the_rest() {
        let h = harness();
        for i in 1..=5 {
            h.queue.push(format!("m{i}")).await;
        }
        h.store.fail_append_at(2).await;

        let report = h.pipeline.run(10).await.unwrap();

        assert_eq!(report.stored_count(), 4);
        assert_eq!(report.ack, AckStatus::Confirmed { count: 4 });
        let texts: Vec<_> = h.store.records().await.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["m1", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn acknowledged_handles_are_a_subset_of_the_batch_with_a_stored_row() {
        let h = harness();
        let payloads: Vec<Vec<u8>> = vec![
            b"one".to_vec(),
            vec![0xc3, 0x28],
            b"three".to_vec(),
            b"four".to_vec(),
            vec![0xed, 0xa0, 0x80],
        ];
        for p in &payloads {
            h.queue.push(p.clone()).await;
        }
        h.store.fail_append_at(3).await;

        let report = h.pipeline.run(10).await.unwrap();

        let stored_ids: HashSet<_> = report
            .messages
            .iter()
            .filter(|m| m.outcome.is_stored())
            .map(|m| m.message_id.clone())
            .collect();
        let acked_ids: HashSet<_> = h.queue.acknowledged().await.into_iter().collect();
        assert_eq!(stored_ids, acked_ids);

        // ack された件数 == この cycle で作られた行数、テキストも一致する
        let records = h.store.records().await;
        assert_eq!(records.len(), acked_ids.len());
        assert_eq!(
            records.iter().map(|r| r.text.as_str()).collect::<Vec<_>>(),
            vec!["one", "three"]
        );
    }

    #[tokio::test]
    async fn failed_acknowledge_keeps_rows_and_redelivery_duplicates_them() {
        let h = harness();
        h.queue.push("dup").await;
        h.queue
            .fail_next_acknowledge(QueueError::Transient("unreachable".into()))
            .await;

        let first = h.pipeline.run(10).await.unwrap();
        assert_eq!(first.record_ids(), vec![RecordId::new(1)]);
        assert!(matches!(first.ack, AckStatus::Failed { count: 1, .. }));

        // ack deadline 切れ → 再配送 → 二行目（重複は仕様どおり）
        assert_eq!(h.queue.redeliver_outstanding().await, 1);
        let second = h.pipeline.run(10).await.unwrap();
        assert_eq!(second.record_ids(), vec![RecordId::new(2)]);
        assert_eq!(second.ack, AckStatus::Confirmed { count: 1 });

        let records = h.store.records().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.text == "dup"));
        assert_ne!(records[0].id, records[1].id);
    }

    #[tokio::test]
    async fn transient_pull_failure_is_an_empty_cycle() {
        let h = harness();
        h.queue.push("later").await;
        h.queue
            .fail_next_pull(QueueError::Transient("timeout".into()))
            .await;

        let report = h.pipeline.run(10).await.unwrap();
        assert!(report.is_empty());
        assert!(h.store.records().await.is_empty());

        // 次の cycle には影響しない
        let report = h.pipeline.run(10).await.unwrap();
        assert_eq!(report.stored_count(), 1);
    }

    #[tokio::test]
    async fn rejected_pull_is_a_cycle_fault() {
        let h = harness();
        h.queue
            .fail_next_pull(QueueError::Rejected {
                status: 404,
                message: "subscription not found".into(),
            })
            .await;

        let fault = h.pipeline.run(10).await.unwrap_err();
        assert!(matches!(fault, CycleFault::Pull(QueueError::Rejected { status: 404, .. })));
        assert!(h.queue.ack_calls().await.is_empty());
    }

    #[tokio::test]
    async fn missing_subscription_is_a_config_fault() {
        let pipeline = IngestionPipeline::new(
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
            Err(ConfigError::Missing("PUBSUB_SUBSCRIPTION")),
        );

        assert_eq!(
            pipeline.run(5).await.unwrap_err(),
            CycleFault::Config(ConfigError::Missing("PUBSUB_SUBSCRIPTION"))
        );
    }

    #[tokio::test]
    async fn batch_size_is_bounded_and_zero_means_one() {
        let h = harness();
        for p in ["a", "b", "c"] {
            h.queue.push(p).await;
        }

        assert_eq!(h.pipeline.run(0).await.unwrap().messages.len(), 1);
        assert_eq!(h.pipeline.run(1).await.unwrap().messages.len(), 1);
        assert_eq!(h.pipeline.run(5).await.unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_acknowledges_nothing() {
        let h = harness();
        h.queue.push("a").await;
        h.queue.push("b").await;
        h.store.set_available(false).await;

        let report = h.pipeline.run(10).await.unwrap();

        assert_eq!(report.stored_count(), 0);
        assert_eq!(report.ack, AckStatus::NotAttempted);
        assert!(h.queue.ack_calls().await.is_empty());
        assert_eq!(h.queue.outstanding_len().await, 2);
    }

    #[tokio::test]
    async fn concurrent_runs_never_store_a_delivery_twice() {
        let h = harness();
        for i in 0..20 {
            h.queue.push(format!("msg-{i}")).await;
        }

        let runs: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = h.pipeline.clone();
                tokio::spawn(async move { pipeline.run(5).await.unwrap() })
            })
            .collect();
        let mut total = 0;
        for run in runs {
            total += run.await.unwrap().stored_count();
        }

        assert_eq!(total, 20);
        let texts: HashSet<_> = h.store.records().await.into_iter().map(|r| r.text).collect();
        assert_eq!(texts.len(), 20);
        assert_eq!(h.queue.acknowledged().await.len(), 20);
    }

    #[tokio::test]
    async fn report_timestamps_come_from_the_clock() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("x").await;
        let pipeline = IngestionPipeline::new(
            queue,
            Arc::new(InMemoryStore::new()),
            Arc::new(UlidGenerator::new(FixedClock::new(at))),
            Arc::new(FixedClock::new(at)),
            Ok(target()),
        );

        let report = pipeline.run(1).await.unwrap();
        assert_eq!(report.started_at, at);
        assert_eq!(report.finished_at, at);
        assert_eq!(
            report.cycle_id.as_ulid().timestamp_ms(),
            at.timestamp_millis() as u64
        );
    }
}
