//! InMemoryQueue - 開発・テスト用の Pub/Sub もどき
//!
//! # 学習ポイント
//! - tokio::sync::Mutex + Notify による「待てる」pull
//! - pending（未配送）と outstanding（配送済み・未 ack）の二つの置き場
//! - 配送ごとに新しい ack handle を発行する（古い handle での ack は無視される）
//!
//! topic と subscription は一組だけを想定し、名前は見ない。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::{
    AckBatch, AckHandle, InboundMessage, MessageId, QueueError, SubscriptionPath, TopicPath,
};
use crate::ports::{IdGenerator, QueueClient, SystemClock, UlidGenerator};

#[derive(Debug, Clone)]
struct QueuedMessage {
    id: MessageId,
    payload: Vec<u8>,
    attributes: BTreeMap<String, String>,
    transport_fault: Option<String>,
}

impl QueuedMessage {
    fn deliver(&self, handle: AckHandle) -> InboundMessage {
        match &self.transport_fault {
            Some(reason) => InboundMessage::undecodable(self.id.clone(), handle, reason.clone()),
            None => InboundMessage::new(self.id.clone(), self.payload.clone(), handle)
                .with_attributes(self.attributes.clone()),
        }
    }
}

#[derive(Default)]
struct InMemoryQueueState {
    /// 次の pull を待っている
    pending: VecDeque<QueuedMessage>,

    /// 配信済み、未 ack
    outstanding: HashMap<AckHandle, QueuedMessage>,

    /// outstanding な handle の配信順（再配信の順序を決めるため）
    outstanding_order: Vec<AckHandle>,

    next_message_id: u64,

    pull_failures: VecDeque<QueueError>,
    ack_failures: VecDeque<QueueError>,
    publish_failures: VecDeque<QueueError>,

    /// すべての acknowledge 呼び出し（失敗も含む）
    ack_calls: Vec<Vec<AckHandle>>,
    release_calls: Vec<Vec<AckHandle>>,
    acknowledged: Vec<MessageId>,
}

impl InMemoryQueueState {
    fn take_outstanding(&mut self, handle: &AckHandle) -> Option<QueuedMessage> {
        let message = self.outstanding.remove(handle)?;
        self.outstanding_order.retain(|h| h != handle);
        Some(message)
    }
}

/// InMemoryQueue は at-least-once のメモリ上のキュー
pub struct InMemoryQueue {
    state: Arc<Mutex<InMemoryQueueState>>,
    notify: Arc<Notify>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryQueueState::default())),
            notify: Arc::new(Notify::new()),
            ids,
        }
    }

    /// payload を直接積む（publish の失敗注入は通らない）
    pub async fn push(&self, payload: impl Into<Vec<u8>>) -> MessageId {
        self.push_with_attributes(payload, BTreeMap::new()).await
    }

    pub async fn push_with_attributes(
        &self,
        payload: impl Into<Vec<u8>>,
        attributes: BTreeMap<String, String>,
    ) -> MessageId {
        self.enqueue(payload.into(), attributes, None).await
    }

    /// payload を取り出せない（転送形式が壊れた）メッセージを積む
    pub async fn push_undecodable(&self, reason: &str) -> MessageId {
        self.enqueue(Vec::new(), BTreeMap::new(), Some(reason.to_string()))
            .await
    }

    async fn enqueue(
        &self,
        payload: Vec<u8>,
        attributes: BTreeMap<String, String>,
        transport_fault: Option<String>,
    ) -> MessageId {
        let mut state = self.state.lock().await;
        state.next_message_id += 1;
        let id = MessageId::new(state.next_message_id.to_string());
        state.pending.push_back(QueuedMessage {
            id: id.clone(),
            payload,
            attributes,
            transport_fault,
        });
        drop(state);
        self.notify.notify_one();
        id
    }

    /// ack deadline 切れを再現する。outstanding なメッセージはすべて pending に戻る
    pub async fn redeliver_outstanding(&self) -> usize {
        let mut state = self.state.lock().await;
        let order = std::mem::take(&mut state.outstanding_order);
        let mut moved = 0;
        for handle in order.into_iter().rev() {
            if let Some(message) = state.outstanding.remove(&handle) {
                state.pending.push_front(message);
                moved += 1;
            }
        }
        drop(state);
        if moved > 0 {
            self.notify.notify_one();
        }
        moved
    }

    pub async fn fail_next_pull(&self, error: QueueError) {
        self.state.lock().await.pull_failures.push_back(error);
    }

    pub async fn fail_next_acknowledge(&self, error: QueueError) {
        self.state.lock().await.ack_failures.push_back(error);
    }

    pub async fn fail_next_publish(&self, error: QueueError) {
        self.state.lock().await.publish_failures.push_back(error);
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn outstanding_len(&self) -> usize {
        self.state.lock().await.outstanding.len()
    }

    pub async fn ack_calls(&self) -> Vec<Vec<AckHandle>> {
        self.state.lock().await.ack_calls.clone()
    }

    pub async fn release_calls(&self) -> Vec<Vec<AckHandle>> {
        self.state.lock().await.release_calls.clone()
    }

    /// ack で subscription から消えたメッセージの id
    pub async fn acknowledged(&self) -> Vec<MessageId> {
        self.state.lock().await.acknowledged.clone()
    }

    /// まだ pending なメッセージの payload（配信順）
    pub async fn pending_payloads(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state.pending.iter().map(|m| m.payload.clone()).collect()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn pull(
        &self,
        _subscription: &SubscriptionPath,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(error) = state.pull_failures.pop_front() {
                    return Err(error);
                }

                let take = max_messages.min(state.pending.len());
                if take > 0 {
                    let drained: Vec<QueuedMessage> = state.pending.drain(..take).collect();
                    let mut delivered = Vec::with_capacity(take);
                    for message in drained {
                        let handle = AckHandle::new(self.ids.generate_delivery_id().to_string());
                        delivered.push(message.deliver(handle.clone()));
                        state.outstanding_order.push(handle.clone());
                        state.outstanding.insert(handle, message);
                    }
                    return Ok(delivered);
                }
            }

            // ロックを離してから待つ。notify_one は permit を残すので取りこぼさない
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(
        &self,
        _subscription: &SubscriptionPath,
        batch: &AckBatch,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.ack_calls.push(batch.handles().to_vec());
        if let Some(error) = state.ack_failures.pop_front() {
            return Err(error);
        }
        for handle in batch.iter() {
            // 期限切れや未知の handle は Pub/Sub と同じく黙って無視する
            if let Some(message) = state.take_outstanding(handle) {
                state.acknowledged.push(message.id);
            }
        }
        Ok(())
    }

    async fn release(
        &self,
        _subscription: &SubscriptionPath,
        batch: &AckBatch,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.release_calls.push(batch.handles().to_vec());
        for handle in batch.handles().iter().rev() {
            if let Some(message) = state.take_outstanding(handle) {
                state.pending.push_front(message);
            }
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn publish(
        &self,
        _topic: &TopicPath,
        payload: Vec<u8>,
        attributes: BTreeMap<String, String>,
    ) -> Result<MessageId, QueueError> {
        if let Some(error) = self.state.lock().await.publish_failures.pop_front() {
            return Err(error);
        }
        Ok(self.push_with_attributes(payload, attributes).await)
    }
}
