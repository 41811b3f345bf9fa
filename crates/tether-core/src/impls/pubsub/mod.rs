//! PubSubClient - Pub/Sub v1 REST API の QueueClient 実装
//!
//! `PUBSUB_EMULATOR_HOST` があれば `http://{host}` に認証なしで接続する。

mod wire;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use self::wire::{
    AcknowledgeRequest, ErrorEnvelope, ModifyAckDeadlineRequest, PublishRequest, PublishResponse,
    PullRequest, PullResponse, ReceivedMessage,
};
use super::auth::TokenSource;
use crate::config::Settings;
use crate::domain::{AckBatch, InboundMessage, MessageId, QueueError, SubscriptionPath, TopicPath};
use crate::ports::{Clock, QueueClient};

pub const PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
/// acknowledge / modifyAckDeadline / publish の timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct PubSubClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenSource,
}

impl PubSubClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, tokens: TokenSource) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// emulator が設定されていればそちらへ。なければ本番 endpoint に、
    /// static token か metadata server の token で接続する
    pub fn from_settings(settings: &Settings, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        if let Some(host) = settings.emulator_host() {
            return Self::new(http, format!("http://{host}"), TokenSource::None);
        }
        let tokens = match settings.access_token() {
            Some(token) => TokenSource::Static(token.to_string()),
            None => TokenSource::metadata(http.clone(), clock),
        };
        Self::new(http, PUBSUB_ENDPOINT, tokens)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B, timeout: Duration) -> Result<R, CallError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/v1/{path}", self.base_url);
        let mut request = self.http.post(&url).json(body).timeout(timeout);
        if let Some(token) = self
            .tokens
            .token()
            .await
            .map_err(|e| QueueError::Transient(format!("no access token: {e}")))?
        {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(classify_status(status, message).into());
        }

        // acknowledge と modifyAckDeadline は `{}` を返す
        let body: &[u8] = if body.is_empty() { b"{}" } else { &body };
        serde_json::from_slice(body).map_err(|e| QueueError::Malformed(e.to_string()).into())
    }
}

/// 時間切れは他の失敗と区別する。pull では「何も来なかった」という意味になる
#[derive(Debug)]
enum CallError {
    TimedOut,
    Failed(QueueError),
}

impl From<QueueError> for CallError {
    fn from(err: QueueError) -> Self {
        CallError::Failed(err)
    }
}

impl From<CallError> for QueueError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::TimedOut => QueueError::Transient("request timed out".into()),
            CallError::Failed(err) => err,
        }
    }
}

fn transport_error(err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::TimedOut
    } else {
        CallError::Failed(QueueError::Transient(err.to_string()))
    }
}

fn classify_status(status: StatusCode, message: String) -> QueueError {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        QueueError::Transient(format!("{status}: {message}"))
    } else {
        QueueError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl QueueClient for PubSubClient {
    async fn pull(
        &self,
        subscription: &SubscriptionPath,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<InboundMessage>, QueueError> {
        let path = format!("{subscription}:pull");
        let response = match self
            .post::<_, PullResponse>(&path, &PullRequest { max_messages }, timeout)
            .await
        {
            Ok(response) => response,
            Err(CallError::TimedOut) => {
                debug!(%subscription, "pull timed out with no messages");
                return Ok(Vec::new());
            }
            Err(CallError::Failed(err)) => return Err(err),
        };

        let messages: Vec<InboundMessage> = response
            .received_messages
            .into_iter()
            .map(ReceivedMessage::into_inbound)
            .collect();
        for message in messages.iter().filter(|m| m.transport_fault.is_some()) {
            warn!(%subscription, message_id = %message.id, "received message with malformed data");
        }
        Ok(messages)
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionPath,
        handles: &AckBatch,
    ) -> Result<(), QueueError> {
        if handles.is_empty() {
            return Ok(());
        }
        let path = format!("{subscription}:acknowledge");
        let _: serde_json::Value = self
            .post(&path, &AcknowledgeRequest::new(handles), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn release(
        &self,
        subscription: &SubscriptionPath,
        handles: &AckBatch,
    ) -> Result<(), QueueError> {
        if handles.is_empty() {
            return Ok(());
        }
        let path = format!("{subscription}:modifyAckDeadline");
        let _: serde_json::Value = self
            .post(&path, &ModifyAckDeadlineRequest::release(handles), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &TopicPath,
        payload: Vec<u8>,
        attributes: BTreeMap<String, String>,
    ) -> Result<MessageId, QueueError> {
        let path = format!("{topic}:publish");
        let response: PublishResponse = self
            .post(&path, &PublishRequest::single(&payload, attributes), REQUEST_TIMEOUT)
            .await?;

        match response.message_ids.into_iter().next() {
            Some(id) => Ok(MessageId::new(id)),
            None => {
                warn!(%topic, "publish response carried no message id");
                Err(QueueError::Malformed("publish response has no messageIds".into()))
            }
        }
    }
}
