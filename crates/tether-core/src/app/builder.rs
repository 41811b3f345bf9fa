//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 方針
//! - ports の実装（queue, store）は必須。足りなければ build() が BuildError を返す（Fail-fast）
//! - 環境変数の欠落は build() では失敗させない。各操作が ConfigError として報告する

use std::sync::Arc;

use tracing::warn;

use super::inspect::{InspectedMessage, Inspector};
use super::pipeline::IngestionPipeline;
use super::publish::{PublishGateway, PublishOutcome};
use crate::config::{FetchMode, Settings};
use crate::domain::{ConfigError, CycleFault, CycleReport};
use crate::ports::{Clock, IdGenerator, QueueClient, StoreWriter, SystemClock, UlidGenerator};

/// AppBuilder は App を構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(Settings::from_env())
///     .queue(Arc::new(pubsub))
///     .store(store)
///     .build()?;
/// ```
pub struct AppBuilder {
    settings: Settings,
    queue: Option<Arc<dyn QueueClient>>,
    store: Option<Arc<dyn StoreWriter>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Missing component: {0}. It must be provided before build().")]
    MissingComponent(&'static str),
}

impl AppBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            queue: None,
            store: None,
            clock: None,
            ids: None,
        }
    }

    pub fn queue(mut self, queue: Arc<dyn QueueClient>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(mut self, store: Arc<dyn StoreWriter>) -> Self {
        self.store = Some(store);
        self
    }

    /// 省略時は [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 省略時は builder の clock を使う [`UlidGenerator`]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let queue = self.queue.ok_or(BuildError::MissingComponent("queue"))?;
        let store = self.store.ok_or(BuildError::MissingComponent("store"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SharedClock(clock.clone()))));

        let fetch_mode = self.settings.fetch_mode().unwrap_or_else(|err| {
            warn!(error = %err, "falling back to the default fetch mode");
            FetchMode::default()
        });

        let pipeline = IngestionPipeline::new(
            queue.clone(),
            store.clone(),
            ids,
            clock,
            self.settings.pull_target(),
        );
        let publisher = PublishGateway::new(queue.clone(), self.settings.topic_path());
        let inspector = Inspector::new(queue, self.settings.pull_target(), fetch_mode);

        Ok(App {
            pipeline: Arc::new(pipeline),
            publisher: Arc::new(publisher),
            inspector: Arc::new(inspector),
            store,
            max_messages: self.settings.max_messages(),
        })
    }
}

/// `dyn Clock` で [`UlidGenerator`] を動かすためのアダプタ
struct SharedClock(Arc<dyn Clock>);

impl Clock for SharedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0.now()
    }
}

/// App は HTTP ハンドラから共有される（Clone は Arc のコピーだけ）
#[derive(Clone)]
pub struct App {
    pipeline: Arc<IngestionPipeline>,
    publisher: Arc<PublishGateway>,
    inspector: Arc<Inspector>,
    store: Arc<dyn StoreWriter>,
    max_messages: Result<usize, ConfigError>,
}

impl App {
    /// 設定された batch size で ingestion cycle を 1 回回す
    pub async fn ingest(&self) -> Result<CycleReport, CycleFault> {
        let max = self.max_messages.clone()?;
        self.pipeline.run(max).await
    }

    pub async fn publish(&self, text: &str) -> Result<PublishOutcome, ConfigError> {
        self.publisher.publish(text).await
    }

    pub async fn inspect(&self) -> Result<Vec<InspectedMessage>, ConfigError> {
        let max = self.max_messages.clone()?;
        self.inspector.inspect(max).await
    }

    pub async fn healthy(&self) -> bool {
        self.store.health_check().await
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.inspector.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryQueue, InMemoryStore};

    fn settings(vars: &'static [(&'static str, &'static str)]) -> Settings {
        Settings::from_lookup(|var| {
            vars.iter()
                .find(|(k, _)| *k == var)
                .map(|(_, v)| v.to_string())
        })
    }

    const FULL: &[(&str, &str)] = &[
        ("GOOGLE_CLOUD_PROJECT", "proj"),
        ("PUBSUB_TOPIC", "topic"),
        ("PUBSUB_SUBSCRIPTION", "sub"),
        ("PUBSUB_PULL_TIMEOUT_SECS", "1"),
    ];

    #[test]
    fn test_build_missing_queue() {
        let result = AppBuilder::new(Settings::default())
            .store(Arc::new(InMemoryStore::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingComponent("queue"))));
    }

    #[test]
    fn test_build_missing_store() {
        let result = AppBuilder::new(Settings::default())
            .queue(Arc::new(InMemoryQueue::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingComponent("store"))));
    }

    #[tokio::test]
    async fn test_build_succeeds_without_env_and_reports_per_operation() {
        let app = AppBuilder::new(Settings::default())
            .queue(Arc::new(InMemoryQueue::new()))
            .store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();

        assert!(app.healthy().await);
        assert!(matches!(
            app.ingest().await,
            Err(CycleFault::Config(ConfigError::Missing(_)))
        ));
        assert!(app.publish("x").await.is_err());
        assert!(app.inspect().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_then_ingest_round_trip() {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryStore::new());
        let app = AppBuilder::new(settings(FULL))
            .queue(queue)
            .store(store.clone())
            .build()
            .unwrap();

        app.publish("hello").await.unwrap();
        let report = app.ingest().await.unwrap();

        assert_eq!(report.stored_count(), 1);
        assert_eq!(store.records().await[0].text, "hello");
    }

    #[test]
    fn test_invalid_fetch_mode_falls_back_to_release() {
        const VARS: &[(&str, &str)] = &[("FETCH_MODE", "destroy")];
        let app = AppBuilder::new(settings(VARS))
            .queue(Arc::new(InMemoryQueue::new()))
            .store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();
        assert_eq!(app.fetch_mode(), FetchMode::Release);
    }

    #[tokio::test]
    async fn test_invalid_batch_size_is_a_config_error() {
        const VARS: &[(&str, &str)] = &[
            ("GOOGLE_CLOUD_PROJECT", "proj"),
            ("PUBSUB_SUBSCRIPTION", "sub"),
            ("PUBSUB_MAX_MESSAGES", "many"),
        ];
        let app = AppBuilder::new(settings(VARS))
            .queue(Arc::new(InMemoryQueue::new()))
            .store(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();
        assert!(matches!(
            app.ingest().await,
            Err(CycleFault::Config(ConfigError::Invalid { var: "PUBSUB_MAX_MESSAGES", .. }))
        ));
    }
}
