//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: ワイヤリングと HTTP ハンドラから見える操作
//! - **IngestionPipeline**: pull→decode→persist→acknowledge の 1 cycle
//! - **PublishGateway**: テキストを topic に publish
//! - **Inspector**: `/fetch` 用の pull（store には書かない）
//! - **Decoder**: payload が UTF-8 テキストかどうかの判定
//! - **bootstrap**: 起動時の DB 初期化

pub mod bootstrap;
pub mod builder;
pub mod decoder;
pub mod inspect;
pub mod pipeline;
pub mod publish;

pub use self::bootstrap::{StoreInitError, connect_store, init_store};
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::decoder::Decoder;
pub use self::inspect::{InspectedMessage, Inspector};
pub use self::pipeline::IngestionPipeline;
pub use self::publish::{PublishGateway, PublishOutcome};
