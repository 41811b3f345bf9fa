//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! pipeline はここにある trait だけを見て動き、Pub/Sub や PostgreSQL の
//! 詳細は impls 側に閉じ込める。
//!
//! # 設計原則
//! - PostgreSQL が保存先（追記のみ）
//! - Pub/Sub が再配送の状態をすべて持つ（tether は cycle をまたぐ状態を持たない）
//! - ハンドルはすべて `Arc<dyn ...>` で明示的に渡す（グローバルな接続は持たない）

pub mod clock;
pub mod id_generator;
pub mod queue_client;
pub mod secret_source;
pub mod store_writer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_client::QueueClient;
pub use self::secret_source::{SecretName, SecretSource};
pub use self::store_writer::StoreWriter;
