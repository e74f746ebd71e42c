//! lapverse-core
//!
//! Control plane for tenant-submitted AI work: idempotent admission, margin
//! and error-budget guardrails, breaker-protected dependency calls, retrying
//! worker queues and the self-compete tournament.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, money, tenant, task, competition, budget, state）
//! - **ports**: 外部コラボレーターの trait（SharedStore, Clock, FeatureFlags, executors, ...）
//! - **impls**: ports の単一プロセス向け実装（InMemoryStore, HashRollout, ...）
//! - **admission**: 冪等性ゲート、コスト見積もり、マージンガードレール、SLO トラッカー
//! - **resilience**: 依存ごとのサーキットブレーカー
//! - **queue / runtime / worker**: ジョブキュー、ハンドラー登録、ワーカーグループ
//! - **tournament**: バリアントの fan-out、バリア、採点、チャンピオン選出、進化
//! - **app**: 組み立て（CoreBuilder）と受付・照会の表面（LapVerseCore）
//! - **api**: HTTP フレームワーク非依存の境界（ヘッダー / JSON → ステータスコード）

pub mod admission;
pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod finops;
pub mod impls;
pub mod metrics;
pub mod ports;
pub mod queue;
pub mod repository;
pub mod resilience;
pub mod runtime;
pub mod tournament;
pub mod worker;

pub use app::{CoreBuilder, LapVerseCore, RunningCore, Submission};
pub use config::CoreConfig;
pub use error::{CoreError, ErrorKind};
