//! Impls - ports の具象実装（単一プロセス / デモ用）

mod artifact_scorer;
mod content_executor;
mod hash_rollout;
mod inmem_store;
mod static_tenants;

pub use artifact_scorer::ArtifactScoreScorer;
pub use content_executor::ContentVariantExecutor;
pub use hash_rollout::HashRollout;
pub use inmem_store::InMemoryStore;
pub use static_tenants::StaticTenantDirectory;
