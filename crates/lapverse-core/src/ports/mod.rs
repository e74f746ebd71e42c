//! Ports - 外部コラボレーターとの境界（trait のみ）
//!
//! コアはここにある trait にのみ依存し、具体的な実装は impls か
//! 呼び出し側（CLI、HTTP サーバー）から注入されます。

pub mod burn_rate;
pub mod clock;
pub mod dependencies;
pub mod executor;
pub mod feature_flags;
pub mod id_generator;
pub mod promotion;
pub mod scorer;
pub mod shared_store;
pub mod tenant_directory;

pub use self::burn_rate::BurnRateLoader;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dependencies::{
    DependencyError, PostReceipt, Sentiment, SentimentLabel, SentimentService, SocialPoster,
};
pub use self::executor::{TaskExecution, TaskExecutor, VariantExecution, VariantExecutor};
pub use self::feature_flags::FeatureFlags;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::promotion::{PromotionPipeline, PromotionRequest};
pub use self::scorer::VariantScorer;
pub use self::shared_store::{SharedStore, StoreError};
pub use self::tenant_directory::TenantDirectory;
