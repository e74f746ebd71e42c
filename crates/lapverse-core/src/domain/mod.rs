//! Domain model (ids, money, tenants, tasks, competitions, budgets, states).

pub mod budget;
pub mod competition;
pub mod ids;
pub mod money;
pub mod state;
pub mod task;
pub mod tenant;

pub use budget::BudgetState;
pub use competition::{Competition, Variant, VariantOutcome};
pub use ids::{CompetitionId, JobId, TaskId};
pub use money::Usd;
pub use state::{CompetitionStatus, Lifecycle, TaskStatus};
pub use task::{Complexity, Requirements, Task, TaskPayload, TaskType};
pub use tenant::{CostCenter, IdempotencyKey, Priority, TenantId};
