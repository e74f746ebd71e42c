//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock の時刻 + 乱数で ULID を作る

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{CompetitionId, JobId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn competition_id(&self) -> CompetitionId;

    fn job_id(&self) -> JobId;
}

/// ULID generator. With a FixedClock the timestamp part is deterministic.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn competition_id(&self) -> CompetitionId {
        CompetitionId::from(self.next())
    }

    fn job_id(&self) -> JobId {
        JobId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        assert_ne!(id_gen.job_id(), id_gen.job_id());
    }

    #[test]
    fn fixed_clock_pins_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.task_id();
        let id2 = id_gen.task_id();
        assert_ne!(id1, id2);

        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
