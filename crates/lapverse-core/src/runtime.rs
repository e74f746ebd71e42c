use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::queue::{JobContext, JobKind};

/// A handler for one job kind.
///
/// Jobs are delivered at least once, so handlers must be safe to re-run.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobContext) -> Result<(), CoreError>;
}

/// Registry of handlers (job kind -> handler).
///
/// Built during initialization (mutable), shared read-only by the workers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Result<(), CoreError> {
        if self.handlers.contains_key(&kind) {
            return Err(CoreError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: &JobKind) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Dispatches a leased job to its registered handler.
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub async fn execute(&self, job: &JobContext) -> Result<(), CoreError> {
        let handler = self
            .registry
            .get(&job.kind)
            .ok_or_else(|| CoreError::HandlerNotFound(job.kind.clone()))?;
        handler.handle(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CostCenter, TenantId};
    use crate::finops::FinOpsTagger;
    use crate::queue::QueueName;
    use ulid::Ulid;

    struct OkHandler;

    #[async_trait]
    impl JobHandler for OkHandler {
        async fn handle(&self, _job: &JobContext) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn job(kind: &str) -> JobContext {
        JobContext {
            job_id: Ulid::new().into(),
            queue: QueueName::Tasks,
            kind: JobKind::new(kind),
            payload: serde_json::json!({}),
            attempt: 1,
            max_attempts: 4,
            tags: FinOpsTagger::default().tag(&TenantId::new("t"), &CostCenter::new("c")),
        }
    }

    #[tokio::test]
    async fn runtime_executes_registered_handler() {
        let mut reg = HandlerRegistry::new();
        reg.register(JobKind::new("ok"), Arc::new(OkHandler)).unwrap();

        let rt = Runtime::new(Arc::new(reg));
        rt.execute(&job("ok")).await.unwrap();
    }

    #[tokio::test]
    async fn runtime_errors_when_handler_missing() {
        let rt = Runtime::new(Arc::new(HandlerRegistry::new()));
        let err = rt.execute(&job("missing")).await.unwrap_err();
        assert!(matches!(err, CoreError::HandlerNotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = HandlerRegistry::new();
        reg.register(JobKind::new("ok"), Arc::new(OkHandler)).unwrap();
        assert!(matches!(
            reg.register(JobKind::new("ok"), Arc::new(OkHandler)),
            Err(CoreError::DuplicateHandler(_))
        ));
        assert_eq!(reg.len(), 1);
    }
}
