//! Task/Competition records kept in the SharedStore.
//!
//! Each record lives under one key and is only ever changed with
//! compare-and-swap, so concurrent workers never lose each other's writes.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{Competition, CompetitionId, Task, TaskId};
use crate::error::CoreError;
use crate::ports::SharedStore;

/// CAS attempts before an update gives up as transient contention.
const MAX_CAS_ATTEMPTS: usize = 64;

pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Id: Display + Send + Sync;

    const PREFIX: &'static str;

    fn id(&self) -> Self::Id;
}

impl Record for Task {
    type Id = TaskId;
    const PREFIX: &'static str = "task";

    fn id(&self) -> TaskId {
        self.id
    }
}

impl Record for Competition {
    type Id = CompetitionId;
    const PREFIX: &'static str = "competition";

    fn id(&self) -> CompetitionId {
        self.id
    }
}

pub struct RecordStore<T> {
    store: Arc<dyn SharedStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> RecordStore<T> {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    fn key(id: &T::Id) -> String {
        format!("record:{}:{id}", T::PREFIX)
    }

    /// Fails if a record with the same id already exists.
    pub async fn insert(&self, record: &T) -> Result<(), CoreError> {
        let key = Self::key(&record.id());
        let created = self
            .store
            .set_if_absent(&key, serde_json::to_value(record)?, None)
            .await?;
        if !created {
            return Err(CoreError::Validation(format!("{key} already exists")));
        }
        Ok(())
    }

    pub async fn get(&self, id: &T::Id) -> Result<Option<T>, CoreError> {
        match self.store.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-CAS loop.
    ///
    /// `apply` may run more than once and must only touch the record it is
    /// given. Returning `Ok(false)` leaves the stored record untouched.
    /// Returns the resulting record and whether this call changed it.
    pub async fn update<F>(&self, id: &T::Id, mut apply: F) -> Result<(T, bool), CoreError>
    where
        F: FnMut(&mut T) -> Result<bool, CoreError> + Send,
    {
        let key = Self::key(id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let raw: Value = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("{} {id}", T::PREFIX)))?;
            let mut record: T = serde_json::from_value(raw.clone())?;
            if !apply(&mut record)? {
                return Ok((record, false));
            }
            let next = serde_json::to_value(&record)?;
            if self.store.compare_and_swap(&key, &raw, next, None).await? {
                return Ok((record, true));
            }
            tokio::task::yield_now().await;
        }
        Err(CoreError::Transient(format!("contention updating {key}")))
    }
}
