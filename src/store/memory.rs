//! In-memory run store

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{RunPatch, RunRecord, RunStore};
use crate::context::RunScope;
use crate::crew::{Crew, Inputs};
use crate::error::{CrewError, Result};

/// Thread-safe in-memory store (clones share records)
#[derive(Clone, Default, Debug)]
pub struct InMemoryRunStore {
    records: Arc<DashMap<String, RunRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a record
    pub fn record(&self, run_id: &str) -> Option<RunRecord> {
        self.records.get(run_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run_id: &str, crew: &Crew, scope: &RunScope, inputs: &Inputs) -> Result<()> {
        if self.records.contains_key(run_id) {
            return Err(CrewError::Store {
                run_id: run_id.to_string(),
                reason: "run already exists".to_string(),
            });
        }
        self.records
            .insert(run_id.to_string(), RunRecord::new(run_id, crew, scope, inputs));
        Ok(())
    }

    async fn update(&self, run_id: &str, patch: RunPatch) -> Result<()> {
        let mut record = self
            .records
            .get_mut(run_id)
            .ok_or_else(|| CrewError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        record.apply(patch);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.record(run_id))
    }
}
