//! JSON-file run store: `<dir>/<run_id>.json`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{RunPatch, RunRecord, RunStore};
use crate::context::RunScope;
use crate::crew::{Crew, Inputs};
use crate::error::{CrewError, Result};

#[derive(Debug, Clone)]
pub struct JsonFileRunStore {
    dir: PathBuf,
}

impl JsonFileRunStore {
    /// Store under `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    fn store_err(run_id: &str, reason: impl std::fmt::Display) -> CrewError {
        CrewError::Store {
            run_id: run_id.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn write(&self, record: &RunRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::store_err(&record.run_id, e))?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Self::store_err(&record.run_id, e))?;

        // readers never see a half-written record
        let path = self.path_for(&record.run_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Self::store_err(&record.run_id, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::store_err(&record.run_id, e))?;

        debug!(run_id = %record.run_id, path = %path.display(), "Run record written");
        Ok(())
    }
}

#[async_trait]
impl RunStore for JsonFileRunStore {
    async fn create(&self, run_id: &str, crew: &Crew, scope: &RunScope, inputs: &Inputs) -> Result<()> {
        if tokio::fs::try_exists(self.path_for(run_id)).await.unwrap_or(false) {
            return Err(Self::store_err(run_id, "run already exists"));
        }
        self.write(&RunRecord::new(run_id, crew, scope, inputs)).await
    }

    async fn update(&self, run_id: &str, patch: RunPatch) -> Result<()> {
        let mut record = self.get(run_id).await?.ok_or_else(|| CrewError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        record.apply(patch);
        self.write(&record).await
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let content = match tokio::fs::read_to_string(self.path_for(run_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::store_err(run_id, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Self::store_err(run_id, e))
    }
}
