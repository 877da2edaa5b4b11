//! `file_lookup` - find files under the workspace root, or read one
//!
//! - `{"query": "report"}` matches file names by substring (case-insensitive)
//! - `{"query": "**/*.md"}` matches relative paths by glob
//! - `{"path": "notes/todo.txt"}` reads a file (UTF-8, truncated)
//!
//! Paths never escape the workspace root.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::Tool;
use crate::context::RunScope;

/// Default cap on returned matches
const MAX_RESULTS: usize = 50;

/// Bytes of file content returned by a read
const MAX_READ_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct LookupParams {
    query: Option<String>,
    path: Option<String>,
    max_results: Option<usize>,
}

pub struct FileLookupTool {
    root: PathBuf,
}

impl FileLookupTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn search(&self, query: &str, limit: usize) -> Result<Value> {
        let root = self.root.canonicalize().with_context(|| {
            format!("Workspace root '{}' is not accessible", self.root.display())
        })?;

        let matcher = Matcher::new(query)?;
        let mut matches = Vec::new();
        let mut truncated = false;

        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            if !matcher.is_match(relative) {
                continue;
            }
            if matches.len() == limit {
                truncated = true;
                break;
            }
            matches.push(relative.to_string_lossy().replace('\\', "/"));
        }

        matches.sort();
        Ok(json!({
            "query": query,
            "count": matches.len(),
            "matches": matches,
            "truncated": truncated,
        }))
    }

    async fn read(&self, path: &str) -> Result<Value> {
        let resolved = self.resolve(path)?;
        let bytes = tokio::fs::read(&resolved)
            .await
            .with_context(|| format!("Failed to read '{}'", path))?;

        let truncated = bytes.len() > MAX_READ_BYTES;
        let content = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_READ_BYTES)]);
        Ok(json!({
            "path": path,
            "content": content,
            "truncated": truncated,
        }))
    }

    /// Resolve a relative path, rejecting anything outside the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let requested = Path::new(path);
        if requested.is_absolute()
            || requested
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            bail!("Path '{}' must be relative to the workspace root", path);
        }

        let root = self.root.canonicalize().with_context(|| {
            format!("Workspace root '{}' is not accessible", self.root.display())
        })?;
        let resolved = root
            .join(requested)
            .canonicalize()
            .with_context(|| format!("File '{}' not found", path))?;

        // symlinks can still point outside
        if !resolved.starts_with(&root) {
            bail!("Path '{}' escapes the workspace root", path);
        }
        Ok(resolved)
    }
}

enum Matcher {
    Glob(glob::Pattern),
    Substring(String),
}

impl Matcher {
    fn new(query: &str) -> Result<Self> {
        if query.contains(['*', '?', '[']) {
            let pattern = glob::Pattern::new(query)
                .with_context(|| format!("Invalid glob pattern '{}'", query))?;
            Ok(Self::Glob(pattern))
        } else {
            Ok(Self::Substring(query.to_lowercase()))
        }
    }

    fn is_match(&self, relative: &Path) -> bool {
        match self {
            Self::Glob(pattern) => pattern.matches_path(relative),
            Self::Substring(needle) => relative
                .file_name()
                .map(|name| name.to_string_lossy().to_lowercase().contains(needle.as_str()))
                .unwrap_or(false),
        }
    }
}

#[async_trait]
impl Tool for FileLookupTool {
    fn name(&self) -> &str {
        "file_lookup"
    }

    fn description(&self) -> &str {
        "Search file names in the workspace by substring or glob, or read a file by relative path"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "path": { "type": "string", "minLength": 1 },
                "max_results": { "type": "integer", "minimum": 1 }
            },
            "anyOf": [
                { "required": ["query"] },
                { "required": ["path"] }
            ]
        })
    }

    async fn invoke(&self, params: Value, _scope: &RunScope) -> Result<Value> {
        let params: LookupParams =
            serde_json::from_value(params).context("Malformed file_lookup params")?;

        if let Some(path) = params.path.as_deref() {
            return self.read(path).await;
        }

        let query = params.query.unwrap_or_default();
        let limit = params.max_results.unwrap_or(MAX_RESULTS);
        self.search(&query, limit)
    }
}
