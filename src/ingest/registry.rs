//! Process-wide registry of outstanding and recently finished ingestions.
//!
//! One entry exists per in-flight document; a second ingestion request for
//! the same document is rejected while the first holds its guard. Finished
//! entries are retained for inspection and evicted oldest-first beyond a
//! configured bound, so the registry never grows without limit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::RetrievalError;

/// Lifecycle state of one ingestion job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot of a single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    pub job_id: Uuid,
    pub document_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure message when `status` is [`JobStatus::Failed`].
    pub error: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    running: FxHashMap<String, JobEntry>,
    /// Finished entries, oldest first.
    finished: Vec<JobEntry>,
}

/// Per-document ingestion serialization and job bookkeeping.
#[derive(Clone)]
pub struct IngestionRegistry {
    state: Arc<Mutex<RegistryState>>,
    retain: usize,
}

impl IngestionRegistry {
    /// Creates a registry retaining up to `retain` finished entries.
    pub fn new(retain: usize) -> Self {
        IngestionRegistry {
            state: Arc::new(Mutex::new(RegistryState::default())),
            retain,
        }
    }

    /// Claims the per-document slot, rejecting concurrent ingestions of the
    /// same document with [`RetrievalError::IngestionInProgress`].
    ///
    /// The returned guard releases the slot on drop, recording the job as
    /// failed unless [`JobGuard::complete`]/[`JobGuard::fail`] ran first.
    pub fn begin(&self, document_id: &str) -> Result<JobGuard, RetrievalError> {
        let mut state = self.state.lock();
        if state.running.contains_key(document_id) {
            return Err(RetrievalError::IngestionInProgress(document_id.to_string()));
        }
        let entry = JobEntry {
            job_id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        state.running.insert(document_id.to_string(), entry);
        Ok(JobGuard {
            registry: self.clone(),
            document_id: document_id.to_string(),
            finished: false,
        })
    }

    /// All running entries plus retained finished ones, newest first.
    pub fn snapshot(&self) -> Vec<JobEntry> {
        let state = self.state.lock();
        let mut entries: Vec<JobEntry> = state.running.values().cloned().collect();
        entries.extend(state.finished.iter().rev().cloned());
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        entries
    }

    /// Drops retained finished entries for a document (running ones are
    /// untouched). Returns how many entries were evicted.
    pub fn evict(&self, document_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.finished.len();
        state.finished.retain(|e| e.document_id != document_id);
        before - state.finished.len()
    }

    fn finish(&self, document_id: &str, status: JobStatus, error: Option<String>) {
        let mut state = self.state.lock();
        if let Some(mut entry) = state.running.remove(document_id) {
            entry.status = status;
            entry.finished_at = Some(Utc::now());
            entry.error = error;
            state.finished.push(entry);
            // Oldest-first eviction keeps retention bounded.
            let overflow = state.finished.len().saturating_sub(self.retain);
            if overflow > 0 {
                state.finished.drain(..overflow);
            }
        }
    }
}

/// RAII claim on a document's ingestion slot.
pub struct JobGuard {
    registry: IngestionRegistry,
    document_id: String,
    finished: bool,
}

impl JobGuard {
    /// Marks the job completed and releases the slot.
    pub fn complete(mut self) {
        self.finished = true;
        self.registry
            .finish(&self.document_id, JobStatus::Completed, None);
    }

    /// Marks the job failed and releases the slot.
    pub fn fail(mut self, error: &RetrievalError) {
        self.finished = true;
        self.registry
            .finish(&self.document_id, JobStatus::Failed, Some(error.to_string()));
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        // Dropping without an explicit outcome (panic, early return) still
        // releases the slot so the document is not wedged.
        if !self.finished {
            self.registry.finish(
                &self.document_id,
                JobStatus::Failed,
                Some("ingestion aborted".to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_rejected_until_release() {
        let registry = IngestionRegistry::new(8);
        let guard = registry.begin("doc").unwrap();
        assert!(matches!(
            registry.begin("doc"),
            Err(RetrievalError::IngestionInProgress(_))
        ));
        // Different documents are independent.
        registry.begin("other").unwrap().complete();

        guard.complete();
        registry.begin("doc").unwrap().complete();
    }

    #[test]
    fn drop_without_outcome_records_failure() {
        let registry = IngestionRegistry::new(8);
        drop(registry.begin("doc").unwrap());
        let entries = registry.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, JobStatus::Failed);
        assert!(entries[0].error.as_deref().unwrap().contains("aborted"));
    }

    #[test]
    fn finished_entries_are_evicted_beyond_retention() {
        let registry = IngestionRegistry::new(2);
        for i in 0..5 {
            registry.begin(&format!("doc-{i}")).unwrap().complete();
        }
        let finished = registry.snapshot();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].document_id, "doc-4");
        assert_eq!(finished[1].document_id, "doc-3");
    }

    #[test]
    fn explicit_evict_removes_finished_entries() {
        let registry = IngestionRegistry::new(8);
        registry.begin("doc").unwrap().complete();
        assert_eq!(registry.evict("doc"), 1);
        assert!(registry.snapshot().is_empty());
    }
}
