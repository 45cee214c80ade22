//! Task status surface.
//!
//! The external task supervisor (HTTP front end, queue runner) only ever
//! sees this module: a status enum, progress, a free-text message and the
//! final per-product-type counts. The registry sits behind the
//! [`StateStore`] trait so orchestration logic never depends on how task
//! state is held; [`MemoryStateStore`] is the in-process implementation,
//! and a persistent or distributed store can replace it without touching
//! the batch layer.

mod store;

pub use store::{MemoryStateStore, StateStore};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of a batch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Success/failure tally for one product type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCounts {
    pub success: u64,
    pub failed: u64,
}

/// Final statistics of a batch task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Total catalog sources considered
    pub total_sources: usize,
    /// Sources that resolved to no tile
    pub no_tile: usize,
    /// Whether the catalog was truncated at the row cap
    pub truncated: bool,
    /// Per-product-type outcome counts
    pub per_product: BTreeMap<String, ProductCounts>,
    /// Bounded sample of failure reasons
    pub failure_samples: Vec<String>,
    /// Extractions served from cache instead of recomputed
    pub cache_hits: u64,
}

/// One batch task as seen by the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// Progress in percent, 0–100
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stats: Option<TaskStats>,
    /// Location of the result set, once completed
    pub output_path: Option<String>,
}

impl Task {
    /// Create a queued task with a fresh id.
    pub fn create() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Queued,
            progress: 0,
            message: "Task created, awaiting processing".to_string(),
            created_at: now,
            updated_at: now,
            stats: None,
            output_path: None,
        }
    }

    /// Update status, refreshing the modification stamp.
    pub fn set_status(&mut self, status: TaskStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    /// Update progress (clamped to 100), refreshing the modification stamp.
    pub fn set_progress(&mut self, progress: u8, message: impl Into<String>) {
        self.progress = progress.min(100);
        let message = message.into();
        if !message.is_empty() {
            self.message = message;
        }
        self.updated_at = Utc::now();
    }

    /// Mark completed with final statistics.
    pub fn complete(&mut self, stats: TaskStats, output_path: Option<String>) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.stats = Some(stats);
        self.output_path = output_path;
        self.updated_at = Utc::now();
    }

    /// Mark failed with a reason and whatever statistics were gathered.
    pub fn fail(&mut self, message: impl Into<String>, stats: Option<TaskStats>) {
        self.status = TaskStatus::Failed;
        self.message = message.into();
        self.stats = stats;
        self.updated_at = Utc::now();
    }

    /// Request cancellation. Terminal tasks are immune; returns whether
    /// the state changed.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.set_status(TaskStatus::Cancelled, "Task cancelled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_queued() {
        let task = Task::create();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, 0);
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_progress_clamped() {
        let mut task = Task::create();
        task.set_progress(250, "");
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_empty_progress_message_keeps_previous() {
        let mut task = Task::create();
        task.set_progress(10, "working");
        task.set_progress(20, "");
        assert_eq!(task.message, "working");
    }

    #[test]
    fn test_cancel_rules() {
        let mut task = Task::create();
        assert!(task.cancel());
        assert_eq!(task.status, TaskStatus::Cancelled);

        let mut done = Task::create();
        done.complete(TaskStats::default(), None);
        assert!(!done.cancel());
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serialization_forms() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
    }
}
