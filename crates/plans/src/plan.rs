//! Plan data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a plan sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStatus {
    Draft,
    InReview,
    Approved,
    InProgress,
    Completed,
    Abandoned,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InReview => "in-review",
            Self::Approved => "approved",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// A single task within a plan.
///
/// `completed` means the implementation is done; `verified` means it has
/// been validated. Verification requires prior completion, so
/// `verified ⇒ completed` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub tests: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verification_notes: String,
}

impl PlanTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            description: description.into(),
            details: String::new(),
            files: Vec::new(),
            tests: String::new(),
            dependencies: Vec::new(),
            completed: false,
            verified: false,
            verification_notes: String::new(),
        }
    }
}

/// A timestamped progress log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A structured plan for complex changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub status: PlanStatus,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
    #[serde(default)]
    pub progress_log: Vec<ProgressEntry>,
    #[serde(default)]
    pub completion_notes: String,
}

impl Plan {
    pub fn new(title: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: short_id(),
            title: title.into(),
            status: PlanStatus::Draft,
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            context: String::new(),
            approach: String::new(),
            tasks: Vec::new(),
            progress_log: Vec::new(),
            completion_notes: String::new(),
        }
    }

    pub fn add_progress(&mut self, message: impl Into<String>) {
        self.progress_log.push(ProgressEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Add a task and return its id.
    pub fn add_task(&mut self, description: impl Into<String>) -> String {
        let task = PlanTask::new(description);
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    /// Mark a task's implementation done. Returns false on unknown id.
    pub fn complete_task(&mut self, task_id: &str) -> bool {
        match self.task_mut(task_id) {
            Some(task) => {
                task.completed = true;
                true
            }
            None => false,
        }
    }

    /// Mark a completed task verified. Returns false on unknown id or when
    /// the task has not been completed yet (verify requires complete).
    pub fn verify_task(&mut self, task_id: &str, notes: impl Into<String>) -> bool {
        match self.task_mut(task_id) {
            Some(task) if task.completed => {
                task.verified = true;
                task.verification_notes = notes.into();
                true
            }
            _ => false,
        }
    }

    pub fn all_tasks_verified(&self) -> bool {
        self.tasks.iter().all(|task| task.verified)
    }

    pub fn unverified_tasks(&self) -> Vec<&PlanTask> {
        self.tasks.iter().filter(|task| !task.verified).collect()
    }

    fn task_mut(&mut self, task_id: &str) -> Option<&mut PlanTask> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_values_are_kebab_case() {
        assert_eq!(
            serde_json::to_string(&PlanStatus::InReview).unwrap(),
            "\"in-review\""
        );
        assert_eq!(
            serde_json::to_string(&PlanStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
    }

    #[test]
    fn verify_requires_completion_first() {
        let mut plan = Plan::new("test", "sess");
        let task_id = plan.add_task("write the parser");

        assert!(!plan.verify_task(&task_id, "tests pass"));
        assert!(plan.complete_task(&task_id));
        assert!(plan.verify_task(&task_id, "tests pass"));

        let task = &plan.tasks[0];
        assert!(task.completed && task.verified);
        assert_eq!(task.verification_notes, "tests pass");
    }

    #[test]
    fn unknown_task_ids_are_rejected() {
        let mut plan = Plan::new("test", "sess");
        assert!(!plan.complete_task("nope"));
        assert!(!plan.verify_task("nope", ""));
    }

    #[test]
    fn all_tasks_verified_over_empty_plan_is_true() {
        let plan = Plan::new("empty", "sess");
        assert!(plan.all_tasks_verified());
    }
}
