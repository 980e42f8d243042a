use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_TAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn label(&self) -> &'static str {
        match self {
            TaskPriority::Low => "Low",
            TaskPriority::Medium => "Medium",
            TaskPriority::High => "High",
        }
    }

    /// Severity weight used for sorting: low < medium < high.
    pub fn weight(&self) -> u8 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Medium => 2,
            TaskPriority::High => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
        }
    }

    /// Fixed ordinal used for sorting: pending < in_progress < completed.
    pub fn ordinal(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed => 2,
        }
    }
}

/// Payload for creating a task. Id and timestamps are generated.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// Per-field patch for `Task::apply`. Absent fields are left untouched;
/// id, created_at and the derived timestamps cannot be patched at all.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        TaskPatch {
            status: Some(status),
            ..TaskPatch::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(data: NewTask) -> Self {
        let now = Utc::now();
        let completed_at = if data.status == TaskStatus::Completed {
            Some(now)
        } else {
            None
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: data.title,
            description: data.description,
            priority: data.priority,
            status: data.status,
            due_date: data.due_date,
            tags: data.tags,
            created_at: now,
            updated_at: now,
            completed_at,
        }
    }

    /// Applies every field present in the patch and refreshes `updated_at`.
    /// `completed_at` is reconciled only when the patch carried a status:
    /// stamped on the transition into completed, cleared when the new status
    /// is anything else.
    pub fn apply(&mut self, patch: TaskPatch) {
        let old_status = self.status;

        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = Some(due_date);
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }

        self.updated_at = Utc::now();

        if let Some(status) = patch.status {
            if status == TaskStatus::Completed && old_status != TaskStatus::Completed {
                self.completed_at = Some(Utc::now());
            } else if status != TaskStatus::Completed {
                self.completed_at = None;
            }
        }
    }

    /// Flips between completed and pending. A task toggled out of completed
    /// always lands on pending, never back on in_progress.
    pub fn toggle_complete(&mut self) {
        if self.status == TaskStatus::Completed {
            self.status = TaskStatus::Pending;
            self.completed_at = None;
        } else {
            self.status = TaskStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();
    }

    pub fn add_tag(&mut self, tag: String) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.updated_at = Utc::now();
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        if self.tags.iter().any(|t| t == tag) {
            self.tags.retain(|t| t != tag);
            self.updated_at = Utc::now();
        }
    }

    pub fn is_overdue(&self) -> bool {
        match self.due_date {
            Some(due) if self.status != TaskStatus::Completed => Utc::now() > due,
            _ => false,
        }
    }

    /// Days until the due date, rounded up. Negative means overdue.
    pub fn days_until_due(&self) -> Option<i64> {
        let due = self.due_date?;
        let secs = (due - Utc::now()).num_seconds();
        let days = secs.div_euclid(86_400);
        if secs.rem_euclid(86_400) > 0 {
            Some(days + 1)
        } else {
            Some(days)
        }
    }

    /// Returns every violated constraint, not just the first. Callers decide
    /// whether to reject the task; mutators never enforce these bounds.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.title.trim().is_empty() {
            errors.push("Title cannot be empty".to_string());
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            errors.push(format!("Title cannot exceed {} characters", MAX_TITLE_LEN));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                errors.push(format!(
                    "Description cannot exceed {} characters",
                    MAX_DESCRIPTION_LEN
                ));
            }
        }
        if let Some(due) = self.due_date {
            if due < Utc::now() {
                errors.push("Due date cannot be in the past".to_string());
            }
        }
        if self.tags.len() > MAX_TAGS {
            errors.push(format!("Cannot have more than {} tags", MAX_TAGS));
        }

        errors
    }

    /// A copy with a fresh identity: new id and timestamps, title suffixed,
    /// status reset to pending.
    pub fn duplicate(&self) -> Task {
        Task::new(NewTask {
            title: format!("{} (copy)", self.title),
            description: self.description.clone(),
            priority: self.priority,
            status: TaskStatus::Pending,
            due_date: self.due_date,
            tags: self.tags.clone(),
        })
    }
}
