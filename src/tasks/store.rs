use super::task::{Task, TaskPatch, TaskPriority, TaskStatus};
use chrono::{DateTime, Local, Utc, Weekday};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Raised by `add_task`/`update_task` when validation fails. Carries every
/// violated constraint, joined for display.
#[derive(Debug, Error)]
#[error("task validation failed: {}", .errors.join(", "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskEventKind {
    Added,
    Updated,
    Deleted,
    BulkUpdated,
}

pub const ALL_EVENT_KINDS: [TaskEventKind; 4] = [
    TaskEventKind::Added,
    TaskEventKind::Updated,
    TaskEventKind::Deleted,
    TaskEventKind::BulkUpdated,
];

/// Event envelope. Tasks are cloned snapshots, never live store state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
    pub timestamp: DateTime<Utc>,
}

/// Opaque handle returned by `TaskStore::on`. Registering the same closure
/// twice yields two distinct handles, each removable on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    kind: TaskEventKind,
    id: u64,
}

type Listener = Box<dyn FnMut(&TaskEvent)>;

/// Conjunction of optional predicates; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub tags: Vec<String>,
    pub search: Option<String>,
    pub due_from: Option<DateTime<Utc>>,
    pub due_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub enum SortField {
    Title,
    Priority,
    Status,
    CreatedAt,
    DueDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy)]
pub struct SortOptions {
    pub field: SortField,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub overdue: usize,
    pub by_priority: PriorityCounts,
}

/// In-memory owner of all tasks for one session. Multiple independent stores
/// may coexist; nothing here is global.
#[derive(Default)]
pub struct TaskStore {
    tasks: HashMap<String, Task>,
    listeners: HashMap<TaskEventKind, Vec<(u64, Listener)>>,
    next_subscription: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), ValidationError> {
        let errors = task.validate();
        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        let snapshot = task.clone();
        self.tasks.insert(task.id.clone(), task);
        self.emit(TaskEventKind::Added, Some(snapshot), None);
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Cloned snapshot of the whole collection; iteration order is
    /// unspecified.
    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    /// Validate-then-commit: the patch is applied to a scratch copy first, so
    /// a failed update leaves the stored task untouched. `Ok(false)` when the
    /// id is unknown.
    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> Result<bool, ValidationError> {
        let Some(current) = self.tasks.get(id) else {
            return Ok(false);
        };

        let mut updated = current.clone();
        updated.apply(patch);

        let errors = updated.validate();
        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        self.tasks.insert(id.to_string(), updated.clone());
        self.emit(TaskEventKind::Updated, Some(updated), None);
        Ok(true)
    }

    pub fn delete_task(&mut self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some(task) => {
                self.emit(TaskEventKind::Deleted, Some(task), None);
                true
            }
            None => false,
        }
    }

    /// Removes every id that exists; unknown ids are skipped. One
    /// `bulk-updated` event for the whole batch, never one per task.
    pub fn delete_tasks(&mut self, ids: &[String]) -> usize {
        let mut removed = Vec::new();
        for id in ids {
            if let Some(task) = self.tasks.remove(id) {
                removed.push(task);
            }
        }

        let count = removed.len();
        if !removed.is_empty() {
            self.emit(TaskEventKind::BulkUpdated, None, Some(removed));
        }
        count
    }

    pub fn clear_all_tasks(&mut self) {
        let removed: Vec<Task> = self.tasks.drain().map(|(_, task)| task).collect();
        self.emit(TaskEventKind::BulkUpdated, None, Some(removed));
    }

    pub fn filter_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks = self.get_all_tasks();

        if let Some(status) = filter.status {
            tasks.retain(|task| task.status == status);
        }
        if let Some(priority) = filter.priority {
            tasks.retain(|task| task.priority == priority);
        }
        if !filter.tags.is_empty() {
            tasks.retain(|task| filter.tags.iter().any(|tag| task.tags.contains(tag)));
        }
        if let Some(search) = &filter.search {
            if !search.is_empty() {
                let needle = search.to_lowercase();
                tasks.retain(|task| {
                    task.title.to_lowercase().contains(&needle)
                        || task
                            .description
                            .as_ref()
                            .is_some_and(|d| d.to_lowercase().contains(&needle))
                        || task.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
                });
            }
        }
        if let Some(from) = filter.due_from {
            tasks.retain(|task| task.due_date.is_some_and(|due| due >= from));
        }
        if let Some(to) = filter.due_to {
            tasks.retain(|task| task.due_date.is_some_and(|due| due <= to));
        }

        tasks
    }

    /// Single pass over the collection. All three priority buckets are always
    /// present; completed tasks never count as overdue.
    pub fn get_statistics(&self) -> TaskStatistics {
        let mut stats = TaskStatistics {
            total: self.tasks.len(),
            ..TaskStatistics::default()
        };

        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
            }
            match task.priority {
                TaskPriority::Low => stats.by_priority.low += 1,
                TaskPriority::Medium => stats.by_priority.medium += 1,
                TaskPriority::High => stats.by_priority.high += 1,
            }
            if task.is_overdue() {
                stats.overdue += 1;
            }
        }

        stats
    }

    /// Deduplicated union of every task's tags, sorted.
    pub fn get_all_tags(&self) -> Vec<String> {
        let tags: BTreeSet<String> = self
            .tasks
            .values()
            .flat_map(|task| task.tags.iter().cloned())
            .collect();
        tags.into_iter().collect()
    }

    /// Unknown ids are silently skipped. One `bulk-updated` event carrying
    /// the affected tasks, only when at least one changed.
    pub fn batch_update_status(&mut self, ids: &[String], status: TaskStatus) -> usize {
        let mut affected = Vec::new();
        for id in ids {
            if let Some(task) = self.tasks.get_mut(id) {
                task.apply(TaskPatch::status(status));
                affected.push(task.clone());
            }
        }

        let count = affected.len();
        if !affected.is_empty() {
            self.emit(TaskEventKind::BulkUpdated, None, Some(affected));
        }
        count
    }

    /// Upserts records keyed by their original id. Unreadable records are
    /// skipped and logged, never aborting the batch. Emits one `bulk-updated`
    /// with the resulting collection when anything was imported.
    pub fn import_tasks(&mut self, records: Vec<serde_json::Value>) -> usize {
        let mut imported = 0;
        for record in records {
            match serde_json::from_value::<Task>(record) {
                Ok(task) => {
                    self.tasks.insert(task.id.clone(), task);
                    imported += 1;
                }
                Err(err) => log::warn!("Skipping unreadable task record: {}", err),
            }
        }

        if imported > 0 {
            let all = self.get_all_tasks();
            self.emit(TaskEventKind::BulkUpdated, None, Some(all));
        }
        imported
    }

    pub fn export_tasks(&self) -> Vec<Task> {
        self.get_all_tasks()
    }

    pub fn on<F>(&mut self, kind: TaskEventKind, listener: F) -> Subscription
    where
        F: FnMut(&TaskEvent) + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        Subscription { kind, id }
    }

    /// Removes exactly the registration behind the handle. Returns false when
    /// it was already gone.
    pub fn off(&mut self, subscription: Subscription) -> bool {
        let Some(entries) = self.listeners.get_mut(&subscription.kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != subscription.id);
        entries.len() < before
    }

    /// Synchronous dispatch in registration order. A panicking listener is
    /// not caught and aborts the mutating caller.
    fn emit(&mut self, kind: TaskEventKind, task: Option<Task>, tasks: Option<Vec<Task>>) {
        let event = TaskEvent {
            kind,
            task,
            tasks,
            timestamp: Utc::now(),
        };
        if let Some(entries) = self.listeners.get_mut(&kind) {
            for (_, listener) in entries.iter_mut() {
                listener(&event);
            }
        }
    }

    /// Tasks due on the local calendar day.
    pub fn get_today_tasks(&self) -> Vec<Task> {
        let today = Local::now().date_naive();
        self.tasks
            .values()
            .filter(|task| {
                task.due_date
                    .is_some_and(|due| due.with_timezone(&Local).date_naive() == today)
            })
            .cloned()
            .collect()
    }

    /// Tasks due in the local week containing today, Sunday through Saturday.
    pub fn get_week_tasks(&self) -> Vec<Task> {
        let week = Local::now().date_naive().week(Weekday::Sun);
        self.tasks
            .values()
            .filter(|task| {
                task.due_date.is_some_and(|due| {
                    let local = due.with_timezone(&Local).date_naive();
                    week.first_day() <= local && local <= week.last_day()
                })
            })
            .cloned()
            .collect()
    }
}

/// Non-mutating sort over a task slice. Tasks without a due date always sort
/// after tasks with one, in both directions; that arm returns before the
/// direction flip.
pub fn sort_tasks(tasks: &[Task], options: SortOptions) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(|a, b| {
        let ordering = match options.field {
            SortField::Title => a
                .title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.title.cmp(&b.title)),
            SortField::Priority => a.priority.weight().cmp(&b.priority.weight()),
            SortField::Status => a.status.ordinal().cmp(&b.status.ordinal()),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::DueDate => match (a.due_date, b.due_date) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Greater,
                (Some(_), None) => return Ordering::Less,
                (Some(x), Some(y)) => x.cmp(&y),
            },
        };
        match options.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    sorted
}
