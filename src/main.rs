mod storage;
mod tasks;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use colored::Colorize;
use console::Term;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use std::error::Error;
use std::fs;
use std::sync::Arc;

use storage::backend::{FileBackend, KeyValueBackend, MemoryBackend};
use storage::service::{Preferences, StorageService, Theme, DEFAULT_AUTOSAVE_DELAY};
use tasks::store::{
    sort_tasks, SortDirection, SortField, SortOptions, TaskEventKind, TaskFilter, TaskStore,
    ValidationError, ALL_EVENT_KINDS,
};
use tasks::task::{NewTask, Task, TaskPatch, TaskPriority, TaskStatus};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let backend: Arc<dyn KeyValueBackend> = match data_backend() {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            eprintln!(
                "⚠️  Warning: Could not open the data directory ({}), keeping tasks in memory",
                err
            );
            Arc::new(MemoryBackend::new())
        }
    };
    let storage = StorageService::new(backend);
    let mut preferences = storage.load_preferences();

    let mut store = TaskStore::new();
    let saved = storage.load_tasks();
    if !saved.is_empty() {
        let records = saved
            .iter()
            .filter_map(|task| serde_json::to_value(task).ok())
            .collect();
        store.import_tasks(records);
    }

    // ==============================
    // 📟 QUICK MODES
    // ==============================
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "export") {
        println!("{}", storage.export_data());
        return Ok(());
    }

    if args.iter().any(|a| a == "stats") {
        print_statistics(&store);
        return Ok(());
    }

    if preferences.enable_notifications {
        for kind in ALL_EVENT_KINDS {
            store.on(kind, |event| {
                let what = match event.kind {
                    TaskEventKind::Added => "added",
                    TaskEventKind::Updated => "updated",
                    TaskEventKind::Deleted => "deleted",
                    TaskEventKind::BulkUpdated => "changed",
                };
                match (&event.task, &event.tasks) {
                    (Some(task), _) => println!("  {} {} — {}", "✔".green(), what, task.title),
                    (_, Some(tasks)) => {
                        println!("  {} {} {} task(s)", "✔".green(), what, tasks.len())
                    }
                    _ => {}
                }
            });
        }
    }

    println!("📋 taskdeck — {} task(s) loaded\n", store.get_all_tasks().len());

    loop {
        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("What do you want to do?")
            .items(&[
                "📋 List tasks",
                "➕ Add task",
                "✏️  Edit task",
                "✅ Toggle complete",
                "📄 Duplicate task",
                "🗑️  Delete tasks",
                "🔍 Search & filter",
                "📊 Statistics",
                "🏷️  Tags",
                "📅 Today / this week",
                "💾 Backup & restore",
                "📦 Storage info",
                "⚙️  Preferences",
                "🚪 Quit",
            ])
            .default(0)
            .interact()?;

        Term::stdout().clear_screen().ok();

        let mutated = match choice {
            0 => {
                list_tasks(&store, &preferences)?;
                false
            }
            1 => add_task_flow(&mut store, &preferences)?,
            2 => edit_task_flow(&mut store)?,
            3 => toggle_flow(&mut store)?,
            4 => duplicate_flow(&mut store)?,
            5 => delete_flow(&mut store)?,
            6 => {
                search_flow(&store)?;
                false
            }
            7 => {
                print_statistics(&store);
                false
            }
            8 => {
                tags_flow(&store)?;
                false
            }
            9 => {
                agenda_flow(&store)?;
                false
            }
            10 => backup_flow(&mut store, &storage)?,
            11 => {
                storage_info_flow(&storage);
                false
            }
            12 => {
                preferences_flow(&storage, &mut preferences)?;
                false
            }
            _ => break,
        };

        if mutated && preferences.auto_save {
            storage.auto_save(store.get_all_tasks(), DEFAULT_AUTOSAVE_DELAY);
        }
        println!();
    }

    // The debounced autosave is not awaitable, so flush before exiting.
    if storage.save_tasks(&store.get_all_tasks()) {
        println!("👋 Saved. Bye.");
    } else {
        eprintln!("⚠️  Warning: Could not save tasks on exit");
    }
    Ok(())
}

fn data_backend() -> Result<FileBackend, Box<dyn Error>> {
    let dir = dirs::data_dir()
        .ok_or("no data directory on this platform")?
        .join("taskdeck");
    Ok(FileBackend::new(dir)?)
}

fn print_validation_errors(err: &ValidationError) {
    println!("{}", "Task not saved:".red().bold());
    for message in &err.errors {
        println!("  • {}", message.red());
    }
}

fn task_line(task: &Task) -> String {
    let checkbox = if task.status == TaskStatus::Completed {
        "☑"
    } else {
        "☐"
    };

    let priority = match task.priority {
        TaskPriority::High => task.priority.label().red().to_string(),
        TaskPriority::Medium => task.priority.label().yellow().to_string(),
        TaskPriority::Low => task.priority.label().green().to_string(),
    };

    let mut line = format!("{} {} [{}]", checkbox, task.title, priority);

    if let Some(due) = task.due_date {
        let local = due.with_timezone(&Local);
        if task.is_overdue() {
            line.push_str(&format!(" 🔥 {}", local.format("%Y-%m-%d").to_string().red()));
        } else if let Some(days) = task.days_until_due() {
            line.push_str(&format!(" 📅 {} ({}d)", local.format("%Y-%m-%d"), days));
        }
    }
    if !task.tags.is_empty() {
        line.push_str(&format!(" #{}", task.tags.join(" #")).dimmed().to_string());
    }
    line
}

fn list_tasks(store: &TaskStore, preferences: &Preferences) -> Result<(), Box<dyn Error>> {
    let mut tasks = store.get_all_tasks();
    if !preferences.show_completed_tasks {
        tasks.retain(|task| task.status != TaskStatus::Completed);
    }
    if tasks.is_empty() {
        println!("{}", "Nothing here yet. Add a task!".dimmed());
        return Ok(());
    }

    let field = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Sort by")
        .items(&["Created", "Due date", "Priority", "Title", "Status"])
        .default(0)
        .interact()?;
    let field = match field {
        1 => SortField::DueDate,
        2 => SortField::Priority,
        3 => SortField::Title,
        4 => SortField::Status,
        _ => SortField::CreatedAt,
    };
    let descending = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Descending?")
        .default(false)
        .interact()?;

    let sorted = sort_tasks(
        &tasks,
        SortOptions {
            field,
            direction: if descending {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        },
    );

    println!();
    for task in &sorted {
        println!("  {}", task_line(task));
        if let Some(description) = &task.description {
            println!("      {}", description.dimmed());
        }
    }
    Ok(())
}

fn pick_task(store: &TaskStore, prompt: &str) -> Result<Option<String>, Box<dyn Error>> {
    let tasks = sort_tasks(
        &store.get_all_tasks(),
        SortOptions {
            field: SortField::CreatedAt,
            direction: SortDirection::Asc,
        },
    );
    if tasks.is_empty() {
        println!("{}", "No tasks to pick from.".dimmed());
        return Ok(None);
    }

    let labels: Vec<String> = tasks.iter().map(task_line).collect();
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(Some(tasks[choice].id.clone()))
}

fn prompt_priority(default: TaskPriority) -> Result<TaskPriority, Box<dyn Error>> {
    let options = [TaskPriority::Low, TaskPriority::Medium, TaskPriority::High];
    let default_index = options.iter().position(|p| *p == default).unwrap_or(1);
    let labels: Vec<&str> = options.iter().map(|p| p.label()).collect();
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Priority")
        .items(&labels)
        .default(default_index)
        .interact()?;
    Ok(options[choice])
}

fn prompt_status(default: TaskStatus) -> Result<TaskStatus, Box<dyn Error>> {
    let options = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];
    let default_index = options.iter().position(|s| *s == default).unwrap_or(0);
    let labels: Vec<&str> = options.iter().map(|s| s.label()).collect();
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Status")
        .items(&labels)
        .default(default_index)
        .interact()?;
    Ok(options[choice])
}

/// Accepts `YYYY-MM-DD` (due at end of that local day) or `YYYY-MM-DD HH:MM`.
fn parse_due_date(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let end_of_day = date.and_hms_opt(23, 59, 59)?;
        return end_of_day
            .and_local_timezone(Local)
            .earliest()
            .map(|local| local.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M") {
        return naive
            .and_local_timezone(Local)
            .earliest()
            .map(|local| local.with_timezone(&Utc));
    }
    None
}

fn split_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn add_task_flow(
    store: &mut TaskStore,
    preferences: &Preferences,
) -> Result<bool, Box<dyn Error>> {
    println!("📝 New task");

    let title: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Title")
        .interact_text()?;

    let description: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Description (optional)")
        .allow_empty(true)
        .interact_text()?;

    let priority = prompt_priority(preferences.default_priority)?;
    let status = prompt_status(preferences.default_status)?;

    let due_input: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Due date YYYY-MM-DD (optional)")
        .allow_empty(true)
        .interact_text()?;
    let due_date = parse_due_date(&due_input);
    if due_date.is_none() && !due_input.trim().is_empty() {
        println!("{}", "Could not read that date, leaving it unset.".yellow());
    }

    let tags_input: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Tags (comma-separated, optional)")
        .allow_empty(true)
        .interact_text()?;

    let task = Task::new(NewTask {
        title,
        description: if description.trim().is_empty() {
            None
        } else {
            Some(description)
        },
        priority,
        status,
        due_date,
        tags: split_tags(&tags_input),
    });

    match store.add_task(task) {
        Ok(()) => Ok(true),
        Err(err) => {
            print_validation_errors(&err);
            Ok(false)
        }
    }
}

fn edit_task_flow(store: &mut TaskStore) -> Result<bool, Box<dyn Error>> {
    let Some(id) = pick_task(store, "Edit which task?")? else {
        return Ok(false);
    };
    let current = store.get_task(&id).cloned().ok_or("task vanished")?;

    let title: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Title")
        .with_initial_text(&current.title)
        .interact_text()?;

    let description: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Description (optional)")
        .with_initial_text(current.description.as_deref().unwrap_or(""))
        .allow_empty(true)
        .interact_text()?;

    let priority = prompt_priority(current.priority)?;
    let status = prompt_status(current.status)?;

    let tags_input: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Tags (comma-separated)")
        .with_initial_text(current.tags.join(", "))
        .allow_empty(true)
        .interact_text()?;

    let patch = TaskPatch {
        title: Some(title),
        description: if description.trim().is_empty() {
            None
        } else {
            Some(description)
        },
        priority: Some(priority),
        status: Some(status),
        due_date: None,
        tags: Some(split_tags(&tags_input)),
    };

    match store.update_task(&id, patch) {
        Ok(_) => Ok(true),
        Err(err) => {
            print_validation_errors(&err);
            Ok(false)
        }
    }
}

fn toggle_flow(store: &mut TaskStore) -> Result<bool, Box<dyn Error>> {
    let Some(id) = pick_task(store, "Toggle which task?")? else {
        return Ok(false);
    };
    let status = match store.get_task(&id).map(|task| task.status) {
        Some(TaskStatus::Completed) => TaskStatus::Pending,
        Some(_) => TaskStatus::Completed,
        None => return Ok(false),
    };
    match store.update_task(&id, TaskPatch::status(status)) {
        Ok(applied) => Ok(applied),
        Err(err) => {
            print_validation_errors(&err);
            Ok(false)
        }
    }
}

fn duplicate_flow(store: &mut TaskStore) -> Result<bool, Box<dyn Error>> {
    let Some(id) = pick_task(store, "Duplicate which task?")? else {
        return Ok(false);
    };
    let Some(copy) = store.get_task(&id).map(Task::duplicate) else {
        return Ok(false);
    };
    match store.add_task(copy) {
        Ok(()) => Ok(true),
        Err(err) => {
            print_validation_errors(&err);
            Ok(false)
        }
    }
}

fn delete_flow(store: &mut TaskStore) -> Result<bool, Box<dyn Error>> {
    let scope = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Delete what?")
        .items(&["One task", "All completed tasks", "Everything"])
        .default(0)
        .interact()?;

    match scope {
        0 => {
            let Some(id) = pick_task(store, "Delete which task?")? else {
                return Ok(false);
            };
            Ok(store.delete_task(&id))
        }
        1 => {
            let ids: Vec<String> = store
                .filter_tasks(&TaskFilter {
                    status: Some(TaskStatus::Completed),
                    ..TaskFilter::default()
                })
                .into_iter()
                .map(|task| task.id)
                .collect();
            if ids.is_empty() {
                println!("{}", "No completed tasks to delete.".dimmed());
                return Ok(false);
            }
            let removed = store.delete_tasks(&ids);
            println!("Removed {} completed task(s)", removed);
            Ok(removed > 0)
        }
        _ => {
            let sure = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Really delete every task?")
                .default(false)
                .interact()?;
            if sure {
                store.clear_all_tasks();
            }
            Ok(sure)
        }
    }
}

fn search_flow(store: &TaskStore) -> Result<(), Box<dyn Error>> {
    let search: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Search (title, description or tag; empty for all)")
        .allow_empty(true)
        .interact_text()?;

    let status = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Status")
        .items(&["All", "Pending", "In Progress", "Completed"])
        .default(0)
        .interact()?;
    let status = match status {
        1 => Some(TaskStatus::Pending),
        2 => Some(TaskStatus::InProgress),
        3 => Some(TaskStatus::Completed),
        _ => None,
    };

    let hits = store.filter_tasks(&TaskFilter {
        status,
        search: if search.trim().is_empty() {
            None
        } else {
            Some(search)
        },
        ..TaskFilter::default()
    });

    if hits.is_empty() {
        println!("{}", "No matches.".dimmed());
    } else {
        for task in &hits {
            println!("  {}", task_line(task));
        }
    }
    Ok(())
}

fn print_statistics(store: &TaskStore) {
    let stats = store.get_statistics();
    println!("📊 {} task(s) total", stats.total);
    println!("   {} pending", stats.pending.to_string().yellow());
    println!("   {} in progress", stats.in_progress.to_string().cyan());
    println!("   {} completed", stats.completed.to_string().green());
    println!("   {} overdue", stats.overdue.to_string().red());
    println!(
        "   priority: {} high / {} medium / {} low",
        stats.by_priority.high, stats.by_priority.medium, stats.by_priority.low
    );
}

fn tags_flow(store: &TaskStore) -> Result<(), Box<dyn Error>> {
    let tags = store.get_all_tags();
    if tags.is_empty() {
        println!("{}", "No tags yet.".dimmed());
        return Ok(());
    }

    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Show tasks tagged")
        .items(&tags)
        .default(0)
        .interact()?;

    let hits = store.filter_tasks(&TaskFilter {
        tags: vec![tags[choice].clone()],
        ..TaskFilter::default()
    });
    for task in &hits {
        println!("  {}", task_line(task));
    }
    Ok(())
}

fn agenda_flow(store: &TaskStore) -> Result<(), Box<dyn Error>> {
    let range = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Which agenda?")
        .items(&["📅 Today", "🗓️  This week"])
        .default(0)
        .interact()?;

    let tasks = if range == 0 {
        store.get_today_tasks()
    } else {
        store.get_week_tasks()
    };

    if tasks.is_empty() {
        println!("{}", "Nothing due. Enjoy!".dimmed());
        return Ok(());
    }
    let sorted = sort_tasks(
        &tasks,
        SortOptions {
            field: SortField::DueDate,
            direction: SortDirection::Asc,
        },
    );
    for task in &sorted {
        println!("  {}", task_line(task));
    }
    Ok(())
}

fn backup_flow(store: &mut TaskStore, storage: &StorageService) -> Result<bool, Box<dyn Error>> {
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Backup & restore")
        .items(&[
            "⬇️  Export to file",
            "⬆️  Import from file",
            "🧹 Clear stored data",
        ])
        .default(0)
        .interact()?;

    match choice {
        0 => {
            // Export reads what is persisted, so flush the live state first.
            storage.save_tasks(&store.get_all_tasks());
            let path: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Write backup to")
                .with_initial_text("taskdeck-backup.json")
                .interact_text()?;
            fs::write(&path, storage.export_data())?;
            println!("💾 Backup written to {}", path.bold());
            Ok(false)
        }
        1 => {
            let path: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Read backup from")
                .with_initial_text("taskdeck-backup.json")
                .interact_text()?;
            let json = fs::read_to_string(&path)?;
            let result = storage.import_data(&json);
            if result.success {
                println!("✅ {}", result.message.green());
                store.clear_all_tasks();
                let records = storage
                    .load_tasks()
                    .iter()
                    .filter_map(|task| serde_json::to_value(task).ok())
                    .collect();
                store.import_tasks(records);
            } else {
                println!("❌ {}", result.message.red());
            }
            Ok(false)
        }
        _ => {
            let sure = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Wipe stored tasks and preferences?")
                .default(false)
                .interact()?;
            if sure {
                storage.clear_all();
                println!("🧹 Stored data cleared");
            }
            Ok(false)
        }
    }
}

fn storage_info_flow(storage: &StorageService) {
    let info = storage.storage_info();
    println!(
        "📦 {} bytes of {} used ({:.2}%)",
        info.used, info.available, info.percentage
    );
    if storage.is_storage_available() {
        println!("   backend: {}", "available".green());
    } else {
        println!("   backend: {}", "UNAVAILABLE".red().bold());
    }
}

fn preferences_flow(
    storage: &StorageService,
    preferences: &mut Preferences,
) -> Result<(), Box<dyn Error>> {
    let themes = [Theme::Light, Theme::Dark, Theme::Auto];
    let theme_index = themes
        .iter()
        .position(|t| *t == preferences.theme)
        .unwrap_or(0);
    let theme = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Theme")
        .items(&["Light", "Dark", "Auto"])
        .default(theme_index)
        .interact()?;
    preferences.theme = themes[theme];

    preferences.default_priority = prompt_priority(preferences.default_priority)?;
    preferences.default_status = prompt_status(preferences.default_status)?;

    preferences.show_completed_tasks = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Show completed tasks in lists?")
        .default(preferences.show_completed_tasks)
        .interact()?;
    preferences.enable_notifications = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Show change notifications? (takes effect on restart)")
        .default(preferences.enable_notifications)
        .interact()?;
    preferences.auto_save = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Autosave after every change?")
        .default(preferences.auto_save)
        .interact()?;

    if storage.save_preferences(preferences) {
        println!("⚙️  Preferences saved");
    } else {
        println!("{}", "Could not save preferences".red());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_due_date_accepts_both_forms() {
        assert!(parse_due_date("2030-06-15").is_some());
        assert!(parse_due_date("2030-06-15 09:30").is_some());
        assert!(parse_due_date("").is_none());
        assert!(parse_due_date("next tuesday").is_none());
    }

    #[test]
    fn date_only_due_dates_land_on_end_of_day() {
        let due = parse_due_date("2030-06-15").unwrap();
        let local = due.with_timezone(&Local);
        assert_eq!(
            local.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2030-06-15 23:59:59"
        );
    }

    #[test]
    fn split_tags_trims_and_drops_empties() {
        assert_eq!(
            split_tags(" home,  work ,,errands "),
            vec!["home", "work", "errands"]
        );
        assert!(split_tags("   ").is_empty());
    }
}
