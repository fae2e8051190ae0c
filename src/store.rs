use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{Receiver, Sender, channel};

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::Color;
use crate::task::{TaskEvent, TaskEventKind, TaskId, TaskRecord};

/// Id of the category that exists in a fresh store.
pub const DEFAULT_CATEGORY_ID: CategoryId = CategoryId(1);
pub const DEFAULT_CATEGORY_NAME: &str = "None";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub u32);

impl Display for CategoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
    pub color: Color,
    pub tasks: Vec<TaskRecord>,
}

impl Category {
    pub fn new(id: CategoryId, name: String, color: Color, description: String) -> Self {
        Self {
            id,
            name,
            description,
            color,
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("category not found: {0}")]
    CategoryNotFound(CategoryId),
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("category {id} still owns {tasks} task(s); move or delete them first")]
    CategoryNotEmpty { id: CategoryId, tasks: usize },
    #[error("name must not be empty")]
    EmptyName,
    #[error("session ends before it starts")]
    InvalidInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Task(TaskEvent),
    /// Categories or tasks were created, edited, moved or deleted.
    Changed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<Color>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEdit {
    pub name: Option<String>,
    pub duration_target_ms: Option<u64>,
    pub elapsed_ms: Option<u64>,
}

/// Owns every category and, through them, every task.
pub struct CategoryStore {
    categories: BTreeMap<CategoryId, Category>,
    active_task: Option<TaskId>,
    subscribers: Vec<Sender<Event>>,
}

impl Default for CategoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryStore {
    pub fn new() -> Self {
        let default_category = Category::new(
            DEFAULT_CATEGORY_ID,
            DEFAULT_CATEGORY_NAME.to_string(),
            Color::Blue,
            String::new(),
        );
        Self::from_categories(vec![default_category])
    }

    /// Builds a store from already-loaded categories. Every task is inactive.
    pub fn from_categories(categories: Vec<Category>) -> Self {
        Self {
            categories: categories
                .into_iter()
                .map(|category| (category.id, category))
                .collect(),
            active_task: None,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<Event> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    /// Swaps in a freshly loaded store, keeping subscribers.
    pub fn replace_with(&mut self, loaded: CategoryStore) {
        self.categories = loaded.categories;
        self.active_task = None;
        self.notify_changed();
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn category_name(&self, id: CategoryId) -> Option<&str> {
        self.category(id).map(|category| category.name.as_str())
    }

    pub fn create_category(
        &mut self,
        name: String,
        color: Color,
        description: String,
    ) -> Result<CategoryId, StoreError> {
        let name = required_name(name)?;
        let id = self.next_category_id();
        self.categories
            .insert(id, Category::new(id, name, color, description));
        tracing::debug!(category = %id, "created category");
        self.notify_changed();
        Ok(id)
    }

    pub fn edit_category(&mut self, id: CategoryId, edit: CategoryEdit) -> Result<(), StoreError> {
        let category = self
            .categories
            .get_mut(&id)
            .ok_or(StoreError::CategoryNotFound(id))?;

        if let Some(name) = edit.name.filter(|name| !name.trim().is_empty()) {
            category.name = name.trim().to_string();
        }
        if let Some(description) = edit.description {
            category.description = description;
        }
        if let Some(color) = edit.color {
            category.color = color;
        }

        self.notify_changed();
        Ok(())
    }

    pub fn delete_category(&mut self, id: CategoryId) -> Result<(), StoreError> {
        let category = self
            .categories
            .get(&id)
            .ok_or(StoreError::CategoryNotFound(id))?;
        if !category.tasks.is_empty() {
            return Err(StoreError::CategoryNotEmpty {
                id,
                tasks: category.tasks.len(),
            });
        }

        self.categories.remove(&id);
        tracing::debug!(category = %id, "deleted category");
        self.notify_changed();
        Ok(())
    }

    pub fn create_task(
        &mut self,
        name: String,
        category_id: CategoryId,
        duration_target_ms: u64,
    ) -> Result<TaskId, StoreError> {
        let name = required_name(name)?;
        let category = self
            .categories
            .get_mut(&category_id)
            .ok_or(StoreError::CategoryNotFound(category_id))?;

        let task = TaskRecord::new(name, category_id, duration_target_ms);
        let id = task.id.clone();
        category.tasks.push(task);
        tracing::debug!(task = %id, category = %category_id, "created task");
        self.notify_changed();
        Ok(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.categories
            .values()
            .flat_map(|category| category.tasks.iter())
            .find(|task| &task.id == id)
    }

    fn task_mut(&mut self, id: &TaskId) -> Option<&mut TaskRecord> {
        self.categories
            .values_mut()
            .flat_map(|category| category.tasks.iter_mut())
            .find(|task| &task.id == id)
    }

    /// Every task, category by category, in insertion order.
    pub fn all_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.categories
            .values()
            .flat_map(|category| category.tasks.iter())
    }

    pub fn visible_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.all_tasks().filter(|task| task.visible)
    }

    pub fn reassign_task_category(
        &mut self,
        id: &TaskId,
        new_category_id: CategoryId,
    ) -> Result<(), StoreError> {
        if !self.categories.contains_key(&new_category_id) {
            return Err(StoreError::CategoryNotFound(new_category_id));
        }

        let old_category_id = self
            .task(id)
            .map(TaskRecord::category_id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        if old_category_id == new_category_id {
            return Ok(());
        }

        let mut task = self
            .take_task(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        task.set_category_id(new_category_id);
        if let Some(category) = self.categories.get_mut(&new_category_id) {
            category.tasks.push(task);
        }

        tracing::debug!(task = %id, from = %old_category_id, to = %new_category_id, "moved task");
        self.notify_changed();
        Ok(())
    }

    pub fn delete_task(&mut self, id: &TaskId, now: DateTime<Local>) -> Result<(), StoreError> {
        if self.active_task.as_ref() == Some(id) {
            self.set_active_task(None, now)?;
        }

        self.take_task(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        tracing::debug!(task = %id, "deleted task");
        self.notify_changed();
        Ok(())
    }

    pub fn edit_task(&mut self, id: &TaskId, edit: TaskEdit) -> Result<(), StoreError> {
        let task = self
            .task_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;

        if let Some(name) = edit.name.filter(|name| !name.trim().is_empty()) {
            task.name = name.trim().to_string();
        }
        if let Some(duration_target_ms) = edit.duration_target_ms {
            task.duration_target_ms = duration_target_ms;
        }
        if let Some(elapsed_ms) = edit.elapsed_ms {
            task.elapsed_ms = elapsed_ms;
        }

        self.notify_changed();
        Ok(())
    }

    pub fn mark_task_complete(&mut self, id: &TaskId) -> Result<(), StoreError> {
        self.task_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?
            .mark_complete();
        self.notify_changed();
        Ok(())
    }

    pub fn set_task_visible(&mut self, id: &TaskId, visible: bool) -> Result<(), StoreError> {
        self.task_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?
            .visible = visible;
        self.notify_changed();
        Ok(())
    }

    pub fn set_category_visible(
        &mut self,
        id: CategoryId,
        visible: bool,
    ) -> Result<(), StoreError> {
        let category = self
            .categories
            .get_mut(&id)
            .ok_or(StoreError::CategoryNotFound(id))?;
        for task in &mut category.tasks {
            task.visible = visible;
        }
        self.notify_changed();
        Ok(())
    }

    pub fn log_session<Tz: TimeZone>(
        &mut self,
        id: &TaskId,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> Result<(), StoreError> {
        if end < start {
            return Err(StoreError::InvalidInterval);
        }
        self.task_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?
            .log_session(start, end);
        self.notify_changed();
        Ok(())
    }

    pub fn active_task(&self) -> Option<&TaskRecord> {
        self.active_task.as_ref().and_then(|id| self.task(id))
    }

    /// Moves focus to `next`, stopping whichever task held it before. This is
    /// the only path that activates a task, so at most one is ever active.
    pub fn set_active_task(
        &mut self,
        next: Option<&TaskId>,
        now: DateTime<Local>,
    ) -> Result<(), StoreError> {
        if let Some(id) = next {
            if self.task(id).is_none() {
                return Err(StoreError::TaskNotFound(id.clone()));
            }
        }
        if self.active_task.as_ref() == next {
            return Ok(());
        }

        if let Some(previous) = self.active_task.take() {
            let event = self
                .task_mut(&previous)
                .and_then(|task| task.set_focused(false, now));
            self.dispatch_task_events(event);
        }

        if let Some(id) = next {
            let event = self
                .task_mut(id)
                .and_then(|task| task.set_focused(true, now));
            self.active_task = Some(id.clone());
            self.dispatch_task_events(event);
        }

        Ok(())
    }

    /// One accrual step for the active task, if any.
    pub fn tick(&mut self, step_ms: u64) -> Vec<TaskEventKind> {
        let Some(id) = self.active_task.clone() else {
            return Vec::new();
        };
        let events = self
            .task_mut(&id)
            .map(|task| task.tick(step_ms))
            .unwrap_or_default();
        let kinds = events.iter().map(|event| event.kind).collect();
        self.dispatch_task_events(events);
        kinds
    }

    fn take_task(&mut self, id: &TaskId) -> Option<TaskRecord> {
        self.categories.values_mut().find_map(|category| {
            let index = category.tasks.iter().position(|task| &task.id == id)?;
            Some(category.tasks.remove(index))
        })
    }

    fn next_category_id(&self) -> CategoryId {
        let mut id = 0;
        while self.categories.contains_key(&CategoryId(id)) {
            id += 1;
        }
        CategoryId(id)
    }

    fn dispatch_task_events(&mut self, events: impl IntoIterator<Item = TaskEvent>) {
        for event in events {
            self.dispatch(Event::Task(event));
        }
    }

    fn notify_changed(&mut self) {
        self.dispatch(Event::Changed);
    }

    fn dispatch(&mut self, event: Event) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

fn required_name(name: String) -> Result<String, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::EmptyName);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Local, TimeZone};

    use super::{
        CategoryEdit, CategoryId, CategoryStore, DEFAULT_CATEGORY_ID, Event, StoreError, TaskEdit,
    };
    use crate::color::Color;
    use crate::task::{TaskEventKind, TaskId};

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 4, hour, minute, 0)
            .earliest()
            .expect("local time should exist")
    }

    fn category(store: &mut CategoryStore, name: &str) -> CategoryId {
        store
            .create_category(name.to_string(), Color::Blue, String::new())
            .expect("category should be created")
    }

    fn task(store: &mut CategoryStore, name: &str, category_id: CategoryId) -> TaskId {
        store
            .create_task(name.to_string(), category_id, 0)
            .expect("task should be created")
    }

    fn task_names(store: &CategoryStore, category_id: CategoryId) -> Vec<String> {
        store
            .category(category_id)
            .expect("category should exist")
            .tasks
            .iter()
            .map(|task| task.name.clone())
            .collect()
    }

    #[test]
    fn fresh_store_holds_only_the_default_category() {
        let store = CategoryStore::new();
        let ids: Vec<_> = store.categories().map(|category| category.id).collect();

        assert_eq!(ids, vec![DEFAULT_CATEGORY_ID]);
        assert_eq!(store.category_name(DEFAULT_CATEGORY_ID), Some("None"));
    }

    #[test]
    fn category_ids_fill_the_smallest_gap() {
        let mut store = CategoryStore::new();
        assert_eq!(category(&mut store, "Home"), CategoryId(0));
        assert_eq!(category(&mut store, "Work"), CategoryId(2));
        assert_eq!(category(&mut store, "Study"), CategoryId(3));

        store
            .delete_category(CategoryId(2))
            .expect("empty category should delete");
        assert_eq!(category(&mut store, "Gym"), CategoryId(2));
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut store = CategoryStore::new();
        assert_eq!(
            store.create_category("  ".to_string(), Color::Red, String::new()),
            Err(StoreError::EmptyName)
        );
        assert_eq!(
            store.create_task(String::new(), DEFAULT_CATEGORY_ID, 0),
            Err(StoreError::EmptyName)
        );
    }

    #[test]
    fn create_task_requires_existing_category() {
        let mut store = CategoryStore::new();
        assert_eq!(
            store.create_task("Orphan".to_string(), CategoryId(42), 0),
            Err(StoreError::CategoryNotFound(CategoryId(42)))
        );

        let id = task(&mut store, "Read", DEFAULT_CATEGORY_ID);
        let created = store.task(&id).expect("task should exist");
        assert_eq!(created.elapsed_ms, 0);
        assert!(created.visible);
        assert!(!created.is_active());
        assert_eq!(created.category_id(), DEFAULT_CATEGORY_ID);
    }

    #[test]
    fn reassignment_moves_task_to_exactly_one_category() {
        let mut store = CategoryStore::new();
        let work = category(&mut store, "Work");
        let id = task(&mut store, "Report", DEFAULT_CATEGORY_ID);
        task(&mut store, "Stays", DEFAULT_CATEGORY_ID);

        store
            .reassign_task_category(&id, work)
            .expect("reassign should work");

        assert_eq!(task_names(&store, DEFAULT_CATEGORY_ID), vec!["Stays"]);
        assert_eq!(task_names(&store, work), vec!["Report"]);
        assert_eq!(store.task(&id).map(|task| task.category_id()), Some(work));
        assert_eq!(store.all_tasks().filter(|task| task.id == id).count(), 1);
    }

    #[test]
    fn reassignment_to_same_category_is_a_no_op() {
        let mut store = CategoryStore::new();
        let id = task(&mut store, "Report", DEFAULT_CATEGORY_ID);
        task(&mut store, "Later", DEFAULT_CATEGORY_ID);

        store
            .reassign_task_category(&id, DEFAULT_CATEGORY_ID)
            .expect("same-category move should succeed");
        assert_eq!(
            task_names(&store, DEFAULT_CATEGORY_ID),
            vec!["Report", "Later"]
        );
    }

    #[test]
    fn reassignment_to_missing_category_leaves_task_in_place() {
        let mut store = CategoryStore::new();
        let id = task(&mut store, "Report", DEFAULT_CATEGORY_ID);

        assert_eq!(
            store.reassign_task_category(&id, CategoryId(9)),
            Err(StoreError::CategoryNotFound(CategoryId(9)))
        );
        assert_eq!(task_names(&store, DEFAULT_CATEGORY_ID), vec!["Report"]);
    }

    #[test]
    fn deleting_non_empty_category_is_refused() {
        let mut store = CategoryStore::new();
        let work = category(&mut store, "Work");
        task(&mut store, "Report", work);

        assert_eq!(
            store.delete_category(work),
            Err(StoreError::CategoryNotEmpty { id: work, tasks: 1 })
        );
        assert_eq!(task_names(&store, work), vec!["Report"]);
        assert_eq!(store.categories().count(), 2);
    }

    #[test]
    fn all_tasks_are_ordered_by_category_then_insertion() {
        let mut store = CategoryStore::new();
        let home = category(&mut store, "Home");
        task(&mut store, "b", DEFAULT_CATEGORY_ID);
        task(&mut store, "a", home);
        task(&mut store, "c", DEFAULT_CATEGORY_ID);

        let names: Vec<_> = store.all_tasks().map(|task| task.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn focus_is_exclusive() {
        let mut store = CategoryStore::new();
        let first = task(&mut store, "First", DEFAULT_CATEGORY_ID);
        let second = task(&mut store, "Second", DEFAULT_CATEGORY_ID);

        store
            .set_active_task(Some(&first), at(9, 0))
            .expect("focus should work");
        store
            .set_active_task(Some(&second), at(9, 30))
            .expect("focus should work");

        let active: Vec<_> = store
            .all_tasks()
            .filter(|task| task.is_active())
            .map(|task| task.id.clone())
            .collect();
        assert_eq!(active, vec![second.clone()]);
        assert_eq!(
            store.task(&first).map(|task| task.logged_ms()),
            Some(30 * 60_000)
        );

        store
            .set_active_task(None, at(10, 0))
            .expect("unfocus should work");
        assert!(store.active_task().is_none());
        assert_eq!(
            store.task(&second).map(|task| task.logged_ms()),
            Some(30 * 60_000)
        );
    }

    #[test]
    fn focusing_unknown_task_fails() {
        let mut store = CategoryStore::new();
        let missing = TaskId::from("missing1");
        assert_eq!(
            store.set_active_task(Some(&missing), at(9, 0)),
            Err(StoreError::TaskNotFound(missing))
        );
    }

    #[test]
    fn deleting_active_task_flushes_and_clears_focus() {
        let mut store = CategoryStore::new();
        let id = task(&mut store, "Report", DEFAULT_CATEGORY_ID);
        store
            .set_active_task(Some(&id), at(9, 0))
            .expect("focus should work");

        store.delete_task(&id, at(9, 5)).expect("delete should work");
        assert!(store.active_task().is_none());
        assert!(store.task(&id).is_none());
        assert_eq!(store.tick(100), Vec::new());
    }

    #[test]
    fn subscribers_receive_task_and_change_events() {
        let mut store = CategoryStore::new();
        let events = store.subscribe();
        let id = task(&mut store, "Report", DEFAULT_CATEGORY_ID);
        store
            .edit_task(
                &id,
                TaskEdit {
                    duration_target_ms: Some(100),
                    ..TaskEdit::default()
                },
            )
            .expect("edit should work");
        store
            .set_active_task(Some(&id), at(9, 0))
            .expect("focus should work");
        assert_eq!(
            store.tick(100),
            vec![TaskEventKind::Updated, TaskEventKind::Finished]
        );
        assert_eq!(store.tick(100), vec![TaskEventKind::Updated]);
        store
            .set_active_task(None, at(9, 1))
            .expect("unfocus should work");

        let received: Vec<_> = events
            .try_iter()
            .map(|event| match event {
                Event::Changed => "changed",
                Event::Task(event) => match event.kind {
                    TaskEventKind::Focused => "focused",
                    TaskEventKind::Unfocused => "unfocused",
                    TaskEventKind::Finished => "finished",
                    TaskEventKind::Updated => "updated",
                },
            })
            .collect();
        assert_eq!(
            received,
            vec![
                "changed",
                "changed",
                "focused",
                "updated",
                "finished",
                "updated",
                "unfocused"
            ]
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut store = CategoryStore::new();
        drop(store.subscribe());
        let live = store.subscribe();

        category(&mut store, "Work");
        assert_eq!(store.subscribers.len(), 1);
        assert_eq!(live.try_recv(), Ok(Event::Changed));
    }

    #[test]
    fn edits_overwrite_fields_and_ignore_blank_names() {
        let mut store = CategoryStore::new();
        let id = task(&mut store, "Draft", DEFAULT_CATEGORY_ID);
        store
            .edit_task(
                &id,
                TaskEdit {
                    name: Some(" ".to_string()),
                    duration_target_ms: Some(60_000),
                    elapsed_ms: Some(90_000),
                },
            )
            .expect("edit should work");

        let edited = store.task(&id).expect("task should exist");
        assert_eq!(edited.name, "Draft");
        assert_eq!(edited.progress(), 150);
        assert!(edited.daily_work_ms.is_empty());

        store
            .edit_category(
                DEFAULT_CATEGORY_ID,
                CategoryEdit {
                    name: Some("Inbox".to_string()),
                    color: Some(Color::Teal),
                    ..CategoryEdit::default()
                },
            )
            .expect("edit should work");
        let category = store
            .category(DEFAULT_CATEGORY_ID)
            .expect("category should exist");
        assert_eq!(category.name, "Inbox");
        assert_eq!(category.color, Color::Teal);
    }

    #[test]
    fn category_visibility_toggles_every_task() {
        let mut store = CategoryStore::new();
        let work = category(&mut store, "Work");
        let kept = task(&mut store, "Kept", DEFAULT_CATEGORY_ID);
        task(&mut store, "Hidden a", work);
        task(&mut store, "Hidden b", work);

        store
            .set_category_visible(work, false)
            .expect("toggle should work");
        let visible: Vec<_> = store.visible_tasks().map(|task| task.id.clone()).collect();
        assert_eq!(visible, vec![kept.clone()]);

        store
            .set_task_visible(&kept, false)
            .expect("toggle should work");
        assert_eq!(store.visible_tasks().count(), 0);
    }

    #[test]
    fn logged_session_must_not_run_backwards() {
        let mut store = CategoryStore::new();
        let id = task(&mut store, "Report", DEFAULT_CATEGORY_ID);

        assert_eq!(
            store.log_session(&id, &at(10, 0), &at(9, 0)),
            Err(StoreError::InvalidInterval)
        );
        store
            .log_session(&id, &at(9, 0), &at(10, 0))
            .expect("log should work");
        assert_eq!(store.task(&id).map(|task| task.elapsed_ms), Some(3_600_000));
    }
}
