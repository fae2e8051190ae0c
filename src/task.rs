use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};

use crate::store::CategoryId;

/// Fixed-width, lexicographically sortable calendar day key.
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

const ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(
            thread_rng()
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect(),
        )
    }
}

impl From<&str> for TaskId {
    fn from(raw: &str) -> Self {
        TaskId(raw.to_string())
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Focused,
    Unfocused,
    Finished,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: TaskId,
    pub task_name: String,
}

/// A trackable unit of work: identity, timer state and the per-day ledger.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub visible: bool,
    pub duration_target_ms: u64,
    pub elapsed_ms: u64,
    pub daily_work_ms: BTreeMap<String, u64>,
    category_id: CategoryId,
    active: bool,
    focus_started_at: Option<DateTime<Local>>,
    ticked_ms: u64,
    finished_notified: bool,
}

impl TaskRecord {
    pub fn new(name: String, category_id: CategoryId, duration_target_ms: u64) -> Self {
        Self::restore(
            TaskId::generate(),
            name,
            true,
            category_id,
            duration_target_ms,
            0,
            BTreeMap::new(),
        )
    }

    /// Rebuilds an inactive task from persisted fields.
    pub fn restore(
        id: TaskId,
        name: String,
        visible: bool,
        category_id: CategoryId,
        duration_target_ms: u64,
        elapsed_ms: u64,
        daily_work_ms: BTreeMap<String, u64>,
    ) -> Self {
        Self {
            id,
            name,
            visible,
            duration_target_ms,
            elapsed_ms,
            daily_work_ms,
            category_id,
            active: false,
            focus_started_at: None,
            ticked_ms: 0,
            finished_notified: false,
        }
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub(crate) fn set_category_id(&mut self, category_id: CategoryId) {
        self.category_id = category_id;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn focus_started_at(&self) -> Option<DateTime<Local>> {
        self.focus_started_at
    }

    pub fn is_finished(&self) -> bool {
        self.duration_target_ms > 0 && self.elapsed_ms >= self.duration_target_ms
    }

    /// Whole percent of the target reached. Not clamped: an overrun task
    /// reports more than 100.
    pub fn progress(&self) -> u64 {
        if self.duration_target_ms == 0 {
            return 0;
        }
        self.elapsed_ms.saturating_mul(100) / self.duration_target_ms
    }

    pub fn set_focused(&mut self, focused: bool, now: DateTime<Local>) -> Option<TaskEvent> {
        if focused && !self.active {
            self.active = true;
            self.focus_started_at = Some(now);
            self.ticked_ms = 0;
            return Some(self.event(TaskEventKind::Focused));
        }

        if !focused && self.active {
            self.active = false;
            if let Some(started_at) = self.focus_started_at.take() {
                if now < started_at {
                    tracing::warn!(
                        task = %self.id,
                        "clock moved backwards during focus, dropping interval"
                    );
                } else {
                    distribute_work_across_days(&mut self.daily_work_ms, &started_at, &now);
                    // Ticks can lag the wall clock; never count less than the session.
                    let session_ms = (now - started_at).num_milliseconds().max(0) as u64;
                    self.elapsed_ms = self
                        .elapsed_ms
                        .saturating_add(session_ms.saturating_sub(self.ticked_ms));
                }
            }
            self.ticked_ms = 0;
            return Some(self.event(TaskEventKind::Unfocused));
        }

        None
    }

    /// Advances the accrual clock of an active task by one tick.
    pub fn tick(&mut self, step_ms: u64) -> Vec<TaskEvent> {
        if !self.active {
            return Vec::new();
        }

        self.elapsed_ms = self.elapsed_ms.saturating_add(step_ms);
        self.ticked_ms = self.ticked_ms.saturating_add(step_ms);
        let mut events = vec![self.event(TaskEventKind::Updated)];

        // One-shot: lowering elapsed below target later does not re-arm it.
        if !self.finished_notified && self.is_finished() {
            self.finished_notified = true;
            events.push(self.event(TaskEventKind::Finished));
        }

        events
    }

    /// Folds a past interval into the ledger and the elapsed counter.
    /// Callers guarantee `end >= start`.
    pub fn log_session<Tz: TimeZone>(&mut self, start: &DateTime<Tz>, end: &DateTime<Tz>) {
        let worked = end.clone().signed_duration_since(start.clone());
        self.elapsed_ms = self
            .elapsed_ms
            .saturating_add(worked.num_milliseconds().max(0) as u64);
        distribute_work_across_days(&mut self.daily_work_ms, start, end);
    }

    pub fn mark_complete(&mut self) {
        self.elapsed_ms = self.duration_target_ms;
    }

    #[cfg(test)]
    pub fn logged_ms(&self) -> u64 {
        self.daily_work_ms.values().sum()
    }

    fn event(&self, kind: TaskEventKind) -> TaskEvent {
        TaskEvent {
            kind,
            task_id: self.id.clone(),
            task_name: self.name.clone(),
        }
    }
}

pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_KEY_FORMAT).to_string()
}

pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DAY_KEY_FORMAT).ok()
}

/// Attributes the half-open interval `[start, end)` to the calendar days (in
/// `start`'s time zone) it overlaps. Additions accumulate.
pub fn distribute_work_across_days<Tz: TimeZone>(
    daily_work_ms: &mut BTreeMap<String, u64>,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) {
    if end <= start {
        return;
    }

    let tz = start.timezone();
    let end = end.with_timezone(&tz);
    let last_day = end.date_naive();
    let mut cursor = start.clone();

    while cursor.date_naive() < last_day {
        let day = cursor.date_naive();
        let Some(midnight) = next_midnight(&tz, day) else {
            break;
        };
        add_daily_work(daily_work_ms, day, midnight.clone() - cursor.clone());
        cursor = midnight;
    }

    add_daily_work(daily_work_ms, cursor.date_naive(), end - cursor);
}

fn add_daily_work(daily_work_ms: &mut BTreeMap<String, u64>, day: NaiveDate, worked: Duration) {
    let worked_ms = worked.num_milliseconds();
    if worked_ms <= 0 {
        return;
    }
    *daily_work_ms.entry(day_key(day)).or_insert(0) += worked_ms as u64;
}

fn next_midnight<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> Option<DateTime<Tz>> {
    let naive = day.succ_opt()?.and_hms_opt(0, 0, 0)?;
    resolve_local(tz, naive)
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut cursor = naive;
    // A midnight inside a DST gap resolves to the first valid minute after it.
    for _ in 0..=120 {
        match tz.from_local_datetime(&cursor) {
            LocalResult::Single(datetime) => return Some(datetime),
            LocalResult::Ambiguous(first, second) => return Some(first.min(second)),
            LocalResult::None => cursor += Duration::minutes(1),
        }
    }
    None
}
