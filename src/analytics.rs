use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Days, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::store::CategoryStore;
use crate::task::parse_day_key;

const MS_PER_HOUR: f64 = 1000.0 * 3600.0;
const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
    Year,
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `today` and the `days` days before it, clamped to the earliest
    /// representable date.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(days.into()))
            .unwrap_or(NaiveDate::MIN);
        Self::new(start, today)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// A reporting bucket, ordered by its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub start: NaiveDate,
    pub granularity: Granularity,
}

impl Period {
    pub fn containing(day: NaiveDate, granularity: Granularity) -> Self {
        let start = match granularity {
            Granularity::Day => day,
            Granularity::Week => day
                .checked_sub_days(Days::new(day.weekday().num_days_from_monday().into()))
                .unwrap_or(NaiveDate::MIN),
            Granularity::Month => day.with_day(1).unwrap_or(day),
            Granularity::Year => NaiveDate::from_ymd_opt(day.year(), 1, 1).unwrap_or(day),
        };
        Self { start, granularity }
    }

    pub fn label(&self) -> String {
        let format = match self.granularity {
            Granularity::Day | Granularity::Week => "%m/%d",
            Granularity::Month => "%Y-%m",
            Granularity::Year => "%Y",
        };
        self.start.format(format).to_string()
    }
}

/// Hours per category per period, ready for a stacked-bar style rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub periods: BTreeMap<Period, BTreeMap<String, f64>>,
    /// Ledger entries dropped because their day key did not parse.
    pub skipped_entries: usize,
}

impl Aggregate {
    pub fn category_names(&self) -> BTreeSet<&str> {
        self.periods
            .values()
            .flat_map(|by_category| by_category.keys().map(String::as_str))
            .collect()
    }

    pub fn totals_by_category(&self) -> BTreeMap<&str, f64> {
        let mut totals = BTreeMap::new();
        for by_category in self.periods.values() {
            for (name, hours) in by_category {
                *totals.entry(name.as_str()).or_insert(0.0) += hours;
            }
        }
        totals
    }

    pub fn hours(&self, period: &Period, category_name: &str) -> f64 {
        self.periods
            .get(period)
            .and_then(|by_category| by_category.get(category_name))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

pub fn aggregate(store: &CategoryStore, range: DateRange, granularity: Granularity) -> Aggregate {
    let mut result = Aggregate::default();

    for task in store.all_tasks() {
        let category_name = store
            .category_name(task.category_id())
            .unwrap_or(UNKNOWN_CATEGORY);

        for (key, ms) in &task.daily_work_ms {
            let Some(day) = parse_day_key(key) else {
                tracing::warn!(task = %task.id, day = %key, "skipping unparseable day key");
                result.skipped_entries += 1;
                continue;
            };
            if !range.contains(day) {
                continue;
            }

            let hours = *ms as f64 / MS_PER_HOUR;
            *result
                .periods
                .entry(Period::containing(day, granularity))
                .or_default()
                .entry(category_name.to_string())
                .or_insert(0.0) += hours;
        }
    }

    result
}
