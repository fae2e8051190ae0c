use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::Color;
use crate::store::{Category, CategoryId, CategoryStore};
use crate::task::{TaskId, TaskRecord};

const MS_PER_SECOND: f64 = 1000.0;
const SECONDS_PER_HOUR: f64 = 3600.0;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CategorySnapshot {
    id: CategoryId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    tasks: Vec<TaskSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<TaskId>,
    name: String,
    #[serde(default = "default_show")]
    show: bool,
    #[serde(default)]
    category: Option<CategoryId>,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    elapsed: u64,
    /// Day key to fractional hours.
    #[serde(default)]
    daily_work: BTreeMap<String, f64>,
}

fn default_show() -> bool {
    true
}

/// Serializes the whole store as a compact JSON document. An active task is
/// stopped first so its running interval lands in the ledger.
pub fn encode_snapshot(
    store: &mut CategoryStore,
    now: DateTime<Local>,
) -> Result<Vec<u8>, StorageError> {
    if store.active_task().is_some() {
        // Clearing focus cannot fail: it names no task.
        let _ = store.set_active_task(None, now);
    }

    let snapshot: Vec<CategorySnapshot> = store.categories().map(category_snapshot).collect();
    serde_json::to_vec(&snapshot).map_err(StorageError::Encode)
}

/// Rebuilds a store from a JSON document. Nothing is applied on failure.
pub fn decode_snapshot(bytes: &[u8]) -> Result<CategoryStore, StorageError> {
    let snapshot: Vec<CategorySnapshot> = serde_json::from_slice(bytes)
        .map_err(|err| StorageError::MalformedSnapshot(err.to_string()))?;

    let mut seen_task_ids = HashSet::new();
    let categories = snapshot
        .into_iter()
        .map(|category| restore_category(category, &mut seen_task_ids))
        .collect();

    Ok(CategoryStore::from_categories(categories))
}

pub fn load_store(path: &Path) -> Result<CategoryStore, StorageError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no snapshot yet, starting fresh");
            return Ok(CategoryStore::new());
        }
        Err(err) => return Err(StorageError::Io(err)),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(CategoryStore::new());
    }

    let document = if raw.starts_with(&GZIP_MAGIC) {
        decompress(&raw)?
    } else {
        raw
    };

    let store = decode_snapshot(&document)?;
    tracing::info!(
        path = %path.display(),
        categories = store.categories().count(),
        tasks = store.all_tasks().count(),
        "loaded snapshot"
    );
    Ok(store)
}

pub fn save_store(
    path: &Path,
    store: &mut CategoryStore,
    now: DateTime<Local>,
) -> Result<(), StorageError> {
    let document = encode_snapshot(store, now)?;
    let compressed = compress(&document)?;
    atomic_write(path, &compressed)?;
    tracing::info!(path = %path.display(), bytes = compressed.len(), "saved snapshot");
    Ok(())
}

fn category_snapshot(category: &Category) -> CategorySnapshot {
    CategorySnapshot {
        id: category.id,
        name: category.name.clone(),
        description: category.description.clone(),
        color: Some(category.color.hex().to_string()),
        tasks: category.tasks.iter().map(task_snapshot).collect(),
    }
}

fn task_snapshot(task: &TaskRecord) -> TaskSnapshot {
    TaskSnapshot {
        id: Some(task.id.clone()),
        name: task.name.clone(),
        show: task.visible,
        category: Some(task.category_id()),
        duration: task.duration_target_ms,
        elapsed: task.elapsed_ms,
        daily_work: task
            .daily_work_ms
            .iter()
            .map(|(day, ms)| (day.clone(), ms_to_hours(*ms)))
            .collect(),
    }
}

fn restore_category(snapshot: CategorySnapshot, seen_task_ids: &mut HashSet<TaskId>) -> Category {
    let color = match snapshot.color.as_deref() {
        None => Color::default(),
        Some(hex) => Color::from_hex(hex).unwrap_or_else(|| {
            tracing::warn!(category = %snapshot.id, color = hex, "unknown color, using default");
            Color::default()
        }),
    };

    let mut category = Category::new(snapshot.id, snapshot.name, color, snapshot.description);
    category.tasks = snapshot
        .tasks
        .into_iter()
        .map(|task| restore_task(task, snapshot.id, seen_task_ids))
        .collect();
    category
}

fn restore_task(
    snapshot: TaskSnapshot,
    owner: CategoryId,
    seen_task_ids: &mut HashSet<TaskId>,
) -> TaskRecord {
    if let Some(recorded) = snapshot.category {
        if recorded != owner {
            tracing::warn!(
                task = %snapshot.name,
                recorded = %recorded,
                owner = %owner,
                "task category disagrees with its owner, using owner"
            );
        }
    }

    let mut id = snapshot.id.unwrap_or_else(TaskId::generate);
    while !seen_task_ids.insert(id.clone()) {
        id = TaskId::generate();
    }

    let daily_work_ms = snapshot
        .daily_work
        .into_iter()
        .map(|(day, hours)| (day, hours_to_ms(hours)))
        .collect();

    TaskRecord::restore(
        id,
        snapshot.name,
        snapshot.show,
        owner,
        snapshot.duration,
        snapshot.elapsed,
        daily_work_ms,
    )
}

/// Lossy below one millisecond; the conversion order is part of the saved
/// data format.
fn ms_to_hours(ms: u64) -> f64 {
    ms as f64 / MS_PER_SECOND / SECONDS_PER_HOUR
}

fn hours_to_ms(hours: f64) -> u64 {
    // `as` truncates toward zero and saturates negatives and NaN to 0.
    (hours * SECONDS_PER_HOUR * MS_PER_SECOND) as u64
}

fn compress(document: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(document)?;
    Ok(encoder.finish()?)
}

fn decompress(raw: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut document = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut document)
        .map_err(|err| StorageError::MalformedSnapshot(format!("bad gzip stream: {err}")))?;
    Ok(document)
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let written = write_synced(&tmp_path, content).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp file");
            }
        }
        return Err(err.into());
    }
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}
