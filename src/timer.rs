use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::store::{CategoryStore, StoreError};
use crate::task::{TaskEventKind, TaskId, TaskRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusOptions {
    pub tick: Duration,
    pub limit: Option<Duration>,
    pub stop_when_finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TimeLimit,
    Finished,
    /// The stop channel closed with no time limit to fall back on.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusSummary {
    pub ticks: u64,
    pub accrued_ms: u64,
    pub finished: bool,
    pub reason: StopReason,
}

/// Focuses `task_id` and ticks it on a fixed schedule until a message arrives
/// on `stop`, the limit passes or (optionally) the task finishes. Focus is
/// released before returning.
pub fn run_focus_session(
    store: &mut CategoryStore,
    task_id: &TaskId,
    options: FocusOptions,
    stop: &Receiver<()>,
) -> Result<FocusSummary, StoreError> {
    store.set_active_task(Some(task_id), Local::now())?;
    tracing::debug!(
        task = %task_id,
        started_at = ?store.active_task().and_then(TaskRecord::focus_started_at),
        "focus session started"
    );

    let tick = options.tick.max(Duration::from_millis(1));
    let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
    let started = Instant::now();
    let mut next_tick = started + tick;
    let mut stop_open = true;
    let mut ticks = 0u64;
    let mut finished = false;

    let reason = loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        if stop_open {
            match stop.recv_timeout(wait) {
                Ok(()) => break StopReason::Requested,
                Err(RecvTimeoutError::Disconnected) => {
                    if options.limit.is_none() {
                        break StopReason::Disconnected;
                    }
                    stop_open = false;
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        } else {
            thread::sleep(wait);
        }

        next_tick += tick;
        ticks += 1;
        if store.tick(tick_ms).contains(&TaskEventKind::Finished) {
            finished = true;
            tracing::info!(task = %task_id, "target duration reached");
            if options.stop_when_finished {
                break StopReason::Finished;
            }
        }

        if options.limit.is_some_and(|limit| started.elapsed() >= limit) {
            break StopReason::TimeLimit;
        }
    };

    store.set_active_task(None, Local::now())?;
    tracing::debug!(task = %task_id, ticks, ?reason, "focus session ended");

    Ok(FocusSummary {
        ticks,
        accrued_ms: ticks.saturating_mul(tick_ms),
        finished,
        reason,
    })
}
