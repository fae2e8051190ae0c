mod analytics;
mod color;
mod config;
mod storage;
mod store;
mod task;
mod timer;

use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::analytics::{DateRange, Granularity, aggregate};
use crate::color::Color;
use crate::config::{Settings, config_path, load_settings, resolve_save_path};
use crate::storage::{load_store, save_store};
use crate::store::{CategoryEdit, CategoryId, CategoryStore, DEFAULT_CATEGORY_ID, Event, TaskEdit};
use crate::task::{DAY_KEY_FORMAT, TaskEventKind, TaskId, TaskRecord};
use crate::timer::{FocusOptions, StopReason, run_focus_session};

const DEFAULT_LOG_FILTER: &str = "focus_timeledger=info";

#[derive(Debug, Parser)]
#[command(
	name = "focus-timeledger",
	about = "Category-based focus timer with per-day time accounting"
)]
struct Cli {
	/// Snapshot file to load and save.
	#[arg(long)]
	save: Option<PathBuf>,
	/// Settings file (TOML).
	#[arg(long)]
	config: Option<PathBuf>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	Categories,
	AddCategory {
		#[arg(long)]
		name: String,
		#[arg(long, value_enum, default_value_t = Color::Blue)]
		color: Color,
		#[arg(long, default_value = "")]
		description: String,
	},
	EditCategory {
		#[arg(long)]
		id: u32,
		#[arg(long)]
		name: Option<String>,
		#[arg(long)]
		description: Option<String>,
		#[arg(long, value_enum)]
		color: Option<Color>,
	},
	DeleteCategory {
		#[arg(long)]
		id: u32,
	},
	Tasks {
		/// Include hidden tasks.
		#[arg(long)]
		all: bool,
	},
	AddTask {
		#[arg(long)]
		name: String,
		#[arg(long, default_value_t = DEFAULT_CATEGORY_ID.0)]
		category: u32,
		/// Target duration; omit for an unbounded task.
		#[arg(long)]
		minutes: Option<f64>,
	},
	EditTask {
		#[arg(long)]
		task: String,
		#[arg(long)]
		name: Option<String>,
		#[arg(long)]
		minutes: Option<f64>,
		#[arg(long)]
		elapsed_minutes: Option<f64>,
	},
	MoveTask {
		#[arg(long)]
		task: String,
		#[arg(long)]
		category: u32,
	},
	CompleteTask {
		#[arg(long)]
		task: String,
	},
	Visibility {
		#[arg(long, conflicts_with = "category", required_unless_present = "category")]
		task: Option<String>,
		#[arg(long)]
		category: Option<u32>,
		#[arg(long)]
		hidden: bool,
	},
	DeleteTask {
		#[arg(long)]
		task: String,
	},
	Focus {
		#[arg(long)]
		task: String,
		/// Stop automatically after this many minutes.
		#[arg(long)]
		minutes: Option<f64>,
		#[arg(long)]
		until_finished: bool,
	},
	Log {
		#[arg(long)]
		task: String,
		#[arg(long)]
		start: String,
		#[arg(long)]
		stop: String,
	},
	Report {
		#[arg(long)]
		from: Option<String>,
		#[arg(long)]
		to: Option<String>,
		#[arg(long, conflicts_with = "from")]
		days: Option<u32>,
		#[arg(long, value_enum, default_value_t = Granularity::Day)]
		by: Granularity,
	},
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let settings = load_settings(&config_path(cli.config))?;
	init_tracing(settings.log_filter.as_deref());

	let save_path = resolve_save_path(cli.save, &settings);
	let loaded = load_store(&save_path)?;
	let mut store = CategoryStore::new();
	let logger = spawn_event_logger(store.subscribe());
	store.replace_with(loaded);

	let command = cli.command.unwrap_or(Command::Tasks { all: false });
	let result = execute(command, &mut store, &save_path, &settings);

	// Dropping the store closes the event channel so the logger drains and exits.
	drop(store);
	if logger.join().is_err() {
		tracing::warn!("event logger thread panicked");
	}
	result
}

fn execute(
	command: Command,
	store: &mut CategoryStore,
	save_path: &Path,
	settings: &Settings,
) -> Result<(), Box<dyn Error>> {
	match command {
		Command::Init => {
			persist(save_path, store)?;
			println!("initialized snapshot at {}", save_path.display());
		}
		Command::Categories => {
			print_categories(store);
		}
		Command::AddCategory {
			name,
			color,
			description,
		} => {
			let id = store.create_category(name, color, description)?;
			persist(save_path, store)?;
			println!("created category {id}");
		}
		Command::EditCategory {
			id,
			name,
			description,
			color,
		} => {
			store.edit_category(
				CategoryId(id),
				CategoryEdit {
					name,
					description,
					color,
				},
			)?;
			persist(save_path, store)?;
			println!("updated category {id}");
		}
		Command::DeleteCategory { id } => {
			store.delete_category(CategoryId(id))?;
			persist(save_path, store)?;
			println!("deleted category {id}");
		}
		Command::Tasks { all } => {
			print_tasks(store, all);
		}
		Command::AddTask {
			name,
			category,
			minutes,
		} => {
			let id = store.create_task(name, CategoryId(category), minutes.map_or(0, minutes_to_ms))?;
			persist(save_path, store)?;
			println!("created task {id}");
		}
		Command::EditTask {
			task,
			name,
			minutes,
			elapsed_minutes,
		} => {
			let id = TaskId::from(task.as_str());
			store.edit_task(
				&id,
				TaskEdit {
					name,
					duration_target_ms: minutes.map(minutes_to_ms),
					elapsed_ms: elapsed_minutes.map(minutes_to_ms),
				},
			)?;
			persist(save_path, store)?;
			println!("updated task {id}");
		}
		Command::MoveTask { task, category } => {
			let id = TaskId::from(task.as_str());
			store.reassign_task_category(&id, CategoryId(category))?;
			persist(save_path, store)?;
			println!("moved task {id} to category {category}");
		}
		Command::CompleteTask { task } => {
			let id = TaskId::from(task.as_str());
			store.mark_task_complete(&id)?;
			persist(save_path, store)?;
			println!("completed task {id}");
		}
		Command::Visibility {
			task,
			category,
			hidden,
		} => {
			match (task, category) {
				(Some(task), _) => store.set_task_visible(&TaskId::from(task.as_str()), !hidden)?,
				(None, Some(category)) => store.set_category_visible(CategoryId(category), !hidden)?,
				(None, None) => return Err("pass --task or --category".into()),
			}
			persist(save_path, store)?;
			println!("{}", if hidden { "hidden" } else { "shown" });
		}
		Command::DeleteTask { task } => {
			let id = TaskId::from(task.as_str());
			store.delete_task(&id, Local::now())?;
			persist(save_path, store)?;
			println!("deleted task {id}");
		}
		Command::Focus {
			task,
			minutes,
			until_finished,
		} => {
			let id = TaskId::from(task.as_str());
			focus(store, &id, settings.tick_ms, minutes, until_finished)?;
			persist(save_path, store)?;
		}
		Command::Log { task, start, stop } => {
			let id = TaskId::from(task.as_str());
			let start = parse_datetime(&start)?;
			let stop = parse_datetime(&stop)?;
			store.log_session(&id, &start, &stop)?;
			persist(save_path, store)?;
			println!("recorded manual session for {id}");
		}
		Command::Report { from, to, days, by } => {
			let today = Local::now().date_naive();
			let range = match (from, to) {
				(Some(from), to) => DateRange::new(parse_day(&from)?, parse_day_or(to.as_deref(), today)?),
				(None, to) => DateRange::last_days(
					parse_day_or(to.as_deref(), today)?,
					days.unwrap_or(settings.report_range_days),
				),
			};
			print_report(store, range, by);
		}
	}

	Ok(())
}

fn init_tracing(configured: Option<&str>) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or(DEFAULT_LOG_FILTER)));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.init();
}

fn spawn_event_logger(events: Receiver<Event>) -> JoinHandle<()> {
	thread::spawn(move || {
		for event in events {
			match event {
				Event::Changed => tracing::debug!("store changed"),
				Event::Task(event) => match event.kind {
					TaskEventKind::Updated => tracing::trace!(task = %event.task_id, "tick"),
					TaskEventKind::Finished => {
						tracing::info!(task = %event.task_id, "'{}' reached its target", event.task_name)
					}
					kind => tracing::info!(task = %event.task_id, ?kind, "{}", event.task_name),
				},
			}
		}
	})
}

fn persist(path: &Path, store: &mut CategoryStore) -> Result<(), Box<dyn Error>> {
	save_store(path, store, Local::now())?;
	Ok(())
}

fn focus(
	store: &mut CategoryStore,
	id: &TaskId,
	tick_ms: u64,
	minutes: Option<f64>,
	until_finished: bool,
) -> Result<(), Box<dyn Error>> {
	let name = store
		.task(id)
		.map(|task| task.name.clone())
		.ok_or_else(|| format!("task not found: {id}"))?;

	let (stop_sender, stop_receiver) = mpsc::channel();
	thread::spawn(move || {
		let mut line = String::new();
		if matches!(io::stdin().read_line(&mut line), Ok(read) if read > 0) {
			let _ = stop_sender.send(());
		}
	});

	println!("focusing on '{name}', press Enter to stop");
	let options = FocusOptions {
		tick: StdDuration::from_millis(tick_ms),
		limit: minutes.map(|minutes| StdDuration::from_millis(minutes_to_ms(minutes))),
		stop_when_finished: until_finished,
	};
	let summary = run_focus_session(store, id, options, &stop_receiver)?;

	tracing::debug!(task = %id, ticks = summary.ticks, reason = ?summary.reason, "focus summary");
	println!("focused for {}", format_duration_ms(summary.accrued_ms));
	if summary.finished {
		println!("'{name}' reached its target");
	}
	if summary.reason == StopReason::Disconnected {
		println!("stdin closed, session ended");
	}
	Ok(())
}

fn minutes_to_ms(minutes: f64) -> u64 {
	(minutes * 60.0 * 1000.0) as u64
}

fn parse_datetime(input: &str) -> Result<DateTime<Local>, Box<dyn Error>> {
	Ok(DateTime::parse_from_rfc3339(input)?.with_timezone(&Local))
}

fn parse_day(input: &str) -> Result<NaiveDate, Box<dyn Error>> {
	Ok(NaiveDate::parse_from_str(input, DAY_KEY_FORMAT)?)
}

fn parse_day_or(input: Option<&str>, fallback: NaiveDate) -> Result<NaiveDate, Box<dyn Error>> {
	input.map_or(Ok(fallback), parse_day)
}

fn format_duration_ms(ms: u64) -> String {
	let total_seconds = ms / 1000;
	let hours = total_seconds / 3600;
	let minutes = (total_seconds % 3600) / 60;
	let seconds = total_seconds % 60;
	format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn print_categories(store: &CategoryStore) {
	for category in store.categories() {
		println!(
			"{} | {} | {} | {} task(s) | {}",
			category.id,
			category.name,
			category.color,
			category.tasks.len(),
			category.description
		);
	}
}

fn print_tasks(store: &CategoryStore, include_hidden: bool) {
	let tasks: Vec<&TaskRecord> = if include_hidden {
		store.all_tasks().collect()
	} else {
		store.visible_tasks().collect()
	};

	if tasks.is_empty() {
		println!("no tasks yet");
		return;
	}

	for task in tasks {
		let category = store.category_name(task.category_id()).unwrap_or("Unknown");
		let target = if task.duration_target_ms == 0 {
			"unbounded".to_string()
		} else {
			format!(
				"{} ({}%)",
				format_duration_ms(task.duration_target_ms),
				task.progress()
			)
		};
		let marker = if task.is_finished() { " done" } else { "" };
		println!(
			"{} | {} | {} | {} / {}{}",
			task.id,
			category,
			task.name,
			format_duration_ms(task.elapsed_ms),
			target,
			marker
		);
	}
}

fn print_report(store: &CategoryStore, range: DateRange, granularity: Granularity) {
	let report = aggregate(store, range, granularity);
	println!(
		"hours from {} to {}",
		range.start.format(DAY_KEY_FORMAT),
		range.end.format(DAY_KEY_FORMAT)
	);
	if report.is_empty() {
		println!("no tracked work in this range");
		return;
	}

	let names = report.category_names();
	for (period, by_category) in &report.periods {
		let cells: Vec<String> = names
			.iter()
			.filter(|name| by_category.contains_key(**name))
			.map(|name| format!("{name} {:.2}", report.hours(period, name)))
			.collect();
		println!("{:>10} | {}", period.label(), cells.join(" | "));
	}

	println!("\ntotals:");
	for (name, hours) in report.totals_by_category() {
		println!("{hours:>8.2} | {name}");
	}
}
