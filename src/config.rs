use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR: &str = "focus_timeledger";
const CONFIG_FILE: &str = "config.toml";
const SNAPSHOT_FILE: &str = "taskSaveData.json.gz";
const SAVE_PATH_ENV: &str = "FOCUS_TIMELEDGER_SAVE";
const STATE_DIR_ENV: &str = "FOCUS_TIMELEDGER_STATE_DIR";

pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_REPORT_RANGE_DAYS: u32 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse config: {0}")]
	Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub save_path: Option<PathBuf>,
	pub tick_ms: u64,
	pub report_range_days: u32,
	pub log_filter: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			save_path: None,
			tick_ms: DEFAULT_TICK_MS,
			report_range_days: DEFAULT_REPORT_RANGE_DAYS,
			log_filter: None,
		}
	}
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
	let raw = match fs::read_to_string(path) {
		Ok(raw) => raw,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Settings::default()),
		Err(err) => return Err(ConfigError::Io(err)),
	};

	let mut settings: Settings = toml::from_str(&raw)?;
	if settings.tick_ms == 0 {
		tracing::warn!("tick_ms must be positive, using {DEFAULT_TICK_MS}");
		settings.tick_ms = DEFAULT_TICK_MS;
	}
	Ok(settings)
}

pub fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
	match cli_path {
		Some(path) => absolutize(path),
		None => state_dir().join(CONFIG_FILE),
	}
}

/// `--save`, then the environment, then the config file, then the state dir.
pub fn resolve_save_path(cli_path: Option<PathBuf>, settings: &Settings) -> PathBuf {
	resolve_save_path_from(cli_path, env::var_os(SAVE_PATH_ENV), settings, &state_dir())
}

fn resolve_save_path_from(
	cli_path: Option<PathBuf>,
	env_path: Option<OsString>,
	settings: &Settings,
	state_dir: &Path,
) -> PathBuf {
	if let Some(path) = cli_path {
		return absolutize(path);
	}

	if let Some(path) = env_path {
		let path = PathBuf::from(path);
		if !path.as_os_str().is_empty() {
			return absolutize(path);
		}
	}

	if let Some(path) = &settings.save_path {
		return absolutize(path.clone());
	}

	state_dir.join(SNAPSHOT_FILE)
}

fn state_dir() -> PathBuf {
	if let Some(path) = env::var_os(STATE_DIR_ENV) {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join(APP_DIR);
		}
	}

	if let Some(path) = env::var_os("XDG_STATE_HOME") {
		return PathBuf::from(path).join(APP_DIR);
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path).join(".local").join("state").join(APP_DIR);
	}

	PathBuf::from(format!(".{APP_DIR}"))
}

fn absolutize(path: PathBuf) -> PathBuf {
	let path = if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	};

	if path.exists() {
		fs::canonicalize(&path).unwrap_or(path)
	} else {
		path
	}
}

#[cfg(test)]
mod tests {
	use std::ffi::OsString;
	use std::fs;
	use std::path::{Path, PathBuf};

	use super::{ConfigError, Settings, load_settings, resolve_save_path_from};

	#[test]
	fn missing_config_yields_defaults() {
		let dir = tempfile::tempdir().expect("temp dir");
		let settings = load_settings(&dir.path().join("config.toml")).expect("load should work");
		assert_eq!(settings, Settings::default());
		assert_eq!(settings.tick_ms, 100);
		assert_eq!(settings.report_range_days, 30);
	}

	#[test]
	fn partial_config_keeps_other_defaults() {
		let dir = tempfile::tempdir().expect("temp dir");
		let path = dir.path().join("config.toml");
		fs::write(&path, "save_path = \"/data/tasks.json.gz\"\ntick_ms = 0\n")
			.expect("write should succeed");

		let settings = load_settings(&path).expect("load should work");
		assert_eq!(settings.save_path, Some(PathBuf::from("/data/tasks.json.gz")));
		assert_eq!(settings.tick_ms, 100);
		assert_eq!(settings.report_range_days, 30);
		assert!(settings.log_filter.is_none());
	}

	#[test]
	fn malformed_config_is_an_error() {
		let dir = tempfile::tempdir().expect("temp dir");
		let path = dir.path().join("config.toml");
		fs::write(&path, "tick_ms = \"fast\"").expect("write should succeed");

		assert!(matches!(load_settings(&path), Err(ConfigError::Toml(_))));
	}

	#[test]
	fn save_path_precedence() {
		let state = Path::new("/state");
		let configured = Settings {
			save_path: Some(PathBuf::from("/from/config.json.gz")),
			..Settings::default()
		};

		let resolved = resolve_save_path_from(
			Some(PathBuf::from("/from/flag.json.gz")),
			Some(OsString::from("/from/env.json.gz")),
			&configured,
			state,
		);
		assert_eq!(resolved, PathBuf::from("/from/flag.json.gz"));

		let resolved = resolve_save_path_from(
			None,
			Some(OsString::from("/from/env.json.gz")),
			&configured,
			state,
		);
		assert_eq!(resolved, PathBuf::from("/from/env.json.gz"));

		let resolved = resolve_save_path_from(None, Some(OsString::new()), &configured, state);
		assert_eq!(resolved, PathBuf::from("/from/config.json.gz"));

		let resolved = resolve_save_path_from(None, None, &Settings::default(), state);
		assert_eq!(resolved, PathBuf::from("/state/taskSaveData.json.gz"));
	}
}
