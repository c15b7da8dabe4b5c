use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minimind_core::config::load_settings;
use minimind_core::{
    Clock, Database, LocalStore, MutationQueue, RecordId, SyncSettings, SystemClock, UserId,
};

use crate::error::CliError;

const ENV_DB_PATH: &str = "MINIMIND_DB_PATH";
const ENV_USER_ID: &str = "MINIMIND_USER_ID";

/// Everything a command needs for one user's data
pub struct AppContext {
    pub store: LocalStore,
    pub queue: MutationQueue,
    pub settings: SyncSettings,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn open(db_path: &Path, settings: SyncSettings, user_id: UserId) -> Result<Self, CliError> {
        Self::with_clock(db_path, settings, user_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db_path: &Path,
        settings: SyncSettings,
        user_id: UserId,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CliError> {
        let db = Arc::new(Database::open(db_path)?);
        let store = LocalStore::new(db.clone(), user_id.clone(), clock.clone());
        let queue = MutationQueue::new(db, user_id, clock.clone(), settings.retry_policy());
        Ok(Self {
            store,
            queue,
            settings,
            clock,
        })
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("minimind")
        .join("minimind.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    cli_config.unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("minimind")
            .join("settings.json")
    })
}

pub fn load_cli_settings(config_path: &Path) -> Result<SyncSettings, CliError> {
    Ok(load_settings(Some(config_path))?)
}

pub fn resolve_user_id(cli_user: Option<String>) -> Result<UserId, CliError> {
    cli_user
        .or_else(|| env::var(ENV_USER_ID).ok())
        .and_then(UserId::new)
        .ok_or(CliError::MissingUser)
}

pub fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidRecordId(trimmed.to_string()))
}

/// Use the JSON argument, or piped stdin when the argument is omitted
pub fn resolve_json_payload(json: Option<String>) -> Result<String, CliError> {
    if let Some(payload) = json.as_deref().and_then(normalize_payload) {
        return Ok(payload);
    }
    if let Some(payload) = read_piped_stdin()? {
        return Ok(payload);
    }
    Err(CliError::EmptyPayload)
}

pub fn normalize_payload(payload: &str) -> Option<String> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_payload(&buffer))
}

pub fn short_id(id: &impl ToString) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
