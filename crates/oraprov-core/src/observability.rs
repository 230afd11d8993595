//! Observability: tracing init and the provision journal.
//!
//! Uses config::ObservabilityConfig for ORAPROV_QUIET, ORAPROV_LOG_LEVEL,
//! ORAPROV_LOG_JSON and ORAPROV_JOURNAL.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static JOURNAL_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup.
/// When ORAPROV_QUIET=1 only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "oraprov=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}

fn get_journal_path() -> Option<String> {
    {
        let guard = JOURNAL_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = crate::config::ObservabilityConfig::from_env().journal.clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = JOURNAL_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Journal: run_started
pub fn journal_run_started(mode: &str, desired_state: &str) {
    if let Some(path) = get_journal_path() {
        let record = json!({
            "ts": now(),
            "event": "run_started",
            "mode": mode,
            "desired_state": desired_state,
        });
        append_jsonl(&path, &record);
    }
}

/// Journal: step_finished (outcome = applied | satisfied | skipped)
pub fn journal_step_finished(step: &str, outcome: &str, duration_ms: u64) {
    if let Some(path) = get_journal_path() {
        let record = json!({
            "ts": now(),
            "event": "step_finished",
            "step": step,
            "outcome": outcome,
            "duration_ms": duration_ms,
        });
        append_jsonl(&path, &record);
    }
}

/// Journal: run_failed. The first failing step aborts the run.
pub fn journal_run_failed(step: &str, error: &str) {
    if let Some(path) = get_journal_path() {
        let record = json!({
            "ts": now(),
            "event": "run_failed",
            "step": step,
            "error": error,
        });
        append_jsonl(&path, &record);
    }
}

/// Journal: supervisor_launched
pub fn journal_supervisor_launched(program: &str, bind: &str, workers: u32, timeout_secs: u64) {
    if let Some(path) = get_journal_path() {
        let record = json!({
            "ts": now(),
            "event": "supervisor_launched",
            "program": program,
            "bind": bind,
            "workers": workers,
            "timeout_secs": timeout_secs,
        });
        append_jsonl(&path, &record);
    }
}
