use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn engine_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/engine.log")
}

pub fn append_engine_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = engine_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

/// Best-effort run lifecycle logging. The sqlite trail is the durable record;
/// a failed log append must never fail the run.
pub fn log_run_event(state_root: &Path, now: i64, run_id: &str, message: &str) {
    let line = format!("ts={now} run_id={run_id} {message}");
    let _ = append_engine_log_line(state_root, &line);
}
