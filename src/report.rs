//! One-line human report for a finished run, read back from its summary
//! file. Unlike extraction, loading here fails hard: a report cannot be
//! meaningfully produced from absent or corrupt input.

use crate::minify::pick;
use crate::summary::{coerce_float, coerce_int};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ReportError {
    Missing(PathBuf),
    InvalidJson(PathBuf, serde_json::Error),
    NotAnObject(PathBuf),
    Io(PathBuf, std::io::Error),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Missing(path) => {
                write!(f, "summary file not found: {}", path.display())
            }
            ReportError::InvalidJson(path, e) => {
                write!(f, "invalid JSON in summary file: {} ({e})", path.display())
            }
            ReportError::NotAnObject(path) => {
                write!(f, "summary JSON must be an object: {}", path.display())
            }
            ReportError::Io(path, e) => {
                write!(f, "cannot read summary file {}: {e}", path.display())
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::InvalidJson(_, e) => Some(e),
            ReportError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Load a summary file, insisting on a JSON object.
pub fn load_summary(path: &Path) -> Result<Map<String, Value>, ReportError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReportError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(ReportError::Io(path.to_path_buf(), e)),
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ReportError::NotAnObject(path.to_path_buf())),
        Err(e) => Err(ReportError::InvalidJson(path.to_path_buf(), e)),
    }
}

/// Collapse whitespace and clip the task text so the line stays scannable.
fn sanitize_task(value: Option<&Value>) -> String {
    let Some(Value::String(task)) = value else {
        return "-".to_string();
    };
    let compact = task.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.is_empty() {
        return "-".to_string();
    }
    if compact.chars().count() > 64 {
        let clipped: String = compact.chars().take(61).collect();
        return format!("{clipped}...");
    }
    compact
}

/// Four decimal places with trailing zeros trimmed: 0.4200 -> 0.42, 1.0 -> 1.
fn fmt_cost(cost: Option<f64>) -> String {
    match cost {
        None => "-".to_string(),
        Some(cost) => {
            let text = format!("{cost:.4}");
            let text = text.trim_end_matches('0').trim_end_matches('.');
            text.to_string()
        }
    }
}

/// Render the one-line report. Reads fields through the compact/legacy dual
/// schema, so summaries from either era render identically.
pub fn render(summary: &Map<String, Value>) -> String {
    let tok = summary.get("tok").and_then(Value::as_object);
    let legacy_tok = crate::minify::legacy(summary)
        .and_then(|l| l.get("token_usage"))
        .and_then(Value::as_object);
    let cost = summary.get("cost").and_then(Value::as_object);
    let legacy_cost = crate::minify::legacy(summary)
        .and_then(|l| l.get("cost"))
        .and_then(Value::as_object);

    let run_id = pick(summary, "id", "run_id")
        .and_then(Value::as_str)
        .unwrap_or("-");
    let session_id = pick(summary, "sid", "session_id")
        .and_then(Value::as_str)
        .unwrap_or("-");
    let task = sanitize_task(pick(summary, "task", "task"));
    let exit_code = coerce_int(pick(summary, "exit", "exit_code"));
    let elapsed = coerce_int(pick(summary, "time", "elapsed_seconds"));

    let total_tokens = coerce_int(tok.and_then(|t| t.get("tot")))
        .or_else(|| coerce_int(legacy_tok.and_then(|t| t.get("total_tokens"))));
    let usd = coerce_float(cost.and_then(|c| c.get("usd")))
        .or_else(|| coerce_float(legacy_cost.and_then(|c| c.get("usd"))));

    let ok = match pick(summary, "ok", "success").and_then(Value::as_bool) {
        Some(ok) => Some(ok),
        None => exit_code.map(|code| code == 0),
    };
    let status = match ok {
        Some(true) => "OK",
        Some(false) => "FAIL",
        None => "UNKNOWN",
    };

    let exit_text = exit_code.map_or("-".to_string(), |c| c.to_string());
    let elapsed_text = elapsed.map_or("-".to_string(), |s| format!("{s}s"));
    let tok_text = total_tokens.map_or("-".to_string(), |t| t.to_string());

    format!(
        "{status} id={run_id} exit={exit_text} time={elapsed_text} \
         tok={tok_text} cost={} sid={session_id} task=\"{task}\"",
        fmt_cost(usd)
    )
}
