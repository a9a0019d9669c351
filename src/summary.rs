//! Normalizes a finished run into the compact summary record.
//!
//! The compact record uses short keys (id/sid/exit/ok/tok/cost) and always
//! nests a verbose legacy view under "legacy" with the long-form keys older
//! consumers read. The field names and nesting here are a stability contract
//! with the metrics pipeline, which looks fields up by key.

use crate::extract::{extract_cost, extract_token_usage, CostEstimate, TokenUsage};
use serde_json::{json, Map, Value};
use std::path::Path;

/// Lenient JSON object load: a missing, unreadable, or malformed file is an
/// empty map. The summary must still be producible from partial input.
pub fn load_json_object(path: &Path) -> Map<String, Value> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        _ => {
            tracing::debug!(path = %path.display(), "metadata not a JSON object, ignoring");
            Map::new()
        }
    }
}

/// Integer coercion matching the summary schema's loose inputs: numbers
/// truncate, numeric strings parse, booleans and everything else are None.
pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Bool(_) => None,
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn coerce_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Bool(_) => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn meta_get(meta: &Map<String, Value>, key: &str) -> Value {
    meta.get(key).cloned().unwrap_or(Value::Null)
}

/// Compact token sub-record: {in, out, tot, ev}. None when there is nothing
/// to report, so the summary stays small; consumers default a missing
/// sub-record to all-null.
fn compact_token_usage(tokens: &TokenUsage) -> Option<Value> {
    let mut ev = Map::new();
    for (short, long) in [("in", "input_tokens"), ("out", "output_tokens"), ("tot", "total_tokens")] {
        if let Some(field) = tokens.evidence.get(long) {
            let mut entry = Map::new();
            if let Some(pattern) = &field.pattern {
                entry.insert("pat".to_string(), json!(pattern));
            }
            if let Some(raw) = &field.raw {
                entry.insert("raw".to_string(), json!(raw));
            }
            if let Some(derived) = &field.derived {
                entry.insert("derived".to_string(), json!(derived));
            }
            if !entry.is_empty() {
                ev.insert(short.to_string(), Value::Object(entry));
            }
        }
    }

    if tokens.input_tokens.is_none()
        && tokens.output_tokens.is_none()
        && tokens.total_tokens.is_none()
        && ev.is_empty()
    {
        return None;
    }

    let mut tok = Map::new();
    tok.insert("in".to_string(), json!(tokens.input_tokens));
    tok.insert("out".to_string(), json!(tokens.output_tokens));
    tok.insert("tot".to_string(), json!(tokens.total_tokens));
    if !ev.is_empty() {
        tok.insert("ev".to_string(), Value::Object(ev));
    }
    Some(Value::Object(tok))
}

/// Compact cost sub-record: {usd, ev}. None when neither field is known.
fn compact_cost(cost: &CostEstimate) -> Option<Value> {
    if cost.usd.is_none() && cost.evidence.is_none() {
        return None;
    }
    Some(json!({"usd": cost.usd, "ev": cost.evidence}))
}

/// The verbose view, re-expressing every field under long-form keys.
fn build_legacy(
    meta: &Map<String, Value>,
    log_path: &str,
    tokens: &TokenUsage,
    cost: &CostEstimate,
    ok: &Value,
) -> Value {
    json!({
        "run_id": meta_get(meta, "run_id"),
        "session_id": meta_get(meta, "session_id"),
        "resume_session": meta_get(meta, "resume_session"),
        "repo": meta_get(meta, "repo"),
        "task": meta_get(meta, "task"),
        "model": meta_get(meta, "model"),
        "model_tier": meta_get(meta, "model_tier"),
        "model_source": meta_get(meta, "model_source"),
        "started_at": meta_get(meta, "started_at"),
        "ended_at": meta_get(meta, "ended_at"),
        "elapsed_seconds": meta_get(meta, "elapsed_seconds"),
        "exit_code": meta_get(meta, "exit_code"),
        "success": ok,
        "log_file": log_path,
        "meta_file": meta_get(meta, "meta_file"),
        "token_usage": tokens,
        "cost": cost,
    })
}

/// Build the compact summary for one run from its metadata and extraction
/// output.
///
/// `ok` comes from an explicit `success` flag in the metadata when present,
/// otherwise it is derived from the exit code. Setting SUMMARY_JSON_LEGACY=1
/// additionally inlines the verbose view under "legacy_inline" for consumers
/// that cannot reach into the nested map.
pub fn compact_summary(
    meta: &Map<String, Value>,
    log_path: &str,
    tokens: &TokenUsage,
    cost: &CostEstimate,
) -> Value {
    let exit_code = coerce_int(meta.get("exit_code"));
    let ok = match meta.get("success") {
        Some(v) if !v.is_null() => v.clone(),
        _ => match exit_code {
            Some(code) => json!(code == 0),
            None => Value::Null,
        },
    };

    let legacy = build_legacy(meta, log_path, tokens, cost, &ok);

    let mut summary = json!({
        "id": meta_get(meta, "run_id"),
        "sid": meta_get(meta, "session_id"),
        "repo": meta_get(meta, "repo"),
        "task": meta_get(meta, "task"),
        "resume": meta_get(meta, "resume_session"),
        "start": meta_get(meta, "started_at"),
        "end": meta_get(meta, "ended_at"),
        "time": coerce_int(meta.get("elapsed_seconds")),
        "exit": exit_code,
        "ok": ok,
        "mdl": meta_get(meta, "model"),
        "tier": meta_get(meta, "model_tier"),
        "msrc": meta_get(meta, "model_source"),
        "log": log_path,
        "meta": meta_get(meta, "meta_file"),
        "tok": compact_token_usage(tokens),
        "cost": compact_cost(cost),
        "err": Value::Null,
        "cache": {
            "status": meta_get(meta, "cache_status"),
            "key": meta_get(meta, "cache_key"),
        },
        "src": "run_agent_task.sh",
        "legacy": legacy,
    });

    if std::env::var("SUMMARY_JSON_LEGACY").as_deref() == Ok("1") {
        let inline = summary["legacy"].clone();
        summary["legacy_inline"] = inline;
    }

    summary
}

/// Run the full parse pipeline for one run: read the log (lossily; corrupted
/// bytes must not abort summarization), load the optional metadata file, and
/// produce the compact summary.
pub fn parse_run(log_path: &Path, meta_path: Option<&Path>) -> Value {
    let log_text = match std::fs::read(log_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(path = %log_path.display(), "log not readable: {e}");
            String::new()
        }
    };

    let mut meta = meta_path.map(load_json_object).unwrap_or_default();
    meta.insert(
        "meta_file".to_string(),
        match meta_path {
            Some(p) => json!(p.display().to_string()),
            None => Value::Null,
        },
    );

    let tokens = extract_token_usage(&log_text);
    let cost = extract_cost(&log_text);
    compact_summary(&meta, &log_path.display().to_string(), &tokens, &cost)
}
