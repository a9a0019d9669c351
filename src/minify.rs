//! Flattens a run summary (compact- or legacy-shaped) into the lean
//! short-key record.
//!
//! The compact and legacy field sets evolved at different times, so every
//! lookup goes through [`pick`]: canonical short key first, then the
//! long-form key inside the nested legacy view. Feeding this the legacy
//! shape must produce exactly what the compact shape produces.

use crate::summary::{coerce_float, coerce_int};
use serde_json::{json, Map, Value};

/// The nested verbose view, when present and an object.
pub fn legacy(summary: &Map<String, Value>) -> Option<&Map<String, Value>> {
    summary.get("legacy").and_then(Value::as_object)
}

/// Resolve a field by its compact key, falling back to the legacy key in the
/// nested view. Null counts as absent.
pub fn pick<'a>(
    summary: &'a Map<String, Value>,
    key: &str,
    legacy_key: &str,
) -> Option<&'a Value> {
    if let Some(value) = summary.get(key) {
        if !value.is_null() {
            return Some(value);
        }
    }
    legacy(summary)?.get(legacy_key).filter(|v| !v.is_null())
}

/// Non-empty object under the given key; an empty map counts as absent so
/// the legacy fallback is still consulted.
fn sub_record<'a>(
    source: Option<&'a Map<String, Value>>,
    key: &str,
) -> Option<&'a Map<String, Value>> {
    source?
        .get(key)
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
}

/// Produce the flat short-key record from either summary shape.
pub fn minify(summary: &Map<String, Value>) -> Value {
    let legacy_view = legacy(summary);
    let tok = sub_record(Some(summary), "tok");
    let token_usage = sub_record(legacy_view, "token_usage");
    let cost_short = sub_record(Some(summary), "cost");
    let cost_legacy = sub_record(legacy_view, "cost");

    let exit_code = coerce_int(pick(summary, "exit", "exit_code"));

    let tokens = match tok {
        Some(tok) => json!({
            "in": coerce_int(tok.get("in")),
            "out": coerce_int(tok.get("out")),
            "total": coerce_int(tok.get("tot")),
        }),
        None => json!({
            "in": coerce_int(token_usage.and_then(|m| m.get("input_tokens"))),
            "out": coerce_int(token_usage.and_then(|m| m.get("output_tokens"))),
            "total": coerce_int(token_usage.and_then(|m| m.get("total_tokens"))),
        }),
    };

    let ok = pick(summary, "ok", "success")
        .cloned()
        .or_else(|| exit_code.map(|code| json!(code == 0)))
        .unwrap_or(Value::Null);

    let msg = match ok.as_bool() {
        Some(true) => json!("completed"),
        Some(false) => match exit_code {
            Some(code) => json!(format!("failed (exit {code})")),
            None => json!("failed"),
        },
        None => Value::Null,
    };

    let usd = match cost_short {
        Some(cost) => coerce_float(cost.get("usd")),
        None => coerce_float(cost_legacy.and_then(|m| m.get("usd"))),
    };

    let source = pick(summary, "meta", "meta_file")
        .or_else(|| pick(summary, "log", "log_file"))
        .cloned()
        .unwrap_or(Value::Null);

    let field = |key, legacy_key| pick(summary, key, legacy_key).cloned().unwrap_or(Value::Null);

    json!({
        "id": field("id", "run_id"),
        "sess": field("sid", "session_id"),
        "repo": field("repo", "repo"),
        "task": field("task", "task"),
        "resume": field("resume", "resume_session"),
        "start": field("start", "started_at"),
        "end": field("end", "ended_at"),
        "time": coerce_int(pick(summary, "time", "elapsed_seconds")),
        "exit": exit_code,
        "ok": ok,
        "msg": msg,
        "log": field("log", "log_file"),
        "meta": field("meta", "meta_file"),
        "tokens": tokens,
        "cost": usd,
        "source": source,
    })
}
