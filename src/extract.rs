//! Best-effort extraction of token counts and cost from free-form agent logs.
//!
//! Each numeric field has an ordered rule table tried in priority order. The
//! first rule that matches anywhere in the log decides the field, and the
//! *last* occurrence matched by that rule wins: later log lines are the
//! summary lines, earlier ones are progress chatter. Everything here is
//! best-effort -- no match means `None`, never an error.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("extraction pattern must compile"))
        .collect()
}

/// Rules for input tokens, highest priority first.
static INPUT_TOKEN_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)input[_\s-]?tokens?\s*[:=]\s*([0-9][0-9,]*)",
        r"(?i)prompt[_\s-]?tokens?\s*[:=]\s*([0-9][0-9,]*)",
    ])
});

/// Rules for output tokens.
static OUTPUT_TOKEN_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)output[_\s-]?tokens?\s*[:=]\s*([0-9][0-9,]*)",
        r"(?i)completion[_\s-]?tokens?\s*[:=]\s*([0-9][0-9,]*)",
    ])
});

/// Rules for total tokens. When none match, the total is derived from
/// input + output if both are known.
static TOTAL_TOKEN_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)total[_\s-]?tokens?\s*[:=]\s*([0-9][0-9,]*)",
        r"(?i)tokens?\s+used\s*(?:[:=]\s*)?([0-9][0-9,]*)",
    ])
});

/// Cost rules only accept explicitly labeled cost fields. A bare dollar
/// amount in prose must never match.
static COST_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\bcost(?:_usd)?\s*[:=]\s*\$?\s*([0-9]+(?:\.[0-9]+)?)",
        r"(?i)\bestimated_cost(?:_usd)?\s*[:=]\s*\$?\s*([0-9]+(?:\.[0-9]+)?)",
        r"(?i)\busd\s*[:=]\s*\$?\s*([0-9]+(?:\.[0-9]+)?)",
        r"(?i)\btotal\s+cost\s*[:=]\s*\$?\s*([0-9]+(?:\.[0-9]+)?)",
    ])
});

/// What matched for one extracted field, kept for auditability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEvidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived: Option<String>,
}

impl FieldEvidence {
    fn matched(pattern: &Regex, raw: &str) -> Self {
        FieldEvidence {
            pattern: Some(pattern.as_str().to_string()),
            raw: Some(raw.to_string()),
            derived: None,
        }
    }

    fn derived(note: &str) -> Self {
        FieldEvidence {
            pattern: None,
            raw: None,
            derived: Some(note.to_string()),
        }
    }
}

/// Token counts pulled from a log, long-form keys as persisted in the
/// legacy summary view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenUsage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub evidence: BTreeMap<String, FieldEvidence>,
}

/// Cost figure pulled from a log, with the matched line as evidence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostEstimate {
    pub usd: Option<f64>,
    pub evidence: Option<String>,
}

/// Digits-only integer parse, tolerating thousands separators ("12,345").
fn parse_int(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Try rules in priority order; the first rule with any match wins and
/// supplies its last match across the whole log.
fn match_last<'r>(rules: &'r [Regex], log_text: &str) -> Option<(&'r Regex, String)> {
    for rule in rules {
        if let Some(caps) = rule.captures_iter(log_text).last() {
            return Some((rule, caps[1].to_string()));
        }
    }
    None
}

/// Extract input/output/total token counts from raw log text.
pub fn extract_token_usage(log_text: &str) -> TokenUsage {
    let mut usage = TokenUsage::default();

    if let Some((rule, raw)) = match_last(&INPUT_TOKEN_RULES, log_text) {
        usage.input_tokens = parse_int(&raw);
        usage
            .evidence
            .insert("input_tokens".to_string(), FieldEvidence::matched(rule, &raw));
    }
    if let Some((rule, raw)) = match_last(&OUTPUT_TOKEN_RULES, log_text) {
        usage.output_tokens = parse_int(&raw);
        usage
            .evidence
            .insert("output_tokens".to_string(), FieldEvidence::matched(rule, &raw));
    }
    if let Some((rule, raw)) = match_last(&TOTAL_TOKEN_RULES, log_text) {
        usage.total_tokens = parse_int(&raw);
        usage
            .evidence
            .insert("total_tokens".to_string(), FieldEvidence::matched(rule, &raw));
    }

    if usage.total_tokens.is_none() {
        if let (Some(input), Some(output)) = (usage.input_tokens, usage.output_tokens) {
            usage.total_tokens = Some(input + output);
            usage.evidence.insert(
                "total_tokens".to_string(),
                FieldEvidence::derived("input_tokens + output_tokens"),
            );
        }
    }

    usage
}

/// Extract a cost figure by scanning lines most-recent-first and taking the
/// first line with an explicitly labeled cost value. This makes the latest
/// emitted figure win over earlier or incidental dollar mentions.
pub fn extract_cost(log_text: &str) -> CostEstimate {
    for line in log_text.lines().rev() {
        let line = line.trim();
        for rule in COST_RULES.iter() {
            if let Some(caps) = rule.captures(line) {
                if let Ok(usd) = caps[1].parse::<f64>() {
                    return CostEstimate {
                        usd: Some(usd),
                        evidence: Some(line.to_string()),
                    };
                }
            }
        }
    }
    CostEstimate::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_all_three_token_fields() {
        let log = "input_tokens: 1,200\noutput_tokens: 300\ntotal_tokens: 1500\n";
        let usage = extract_token_usage(log);
        assert_eq!(usage.input_tokens, Some(1200));
        assert_eq!(usage.output_tokens, Some(300));
        assert_eq!(usage.total_tokens, Some(1500));
        assert!(usage.evidence["input_tokens"].pattern.is_some());
    }

    #[test]
    fn last_match_wins_within_a_rule() {
        let log = "input_tokens: 10\nprogress...\ninput_tokens: 999\n";
        let usage = extract_token_usage(log);
        assert_eq!(usage.input_tokens, Some(999));
        assert_eq!(usage.evidence["input_tokens"].raw.as_deref(), Some("999"));
    }

    #[test]
    fn higher_priority_rule_shadows_fallback() {
        // Both the primary and the fallback spelling appear; the primary rule
        // matched, so the later "prompt tokens" line is never consulted.
        let log = "input_tokens: 50\nprompt_tokens: 7777\n";
        let usage = extract_token_usage(log);
        assert_eq!(usage.input_tokens, Some(50));
    }

    #[test]
    fn fallback_spellings_are_consulted() {
        let log = "prompt tokens = 80\ncompletion-tokens: 20\ntokens used 100\n";
        let usage = extract_token_usage(log);
        assert_eq!(usage.input_tokens, Some(80));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(100));
    }

    #[test]
    fn total_derived_from_input_and_output() {
        let log = "input_tokens: 120\noutput_tokens: 30\n";
        let usage = extract_token_usage(log);
        assert_eq!(usage.total_tokens, Some(150));
        assert_eq!(
            usage.evidence["total_tokens"].derived.as_deref(),
            Some("input_tokens + output_tokens")
        );
    }

    #[test]
    fn total_not_derived_when_one_side_missing() {
        let usage = extract_token_usage("input_tokens: 120\n");
        assert_eq!(usage.total_tokens, None);
        assert!(!usage.evidence.contains_key("total_tokens"));
    }

    #[test]
    fn empty_log_yields_all_none() {
        let usage = extract_token_usage("");
        assert_eq!(usage.input_tokens, None);
        assert_eq!(usage.output_tokens, None);
        assert_eq!(usage.total_tokens, None);
        assert!(usage.evidence.is_empty());
    }

    #[test]
    fn cost_takes_latest_explicit_figure() {
        let log = "a $5 discount mentioned\nworking...\ncost=0.42\n";
        let cost = extract_cost(log);
        assert_eq!(cost.usd, Some(0.42));
        assert_eq!(cost.evidence.as_deref(), Some("cost=0.42"));
    }

    #[test]
    fn bare_dollar_prose_never_matches() {
        let cost = extract_cost("this run saved $12.50 compared to last week\n");
        assert_eq!(cost.usd, None);
        assert_eq!(cost.evidence, None);
    }

    #[test]
    fn later_cost_line_wins_over_earlier() {
        let log = "estimated_cost: 0.10\n...\ntotal cost: $0.55\n";
        let cost = extract_cost(log);
        assert_eq!(cost.usd, Some(0.55));
        assert_eq!(cost.evidence.as_deref(), Some("total cost: $0.55"));
    }

    #[test]
    fn cost_label_variants_match() {
        assert_eq!(extract_cost("cost_usd = 1.25").usd, Some(1.25));
        assert_eq!(extract_cost("usd: 0.9").usd, Some(0.9));
        assert_eq!(extract_cost("estimated_cost_usd: $2").usd, Some(2.0));
    }

    #[test]
    fn cost_absent_yields_default() {
        let cost = extract_cost("no numbers here at all");
        assert_eq!(cost.usd, None);
    }
}
