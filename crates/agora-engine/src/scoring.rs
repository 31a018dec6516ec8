//! Permissive parsing of a scoring agent's response into per-candidate
//! scores. Accepts a JSON number array (positional), an array of objects
//! keyed by candidate/id/name/index, a plain id-to-number map, or a
//! `candidate <id>: <score>` line pattern. Unparseable output yields a
//! uniform default, never an error.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use agora_core::types::{Candidate, ScoreResult};

use crate::parse::try_parse_value;

/// Score assigned to every candidate when the response is unparseable.
pub const DEFAULT_SCORE: f64 = 5.0;

const SCORE_MIN: f64 = 0.0;
const SCORE_MAX: f64 = 10.0;

fn score_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)candidate\s*([\w-]+)\s*[:|-]\s*([-+]?(?:\d+\.?\d*|\.\d+))")
            .expect("score line pattern")
    })
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

fn scores_from_value(ids: &[String], parsed: &Value) -> Option<HashMap<String, f64>> {
    if let Some(items) = parsed.as_array() {
        // Positional number array: [7, 4, 9]
        if items.len() == ids.len() && items.iter().all(|v| finite(v).is_some()) {
            return Some(
                ids.iter()
                    .zip(items)
                    .filter_map(|(id, v)| finite(v).map(|n| (id.clone(), n)))
                    .collect(),
            );
        }

        // Array of objects: [{"candidate": "a1", "score": 7}, ...]
        let mut raw = HashMap::new();
        for entry in items {
            let obj = entry.as_object()?;
            let key = ["candidate", "id", "name", "index"]
                .iter()
                .find_map(|k| obj.get(*k))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    other => finite(other).map(|n| (n as i64).to_string()),
                });
            let score = ["score", "value", "rating"]
                .iter()
                .find_map(|k| obj.get(*k))
                .and_then(finite);
            if let (Some(key), Some(score)) = (key, score) {
                raw.insert(key, score);
            }
        }
        return if raw.is_empty() { None } else { Some(raw) };
    }

    // Plain map: {"a1": 7, "a2": 4}
    if let Some(obj) = parsed.as_object() {
        let raw: HashMap<String, f64> = obj
            .iter()
            .filter_map(|(k, v)| finite(v).map(|n| (k.clone(), n)))
            .collect();
        return if raw.is_empty() { None } else { Some(raw) };
    }

    None
}

fn scores_from_lines(response: &str) -> Option<HashMap<String, f64>> {
    let mut raw = HashMap::new();
    for captures in score_line_pattern().captures_iter(response) {
        if let Ok(score) = captures[2].parse::<f64>() {
            raw.insert(captures[1].to_string(), score);
        }
    }
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// Parse scores for the given candidates, matching by agent id or 1-based
/// position. Matched scores are clamped into 0..=10; candidates the response
/// skipped get 0. A fully unparseable response yields [`DEFAULT_SCORE`] for
/// everyone.
pub fn parse_candidate_scores(response: &str, candidates: &[Candidate]) -> Vec<ScoreResult> {
    let ids: Vec<String> = candidates.iter().map(|c| c.agent_id.clone()).collect();

    let raw = try_parse_value(response)
        .and_then(|value| scores_from_value(&ids, &value))
        .or_else(|| scores_from_lines(response));

    match raw {
        Some(raw) => ids
            .iter()
            .enumerate()
            .map(|(idx, id)| ScoreResult {
                candidate_id: id.clone(),
                score: raw
                    .get(id)
                    .or_else(|| raw.get(&(idx + 1).to_string()))
                    .copied()
                    .unwrap_or(SCORE_MIN)
                    .clamp(SCORE_MIN, SCORE_MAX),
            })
            .collect(),
        None => {
            debug!("score response unparseable, using uniform default");
            ids.iter()
                .map(|id| ScoreResult { candidate_id: id.clone(), score: DEFAULT_SCORE })
                .collect()
        }
    }
}
