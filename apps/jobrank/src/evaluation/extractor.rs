//! Score extraction: turns free-form model output into a bounded `ScoreRecord`.
//!
//! Algorithm:
//! 1. Drop any `<think>…</think>` block.
//! 2. Find a JSON object: ```` ```json ```` fences first, then any fence, then bare
//!    brace-balanced spans. The first candidate that parses as an object wins.
//! 3. Coerce each numeric field from number or text (`"72%"` accepted), falling back
//!    to a per-field default when absent or unparseable.
//! 4. Values strictly between 0 and 2 without a `%` suffix are read as fractions and
//!    rescaled ×100.
//! 5. Clamp 0–100 fields, round `effort_days_to_fit`.
//! 6. If nothing usable came out, return `ScoreRecord::error`.
//!
//! Extraction never fails; malformed candidates are skipped.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::score::{clamp_days, clamp_percent, ScoreRecord};

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid think-block regex"));

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```json\s*(\{.*?\})\s*```").expect("valid json-fence regex")
});

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(\{.*?\})\s*```").expect("valid fence regex")
});

/// Defaults used when a field is absent or unparseable.
const DEFAULT_SKILLS_MATCH: u8 = 0;
const DEFAULT_EXPERIENCE_GAP: u8 = 15;
const DEFAULT_MODEL_FIT: u8 = 0;
const DEFAULT_SUCCESS_PROBABILITY: u8 = 50;
const DEFAULT_ROLE_COMPLEXITY: u8 = 50;
const DEFAULT_EFFORT_DAYS: u32 = 7;
const DEFAULT_MISMATCH_PENALTY: u8 = 0;

/// Pure extractor, no state. Kept as a type so the evaluator can hold one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreExtractor;

/// A numeric field after coercion, remembering whether the model actually supplied it.
#[derive(Debug, Clone, Copy)]
struct Field<T> {
    value: T,
    supplied: bool,
}

impl<T: PartialEq + Default> Field<T> {
    /// Defaulted or zero: carries no signal for the failure check.
    fn is_blank(&self) -> bool {
        !self.supplied || self.value == T::default()
    }
}

impl ScoreExtractor {
    pub fn extract(&self, raw: &str) -> ScoreRecord {
        let cleaned = strip_think_blocks(raw);
        let data = find_json_object(&cleaned).unwrap_or_else(|| {
            warn!("No JSON found in response after removing <think> tags.");
            Map::new()
        });

        let skills_match = percent_field(&data, "skills_match", DEFAULT_SKILLS_MATCH);
        let experience_gap = percent_field(&data, "experience_gap", DEFAULT_EXPERIENCE_GAP);
        let model_fit_score = percent_field(&data, "model_fit_score", DEFAULT_MODEL_FIT);
        let success_probability =
            percent_field(&data, "success_probability", DEFAULT_SUCCESS_PROBABILITY);
        let role_complexity = percent_field(&data, "role_complexity", DEFAULT_ROLE_COMPLEXITY);
        let mismatch_penalty = percent_field(
            &data,
            "critical_skill_mismatch_penalty",
            DEFAULT_MISMATCH_PENALTY,
        );
        let effort_days = days_field(&data, "effort_days_to_fit", DEFAULT_EFFORT_DAYS);

        let reasoning = text_field(&data, "reasoning");
        let areas_for_development = text_field(&data, "areas_for_development");

        let percent_fields = [
            skills_match,
            experience_gap,
            model_fit_score,
            success_probability,
            role_complexity,
            mismatch_penalty,
        ];
        let nothing_numeric = percent_fields.iter().all(Field::is_blank) && effort_days.is_blank();
        if nothing_numeric && reasoning.is_empty() && areas_for_development.is_empty() {
            warn!("Extraction failure: no usable scores and no explanation.");
            return ScoreRecord::error("Extraction failed.");
        }

        ScoreRecord {
            skills_match: skills_match.value,
            experience_gap: experience_gap.value,
            model_fit_score: model_fit_score.value,
            success_probability: success_probability.value,
            role_complexity: role_complexity.value,
            effort_days_to_fit: effort_days.value,
            critical_skill_mismatch_penalty: mismatch_penalty.value,
            reasoning,
            areas_for_development,
            query_token_count: 0,
            response_token_count: 0,
            failed: false,
        }
    }
}

fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").into_owned()
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!("Skipping unparseable JSON candidate: {e}");
            None
        }
    }
}

fn find_json_object(text: &str) -> Option<Map<String, Value>> {
    for pattern in [&*JSON_FENCE, &*ANY_FENCE] {
        for captures in pattern.captures_iter(text) {
            if let Some(map) = captures.get(1).and_then(|m| parse_object(m.as_str())) {
                return Some(map);
            }
        }
    }

    balanced_object(text)
}

/// First brace-balanced `{…}` span, in order of its opening brace, that parses as an
/// object. One pass over the text: spans are tried as soon as an outermost brace
/// closes, and whatever closed inside a never-closed brace is tried at the end. Braces
/// inside JSON string literals are ignored.
fn balanced_object(text: &str) -> Option<Map<String, Value>> {
    let mut open: Vec<usize> = Vec::new();
    let mut closed: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    closed.push((start, i + 1));
                    if open.is_empty() {
                        if let Some(map) = first_object(text, &mut closed) {
                            return Some(map);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    first_object(text, &mut closed)
}

/// Tries `spans` by opening position and drains them.
fn first_object(text: &str, spans: &mut Vec<(usize, usize)>) -> Option<Map<String, Value>> {
    spans.sort_unstable_by_key(|&(start, _)| start);
    let found = spans
        .iter()
        .find_map(|&(start, end)| parse_object(&text[start..end]));
    spans.clear();
    found
}

/// Number or numeric text. Returns the value and whether it carried a `%` suffix.
fn coerce_number(value: Option<&Value>) -> Option<(f64, bool)> {
    let (number, percent) = match value? {
        Value::Number(n) => (n.as_f64()?, false),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(stripped) => (stripped.trim().parse::<f64>().ok()?, true),
                None => (s.parse::<f64>().ok()?, false),
            }
        }
        _ => return None,
    };
    number.is_finite().then_some((number, percent))
}

fn percent_field(data: &Map<String, Value>, key: &str, default: u8) -> Field<u8> {
    match coerce_number(data.get(key)) {
        Some((value, percent)) => {
            let value = if !percent && value > 0.0 && value < 2.0 {
                value * 100.0
            } else {
                value
            };
            Field {
                value: clamp_percent(value),
                supplied: true,
            }
        }
        None => Field {
            value: default,
            supplied: false,
        },
    }
}

fn days_field(data: &Map<String, Value>, key: &str, default: u32) -> Field<u32> {
    match coerce_number(data.get(key)) {
        Some((value, _)) => Field {
            value: clamp_days(value),
            supplied: true,
        },
        None => Field {
            value: default,
            supplied: false,
        },
    }
}

fn text_field(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
    }
}
