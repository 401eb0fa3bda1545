//! Lenient parsing of instrument lists returned by LLMs.
//!
//! Handles common AI quirks: markdown code blocks, prose around the JSON array,
//! underscores in numbers (`1_000`), single-quoted keys/values and trailing commas.

use crate::models::{Instrument, Metrics};
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

static DIGIT_UNDERSCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)_(\d)").unwrap());
static SINGLE_QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"'([^'"]*)'"#).unwrap());
static TRAILING_COMMA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([\]}])").unwrap());

const TICKER_KEYS: &[&str] = &["ticker", "symbol"];
const NAME_KEYS: &[&str] = &["name", "nombre", "company"];
const WEIGHT_KEYS: &[&str] = &["weight", "peso", "allocation"];
const METRICS_KEYS: &[&str] = &["metrics", "metricas", "métricas"];

/// Slice from the first `[` to the last `]`
pub fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}

fn remove_digit_underscores(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = DIGIT_UNDERSCORE_RE.replace_all(&current, "$1$2").to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Second-chance repairs, only applied when the text is not valid JSON as-is
fn repair_json(text: &str) -> String {
    let text = SINGLE_QUOTED_RE.replace_all(text, "\"$1\"");
    TRAILING_COMMA_RE.replace_all(&text, "$1").to_string()
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| names.contains(&k.trim().to_lowercase().as_str()))
        .map(|(_, v)| v)
}

/// Numbers, numeric strings ("12.5", "12.5%"); anything else is unknown.
fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_metrics(obj: &Map<String, Value>) -> Metrics {
    let mut metrics = Metrics::new();

    if let Some(Value::Object(nested)) = field(obj, METRICS_KEYS) {
        for (key, value) in nested {
            match value {
                Value::Null => {
                    metrics.insert(key.clone(), None);
                }
                other => {
                    if let Some(v) = numeric(other) {
                        metrics.insert(key.clone(), Some(v));
                    } else if other.as_str().is_some_and(|s| s.eq_ignore_ascii_case("n/a")) {
                        metrics.insert(key.clone(), None);
                    }
                }
            }
        }
    }

    // Flat numeric fields next to ticker/name count as metrics too
    let reserved: Vec<&str> = TICKER_KEYS
        .iter()
        .chain(NAME_KEYS)
        .chain(WEIGHT_KEYS)
        .chain(METRICS_KEYS)
        .copied()
        .collect();
    for (key, value) in obj {
        if reserved.contains(&key.trim().to_lowercase().as_str()) {
            continue;
        }
        if let Value::Number(n) = value {
            metrics.entry(key.clone()).or_insert(n.as_f64());
        }
    }

    metrics
}

fn parse_entry(obj: &Map<String, Value>, bucket: &str) -> Option<Instrument> {
    let ticker = field(obj, TICKER_KEYS)?.as_str()?.trim().to_uppercase();
    if ticker.is_empty() {
        return None;
    }

    let mut instrument = Instrument::new(&ticker, bucket);
    instrument.name = field(obj, NAME_KEYS)
        .and_then(Value::as_str)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    // Percent or fraction; only relative size matters
    instrument.weight_hint = field(obj, WEIGHT_KEYS).and_then(numeric);
    instrument.metrics = parse_metrics(obj);
    Some(instrument)
}

/// Parse an LLM response into instruments for `bucket`, in response order.
pub fn parse_instruments(raw: &str, bucket: &str) -> Result<Vec<Instrument>> {
    let array = extract_json_array(raw).ok_or_else(|| {
        anyhow!(
            "No JSON array in AI response. Raw: {}",
            raw.chars().take(200).collect::<String>()
        )
    })?;
    let cleaned = remove_digit_underscores(array);

    let values: Vec<Value> = match serde_json::from_str(&cleaned) {
        Ok(values) => values,
        Err(_) => serde_json::from_str(&repair_json(&cleaned)).map_err(|e| {
            anyhow!(
                "Failed to parse AI JSON response: {}. Raw: {}",
                e,
                cleaned.chars().take(200).collect::<String>()
            )
        })?,
    };

    let mut seen = HashSet::new();
    let instruments = values
        .iter()
        .filter_map(|v| match v {
            Value::Object(obj) => parse_entry(obj, bucket),
            // Bare ticker strings
            Value::String(s) if !s.trim().is_empty() => {
                Some(Instrument::new(&s.trim().to_uppercase(), bucket))
            }
            _ => None,
        })
        .filter(|i| seen.insert(i.ticker.clone()))
        .collect();

    Ok(instruments)
}
