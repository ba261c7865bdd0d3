//! Extraction of the inventory, the total and the scenario array from a
//! free-form generative response.
//!
//! Wire contract, in order:
//!
//! ```text
//! <inventory 1..N, no bracket characters>
//! TOTAL_INVENTARIO: <N>
//! JSON_START
//! [ ...scenario objects... ]
//! JSON_END
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::scenario::{raw_id, ScenarioRecord};

pub const TOTAL_SENTINEL: &str = "TOTAL_INVENTARIO:";
pub const JSON_START: &str = "JSON_START";
pub const JSON_END: &str = "JSON_END";

static TOTAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"TOTAL_INVENTARIO:\s*(\d+)").expect("Invalid total regex"));

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```json|```").expect("Invalid fence regex"));

/// Inventory size declared by the `TOTAL_INVENTARIO: N` line.
pub fn total(text: &str) -> Option<usize> {
    TOTAL_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Text before `JSON_START`, else before the first `[`, else the whole text.
pub fn inventory_block(text: &str) -> &str {
    if let Some(idx) = text.find(JSON_START) {
        return text[..idx].trim();
    }
    if let Some(idx) = text.find('[') {
        return text[..idx].trim();
    }
    text.trim()
}

fn strip_fences(text: &str) -> String {
    FENCE_RE.replace_all(text, "").trim().to_string()
}

fn parse_array(raw: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Some(items),
        Ok(_) => {
            debug!("scenario block is valid JSON but not an array");
            None
        }
        Err(e) => {
            debug!(error = %e, "scenario block is not valid JSON");
            None
        }
    }
}

/// Split a response into its analysis prose and raw scenario array.
///
/// With both sentinels present the array must sit strictly between them;
/// a parse failure there yields an empty list without bracket scanning,
/// because the analysis may contain stray brackets. Without sentinels the
/// span from the first `[` to the last `]` is tried instead.
pub fn analysis_and_scenarios(text: &str) -> (String, Vec<Value>) {
    if let Some(start) = text.find(JSON_START) {
        let after = &text[start + JSON_START.len()..];
        if let Some(end) = after.find(JSON_END) {
            let analysis = strip_fences(&text[..start]);
            let body = strip_fences(&after[..end]);
            let scenarios = parse_array(&body).unwrap_or_else(|| {
                warn!("failed to parse scenario array between sentinels");
                Vec::new()
            });
            return (analysis, scenarios);
        }
    }

    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return (String::new(), Vec::new());
    };
    if end <= start {
        return (String::new(), Vec::new());
    }

    let analysis = strip_fences(&text[..start]);
    let body = strip_fences(&text[start..=end]);
    let scenarios = parse_array(&body).unwrap_or_else(|| {
        warn!("failed to parse bracketed scenario array");
        Vec::new()
    });
    (analysis, scenarios)
}

/// Typed conversion of a raw array. Elements that do not convert are dropped;
/// their ids then count as missing.
pub fn scenario_records(values: &[Value]) -> Vec<ScenarioRecord> {
    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| match ScenarioRecord::from_value(value) {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!(index, inventory_id = ?raw_id(value), error = %e, "dropping malformed scenario");
                None
            }
        })
        .collect()
}
