//! Batched repair of inventory ids the service left uncovered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::engine::EngineError;
use crate::merge::merge;
use crate::parse;
use crate::scenario::ScenarioRecord;
use crate::trace::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapFillConfig {
    /// Repair requests before the final best-effort request.
    pub max_attempts: u32,
    /// Ids asked for per repair request.
    pub batch_size: usize,
    /// Ceiling on the compact context embedded in repair prompts.
    pub max_completion_context_chars: usize,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            batch_size: 5,
            max_completion_context_chars: 3_500,
        }
    }
}

/// Issues one repair request and returns the raw response text.
#[async_trait]
pub trait RepairRequester: Send + Sync {
    async fn request_missing(&self, ids: &[i64], stage: Stage) -> Result<String, EngineError>;
}

#[derive(Debug, Clone)]
pub struct GapFillReport {
    pub records: Vec<ScenarioRecord>,
    /// Repair requests issued inside the bounded loop.
    pub attempts: u32,
    pub final_request: bool,
}

/// Sorted ids in `1..=n` with no record.
pub fn missing(n: usize, records: &[ScenarioRecord]) -> Vec<i64> {
    let present: BTreeSet<i64> = records.iter().map(|r| r.inventory_id).collect();
    (1..=n as i64).filter(|id| !present.contains(id)).collect()
}

/// Drop records whose id falls outside `1..=n`.
pub fn retain_in_range(n: usize, records: Vec<ScenarioRecord>) -> Vec<ScenarioRecord> {
    let upper = n as i64;
    records
        .into_iter()
        .filter(|r| {
            let keep = (1..=upper).contains(&r.inventory_id);
            if !keep {
                warn!(inventory_id = r.inventory_id, n, "discarding out-of-range scenario");
            }
            keep
        })
        .collect()
}

fn parse_repair(n: usize, text: &str) -> Vec<ScenarioRecord> {
    let (_, raw) = parse::analysis_and_scenarios(text);
    retain_in_range(n, parse::scenario_records(&raw))
}

/// Repair loop: up to `max_attempts` batched requests for the lowest missing
/// ids, then exactly one best-effort request for whatever is still missing.
///
/// A response with no usable records consumes an attempt. Requester errors
/// abort the loop.
pub async fn fill_gaps(
    requester: &dyn RepairRequester,
    config: &GapFillConfig,
    n: usize,
    mut records: Vec<ScenarioRecord>,
) -> Result<GapFillReport, EngineError> {
    let batch_size = config.batch_size.max(1);
    let mut attempts = 0u32;

    while attempts < config.max_attempts {
        let gaps = missing(n, &records);
        if gaps.is_empty() {
            break;
        }
        attempts += 1;
        let batch = &gaps[..gaps.len().min(batch_size)];
        info!(attempt = attempts, missing = gaps.len(), ?batch, "requesting missing scenarios");

        let text = requester
            .request_missing(batch, Stage::GapFill { attempt: attempts })
            .await?;
        let incoming = parse_repair(n, &text);
        if incoming.is_empty() {
            warn!(attempt = attempts, "repair response had no usable scenarios");
            continue;
        }
        records = merge(records, incoming);
    }

    let remaining = missing(n, &records);
    let final_request = !remaining.is_empty();
    if final_request {
        info!(missing = ?remaining, "final best-effort request for missing scenarios");
        let text = requester.request_missing(&remaining, Stage::Final).await?;
        let incoming = parse_repair(n, &text);
        if incoming.is_empty() {
            warn!("final repair response had no usable scenarios");
        } else {
            records = merge(records, incoming);
        }
    }

    Ok(GapFillReport {
        records,
        attempts,
        final_request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{AutomationType, Scope};
    use serde_json::json;
    use std::sync::Mutex;

    fn rec(id: i64) -> ScenarioRecord {
        ScenarioRecord {
            inventory_id: id,
            main_function: "f".into(),
            test_title: "t".into(),
            scope: Scope::System,
            formatted_description: "d".into(),
            automation_candidate: false,
            automation_type: AutomationType::None,
            automation_code: String::new(),
        }
    }

    fn response(ids: &[i64]) -> String {
        let arr: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "inventory_id": id,
                    "main_function": "f",
                    "test_title": "t",
                    "scope": "System",
                    "formatted_description": "d",
                    "automation_candidate": false,
                    "automation_type": "none",
                    "automation_code": ""
                })
            })
            .collect();
        format!("JSON_START\n{}\nJSON_END", serde_json::to_string(&arr).unwrap())
    }

    /// Answers with the requested ids, or with garbage for the first
    /// `garbage` calls.
    struct Scripted {
        garbage: usize,
        answer_ids: bool,
        calls: Mutex<Vec<(Vec<i64>, Stage)>>,
    }

    impl Scripted {
        fn new(garbage: usize, answer_ids: bool) -> Self {
            Self {
                garbage,
                answer_ids,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RepairRequester for Scripted {
        async fn request_missing(&self, ids: &[i64], stage: Stage) -> Result<String, EngineError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((ids.to_vec(), stage));
            if calls.len() <= self.garbage || !self.answer_ids {
                return Ok("sorry, no JSON this time".into());
            }
            Ok(response(ids))
        }
    }

    #[test]
    fn missing_lists_absent_ids_in_order() {
        assert_eq!(missing(5, &[rec(4), rec(1)]), vec![2, 3, 5]);
        assert!(missing(0, &[]).is_empty());
    }

    #[tokio::test]
    async fn batches_lowest_missing_ids() {
        let requester = Scripted::new(0, true);
        let records = vec![rec(1), rec(3)];
        let report = fill_gaps(&requester, &GapFillConfig::default(), 9, records)
            .await
            .unwrap();
        let calls = requester.calls.lock().unwrap();
        assert_eq!(calls[0].0, vec![2, 4, 5, 6, 7]);
        assert_eq!(calls[1].0, vec![8, 9]);
        assert_eq!(calls.len(), 2);
        assert_eq!(report.records.len(), 9);
        assert!(!report.final_request);
    }

    #[tokio::test]
    async fn unparsable_response_consumes_an_attempt() {
        let requester = Scripted::new(2, true);
        let report = fill_gaps(&requester, &GapFillConfig::default(), 2, vec![rec(1)])
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert!(missing(2, &report.records).is_empty());
        let calls = requester.calls.lock().unwrap();
        assert!(calls.iter().all(|(ids, _)| ids == &vec![2]));
    }

    #[tokio::test]
    async fn exhausted_loop_sends_exactly_one_final_request() {
        let requester = Scripted::new(0, false);
        let config = GapFillConfig {
            max_attempts: 3,
            ..GapFillConfig::default()
        };
        let report = fill_gaps(&requester, &config, 7, vec![rec(1)]).await.unwrap();
        let calls = requester.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].1, Stage::Final);
        assert_eq!(calls[3].0, vec![2, 3, 4, 5, 6, 7]);
        assert!(report.final_request);
        assert_eq!(report.records.len(), 1);
    }

    #[tokio::test]
    async fn nothing_missing_means_no_requests() {
        let requester = Scripted::new(0, true);
        let report = fill_gaps(&requester, &GapFillConfig::default(), 2, vec![rec(1), rec(2)])
            .await
            .unwrap();
        assert!(requester.calls.lock().unwrap().is_empty());
        assert_eq!(report.attempts, 0);
    }

    #[test]
    fn out_of_range_ids_are_dropped() {
        let kept = retain_in_range(3, vec![rec(0), rec(2), rec(4)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].inventory_id, 2);
    }
}
