//! Directional merge of scenario sets by inventory id.

use std::collections::BTreeMap;

use tracing::debug;

use crate::scenario::ScenarioRecord;

/// Keyed union of `existing` and `incoming`, sorted by id.
///
/// The first record seen for an id wins, except that a record with blank
/// automation code takes all three automation fields from a later record
/// that has code.
pub fn merge(existing: Vec<ScenarioRecord>, incoming: Vec<ScenarioRecord>) -> Vec<ScenarioRecord> {
    let mut by_id: BTreeMap<i64, ScenarioRecord> = BTreeMap::new();
    for rec in existing {
        by_id.entry(rec.inventory_id).or_insert(rec);
    }

    let mut added = 0usize;
    let mut upgraded = 0usize;
    for rec in incoming {
        match by_id.get_mut(&rec.inventory_id) {
            None => {
                by_id.insert(rec.inventory_id, rec);
                added += 1;
            }
            Some(old) => {
                if !old.has_automation_code() && rec.has_automation_code() {
                    old.automation_candidate = rec.automation_candidate;
                    old.automation_type = rec.automation_type;
                    old.automation_code = rec.automation_code;
                    upgraded += 1;
                }
            }
        }
    }

    debug!(added, upgraded, total = by_id.len(), "merged scenarios");
    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{AutomationType, Scope};

    fn rec(id: i64, code: &str) -> ScenarioRecord {
        ScenarioRecord {
            inventory_id: id,
            main_function: format!("fn{id}"),
            test_title: format!("title{id}"),
            scope: Scope::System,
            formatted_description: "desc".into(),
            automation_candidate: false,
            automation_type: AutomationType::None,
            automation_code: code.into(),
        }
    }

    #[test]
    fn blank_code_is_upgraded_by_incoming_code() {
        let mut incoming = rec(1, &"X".repeat(600));
        incoming.automation_candidate = true;
        incoming.automation_type = AutomationType::Api;
        incoming.test_title = "other".into();

        let merged = merge(vec![rec(1, "")], vec![incoming]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].automation_code, "X".repeat(600));
        assert!(merged[0].automation_candidate);
        assert_eq!(merged[0].automation_type, AutomationType::Api);
        assert_eq!(merged[0].test_title, "title1");
    }

    #[test]
    fn existing_code_is_never_replaced() {
        let merged = merge(vec![rec(1, &"X".repeat(600))], vec![rec(1, &"Y".repeat(600))]);
        assert_eq!(merged[0].automation_code, "X".repeat(600));
    }

    #[test]
    fn whitespace_code_counts_as_blank() {
        let merged = merge(vec![rec(1, "  \n")], vec![rec(1, "code")]);
        assert_eq!(merged[0].automation_code, "code");
    }

    #[test]
    fn output_is_sorted_and_deduplicated() {
        let merged = merge(
            vec![rec(3, ""), rec(1, ""), rec(3, "dup")],
            vec![rec(2, ""), rec(1, "")],
        );
        let ids: Vec<i64> = merged.iter().map(|r| r.inventory_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // first-seen within existing wins
        assert_eq!(merged[2].automation_code, "");
    }
}
