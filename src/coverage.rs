//! Coverage validation: scenarios must map bijectively onto inventory ids `1..=N`.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::parse;
use crate::scenario::{coerce_id, FieldError, ScenarioRecord, REQUIRED_FIELDS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoverageError {
    #[error("no TOTAL_INVENTARIO: N line in the response")]
    MissingTotal,
    #[error("scenario payload is not an array")]
    NotAnArray,
    #[error("count mismatch: TOTAL_INVENTARIO={expected} but scenarios={actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("scenario at index {index} is not an object")]
    NotAnObject { index: usize },
    #[error("missing inventory_id in scenario at index {index}")]
    MissingId { index: usize },
    #[error("inventory_id is not an integer in scenario at index {index}")]
    InvalidId { index: usize },
    #[error("missing '{field}' in scenario with inventory_id={id}")]
    MissingField { id: i64, field: &'static str },
    #[error("{field} is not a {expected} in scenario with inventory_id={id}")]
    WrongType {
        id: i64,
        field: &'static str,
        expected: &'static str,
    },
    #[error("inventory_id does not cover 1..{n} exactly; received {ids:?}")]
    IdsNotBijective { n: usize, ids: Vec<i64> },
}

/// Validate a raw response array against the total declared in `raw_text`.
///
/// Checks short-circuit in order: total, array, count, per-element shape,
/// then exact id coverage. On success the typed records are returned in
/// input order.
pub fn validate(raw_text: &str, scenarios: &Value) -> Result<Vec<ScenarioRecord>, CoverageError> {
    let n = parse::total(raw_text).ok_or(CoverageError::MissingTotal)?;
    let items = scenarios.as_array().ok_or(CoverageError::NotAnArray)?;
    if items.len() != n {
        return Err(CoverageError::CountMismatch {
            expected: n,
            actual: items.len(),
        });
    }

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or(CoverageError::NotAnObject { index })?;
        let id = obj
            .get("inventory_id")
            .ok_or(CoverageError::MissingId { index })
            .and_then(|v| coerce_id(v).ok_or(CoverageError::InvalidId { index }))?;
        if let Some(field) = REQUIRED_FIELDS
            .iter()
            .copied()
            .find(|f| !obj.contains_key(*f))
        {
            return Err(CoverageError::MissingField { id, field });
        }
        let record = ScenarioRecord::from_value(item).map_err(|e| match e {
            FieldError::NotBool(field) => CoverageError::WrongType {
                id,
                field,
                expected: "boolean",
            },
            FieldError::NotString(field) => CoverageError::WrongType {
                id,
                field,
                expected: "string",
            },
            FieldError::Missing(field) => CoverageError::MissingField { id, field },
            FieldError::NotAnObject => CoverageError::NotAnObject { index },
            FieldError::MissingId => CoverageError::MissingId { index },
            FieldError::InvalidId => CoverageError::InvalidId { index },
        })?;
        records.push(record);
    }

    check_bijection(n, records.iter().map(|r| r.inventory_id))?;
    Ok(records)
}

/// Count and bijection checks over an already-typed set.
pub fn validate_records(n: usize, records: &[ScenarioRecord]) -> Result<(), CoverageError> {
    if records.len() != n {
        return Err(CoverageError::CountMismatch {
            expected: n,
            actual: records.len(),
        });
    }
    check_bijection(n, records.iter().map(|r| r.inventory_id))
}

fn check_bijection(n: usize, ids: impl Iterator<Item = i64>) -> Result<(), CoverageError> {
    let mut ids: Vec<i64> = ids.collect();
    ids.sort_unstable();
    let exact = ids.len() == n && ids.iter().zip(1_i64..).all(|(id, want)| *id == want);
    if !exact {
        debug!(n, ?ids, "coverage bijection failed");
        return Err(CoverageError::IdsNotBijective { n, ids });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use serde_json::json;

    fn scenario(id: Value) -> Value {
        json!({
            "inventory_id": id,
            "main_function": "Catalog",
            "test_title": "Browse",
            "scope": "System",
            "formatted_description": "Steps",
            "automation_candidate": false,
            "automation_type": "none",
            "automation_code": ""
        })
    }

    fn text(n: usize) -> String {
        format!("1. a\nTOTAL_INVENTARIO: {n}\n")
    }

    #[test]
    fn any_permutation_of_one_to_n_passes() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in 1..=25 {
            let mut ids: Vec<i64> = (1..=n as i64).collect();
            ids.shuffle(&mut rng);
            let arr = Value::Array(ids.into_iter().map(|i| scenario(json!(i))).collect());
            let records = validate(&text(n), &arr).unwrap();
            assert_eq!(records.len(), n);
        }
    }

    #[test]
    fn duplicate_or_gap_fails_naming_the_ids() {
        let arr = json!([scenario(json!(1)), scenario(json!(1)), scenario(json!(3))]);
        match validate(&text(3), &arr) {
            Err(CoverageError::IdsNotBijective { n, ids }) => {
                assert_eq!(n, 3);
                assert_eq!(ids, vec![1, 1, 3]);
            }
            other => panic!("expected bijection failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_id_is_a_count_mismatch() {
        let arr = json!([scenario(json!(1)), scenario(json!(3))]);
        let err = validate(&text(3), &arr).unwrap_err();
        assert_eq!(
            err,
            CoverageError::CountMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert!(err.to_string().contains("TOTAL_INVENTARIO=3"));
    }

    #[test]
    fn checks_short_circuit_in_order() {
        assert_eq!(
            validate("no total", &json!([])),
            Err(CoverageError::MissingTotal)
        );
        assert_eq!(
            validate(&text(1), &json!({"a": 1})),
            Err(CoverageError::NotAnArray)
        );
        assert_eq!(
            validate(&text(2), &json!([1, scenario(json!(2))])),
            Err(CoverageError::NotAnObject { index: 0 })
        );
        assert_eq!(
            validate(&text(1), &json!([scenario(json!("x"))])),
            Err(CoverageError::InvalidId { index: 0 })
        );

        let mut bad = scenario(json!(1));
        bad["automation_candidate"] = json!("yes");
        let err = validate(&text(1), &json!([bad])).unwrap_err();
        assert!(err.to_string().contains("automation_candidate"));
        assert!(err.to_string().contains("inventory_id=1"));

        let mut missing = scenario(json!(1));
        missing.as_object_mut().unwrap().remove("scope");
        assert_eq!(
            validate(&text(1), &json!([missing])),
            Err(CoverageError::MissingField {
                id: 1,
                field: "scope"
            })
        );
    }

    #[test]
    fn string_ids_are_accepted() {
        let arr = json!([scenario(json!("2")), scenario(json!(1.0))]);
        assert!(validate(&text(2), &arr).is_ok());
    }

    #[test]
    fn typed_check_matches_raw_check() {
        let arr = json!([scenario(json!(2)), scenario(json!(1))]);
        let records = validate(&text(2), &arr).unwrap();
        assert!(validate_records(2, &records).is_ok());
        assert!(validate_records(3, &records).is_err());
    }
}
