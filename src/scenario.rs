//! Typed scenario records, converted once at the response boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields every scenario object must carry.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "main_function",
    "test_title",
    "scope",
    "formatted_description",
    "automation_candidate",
    "automation_type",
    "automation_code",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    System,
    #[serde(rename = "E2E")]
    E2E,
}

impl Scope {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "e2e" | "end2end" | "end-to-end" => Scope::E2E,
            _ => Scope::System,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::System => "System",
            Scope::E2E => "E2E",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationType {
    Selenium,
    Appium,
    Api,
    None,
}

impl AutomationType {
    /// Unknown or empty types map to `None`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "selenium" => AutomationType::Selenium,
            "appium" => AutomationType::Appium,
            "api" => AutomationType::Api,
            _ => AutomationType::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationType::Selenium => "selenium",
            AutomationType::Appium => "appium",
            AutomationType::Api => "api",
            AutomationType::None => "none",
        }
    }

    /// UI drivers (as opposed to HTTP-level checks).
    pub fn is_ui(&self) -> bool {
        matches!(self, AutomationType::Selenium | AutomationType::Appium)
    }
}

/// One generated test case, mapped 1:1 to an inventory id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub inventory_id: i64,
    pub main_function: String,
    pub test_title: String,
    pub scope: Scope,
    pub formatted_description: String,
    pub automation_candidate: bool,
    pub automation_type: AutomationType,
    pub automation_code: String,
}

/// Why a JSON element could not become a [`ScenarioRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("not an object")]
    NotAnObject,
    #[error("missing inventory_id")]
    MissingId,
    #[error("inventory_id is not an integer")]
    InvalidId,
    #[error("missing '{0}'")]
    Missing(&'static str),
    #[error("{0} is not a boolean")]
    NotBool(&'static str),
    #[error("{0} is not a string")]
    NotString(&'static str),
}

/// Coerce an id the way the service tends to emit it: integer, integral
/// float, or numeric string.
pub fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

/// Id of a raw element, if present and coercible.
pub fn raw_id(value: &Value) -> Option<i64> {
    value.get("inventory_id").and_then(coerce_id)
}

fn text_field(obj: &Map<String, Value>, name: &'static str) -> Result<String, FieldError> {
    match obj.get(name) {
        None => Err(FieldError::Missing(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(other) => Ok(other.to_string()),
    }
}

fn strict_string(obj: &Map<String, Value>, name: &'static str) -> Result<String, FieldError> {
    match obj.get(name) {
        None => Err(FieldError::Missing(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(FieldError::NotString(name)),
    }
}

impl ScenarioRecord {
    /// Strict conversion from one element of the response array.
    ///
    /// `inventory_id` is coerced; `automation_candidate` must be a JSON
    /// boolean; `automation_type` and `automation_code` must be strings; the
    /// narrative fields only need to be present. A candidate whose type is
    /// unknown is demoted to a non-candidate.
    pub fn from_value(value: &Value) -> Result<Self, FieldError> {
        let obj = value.as_object().ok_or(FieldError::NotAnObject)?;
        let inventory_id = obj
            .get("inventory_id")
            .ok_or(FieldError::MissingId)
            .and_then(|v| coerce_id(v).ok_or(FieldError::InvalidId))?;

        let main_function = text_field(obj, "main_function")?;
        let test_title = text_field(obj, "test_title")?;
        let scope = Scope::parse(&text_field(obj, "scope")?);
        let formatted_description = text_field(obj, "formatted_description")?;

        let automation_candidate = match obj.get("automation_candidate") {
            None => return Err(FieldError::Missing("automation_candidate")),
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(FieldError::NotBool("automation_candidate")),
        };
        let automation_type = AutomationType::parse(&strict_string(obj, "automation_type")?);
        let automation_code = strict_string(obj, "automation_code")?;

        Ok(Self {
            inventory_id,
            main_function,
            test_title,
            scope,
            formatted_description,
            automation_candidate: automation_candidate && automation_type != AutomationType::None,
            automation_type,
            automation_code,
        })
    }

    pub fn has_automation_code(&self) -> bool {
        !self.automation_code.trim().is_empty()
    }
}
