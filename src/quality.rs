//! Automation-suitability labelling.
//!
//! Conservative by construction: when in doubt a scenario is `Discarded`.
//! Every keyword list is a field of [`QualityGate`] so callers can swap the
//! heuristics without touching the decision order.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scenario::{AutomationType, ScenarioRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutomationLabel {
    High,
    Low,
    Discarded,
}

impl AutomationLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationLabel::High => "High",
            AutomationLabel::Low => "Low",
            AutomationLabel::Discarded => "Discarded",
        }
    }
}

impl std::fmt::Display for AutomationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the gate rejected a candidate. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotCandidate,
    UnsupportedType,
    Placeholder,
    FakeEndpoint,
    ConfigurationScenario,
    MutatingApi,
    TooShort,
    NoExplicitWait,
    NoAssertion,
    NoEqualityCheck,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGate {
    pub placeholder_markers: Vec<String>,
    pub fake_endpoint_markers: Vec<String>,
    pub mutating_markers: Vec<String>,
    /// Matched against title and description, not code.
    pub configuration_markers: Vec<String>,
    pub wait_markers: Vec<String>,
    pub assertion_markers: Vec<String>,
    /// Description words that demand an equality comparison in UI code.
    pub equivalence_markers: Vec<String>,
    pub equality_operator: String,
    pub min_code_chars: usize,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            placeholder_markers: words(&[
                "todo",
                "...",
                "…",
                "placeholder",
                "selenium_code_for_",
                "appium_code_for_",
                "_code_for_",
                "lorem",
                "tbd",
                "por completar",
            ]),
            fake_endpoint_markers: words(&[
                "example.com",
                "http://example",
                "https://example",
                "bearer token",
                "your_token",
                "insert_token",
                "changeme",
                "mib.example",
                "api.example",
                "testapplication.com",
            ]),
            mutating_markers: words(&[
                "requests.post",
                "requests.put",
                "requests.patch",
                "requests.delete",
                ".post(",
                ".put(",
                ".patch(",
                ".delete(",
            ]),
            configuration_markers: words(&[
                "mib",
                "backoffice",
                "back-office",
                "back office",
                "cms",
                "configur",
                "configuración",
                "parametr",
                "feature flag",
                "feature toggle",
                "toggle",
                "habilitar",
                "deshabilitar",
            ]),
            wait_markers: words(&[
                "webdriverwait",
                "expected_conditions",
                "expectedconditions",
                "wait.until",
            ]),
            assertion_markers: words(&["assert", "expect"]),
            equivalence_markers: words(&["misma", "igual", "same", "equal"]),
            equality_operator: "==".to_string(),
            min_code_chars: 600,
        }
    }
}

impl QualityGate {
    /// Label one scenario.
    pub fn label(&self, record: &ScenarioRecord) -> AutomationLabel {
        match self.check(record) {
            Ok(label) => label,
            Err(reason) => {
                debug!(
                    inventory_id = record.inventory_id,
                    ?reason,
                    "automation discarded"
                );
                AutomationLabel::Discarded
            }
        }
    }

    /// Walk the decision order, returning the first rejection.
    pub fn check(&self, record: &ScenarioRecord) -> Result<AutomationLabel, Rejection> {
        if !record.automation_candidate {
            return Err(Rejection::NotCandidate);
        }
        let kind = record.automation_type;
        if kind == AutomationType::None {
            return Err(Rejection::UnsupportedType);
        }

        let code = record.automation_code.trim();
        let low = code.to_lowercase();
        if low.is_empty() || contains_any(&low, &self.placeholder_markers) {
            return Err(Rejection::Placeholder);
        }
        if contains_any(&low, &self.fake_endpoint_markers) {
            return Err(Rejection::FakeEndpoint);
        }

        let narrative = format!("{} {}", record.test_title, record.formatted_description).to_lowercase();
        if contains_any(&narrative, &self.configuration_markers) {
            return Err(Rejection::ConfigurationScenario);
        }
        if kind == AutomationType::Api && contains_any(&low, &self.mutating_markers) {
            return Err(Rejection::MutatingApi);
        }
        if code.chars().count() < self.min_code_chars {
            return Err(Rejection::TooShort);
        }

        if kind.is_ui() {
            if !contains_any(&low, &self.wait_markers) {
                return Err(Rejection::NoExplicitWait);
            }
            if !contains_any(&low, &self.assertion_markers) {
                return Err(Rejection::NoAssertion);
            }
            let description = record.formatted_description.to_lowercase();
            if contains_any(&description, &self.equivalence_markers)
                && !low.contains(self.equality_operator.as_str())
            {
                return Err(Rejection::NoEqualityCheck);
            }
            return Ok(AutomationLabel::High);
        }

        if !contains_any(&low, &self.assertion_markers) {
            return Err(Rejection::NoAssertion);
        }
        Ok(AutomationLabel::Low)
    }
}
