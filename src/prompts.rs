//! Prompt contracts for scenario generation.
//!
//! Two system contracts: the initial call asks for the full inventory plus
//! every scenario; the repair call asks only for a given list of ids. Both
//! pin the sentinel lines the parser depends on.

use crate::budget::ContextPayload;
use crate::gateway::Message;

/// Rendered prompt ready for the chat gateway.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

// =============================================================================
// System contracts
// =============================================================================

const SCENARIO_SCHEMA: &str = r#"Each scenario object has exactly these keys:
{
  "inventory_id": <integer, 1..N>,
  "main_function": "<functional area>",
  "test_title": "<short title>",
  "scope": "System" | "E2E",
  "formatted_description": "<preconditions, steps and expected result, no tables>",
  "automation_candidate": true | false,
  "automation_type": "selenium" | "appium" | "api" | "none",
  "automation_code": "<complete runnable code, or empty string>"
}"#;

pub const INITIAL_SYSTEM: &str = r#"You are a senior QA engineer. You turn requirement tickets into an exhaustive technical inventory and one test scenario per inventory point.

Your answer MUST follow this layout exactly, with nothing before or after:

1. The technical inventory, numbered 1..N, one testable point per line. Do not use tables. Do not write the characters [ or ] anywhere in the inventory.
2. A line with exactly: TOTAL_INVENTARIO: N
3. A line with exactly: JSON_START
4. A JSON array with exactly N scenario objects, one per inventory point, inventory_id 1..N, each id exactly once.
5. A line with exactly: JSON_END

{schema}

Rules:
- If automation_candidate is true, automation_type cannot be "none".
- automation_code for a candidate is at least 600 characters: imports, setup, navigation, locators, explicit waits, assertions, teardown.
- Never emit placeholders such as TODO, "...", or selenium_code_for_*.
- Do not invent endpoints, hosts or credentials."#;

pub const GAP_FILL_SYSTEM: &str = r#"You are a senior QA engineer completing a partially generated test plan.

Return ONLY the following, with nothing before or after:
JSON_START
<a JSON array of scenario objects>
JSON_END

{schema}

Rules:
- Return one object for each requested inventory_id, exactly once, and no other ids.
- If automation_candidate is true, automation_type cannot be "none".
- Never emit placeholders such as TODO, "...", or selenium_code_for_*.
- Do not use tables."#;

/// Initial-call system prompt with the schema inlined.
pub fn initial_system() -> String {
    INITIAL_SYSTEM.replace("{schema}", SCENARIO_SCHEMA)
}

/// Repair-call system prompt with the schema inlined.
pub fn gap_fill_system() -> String {
    GAP_FILL_SYSTEM.replace("{schema}", SCENARIO_SCHEMA)
}

// =============================================================================
// User prompts
// =============================================================================

/// Full-coverage request over the budgeted payload.
pub fn initial_prompt(payload: &ContextPayload, language: &str) -> PromptInstance {
    let mut user = format!(
        "### FULL COVERAGE MANDATE
Analyse every sentence of the TRUTH SOURCES and their linked technical context.
1. Build a complete technical inventory of every parameter, flow and rule you find.
2. Write one specific scenario per inventory point. Do not skip any point.
3. Inventory and scenarios must correspond exactly 1:1.

### SCOPE HINT (SYSTEM vs E2E)
- Points about observable UI behaviour (focus, navigation, animations, previews, buttons, carousels) are scope \"E2E\".
- Points that are purely data or backend (ordering, filters, exclusions) are scope \"System\".

### AUTOMATION
- Always fill automation_candidate, automation_type and automation_code.

### TRUTH SOURCES
{truth}

### ADDITIONAL CONTEXT (SUPPORTING)
{context}
",
        truth = payload.truth,
        context = payload.context,
    );

    if !payload.confluence.is_empty() {
        user.push_str(&format!(
            "\n### EPIC / ANCHOR DOCUMENTATION (SUPPORTING)\n{}\n",
            payload.confluence
        ));
    }

    user.push_str(&format!(
        "
### TASK
Return:
- Technical inventory (1..N) followed by TOTAL_INVENTARIO: N
- JSON_START, the JSON array, JSON_END
- All text in {language}
- formatted_description concise and without tables
"
    ));

    PromptInstance {
        template_slug: "inventory_and_scenarios_v1",
        system: initial_system(),
        user,
    }
}

/// Truth, context and wiki text cut to `max_chars` characters for repair calls.
pub fn compact_context(payload: &ContextPayload, max_chars: usize) -> String {
    let mut out = format!(
        "TRUTH SOURCES:\n{}\n\nADDITIONAL CONTEXT (SUPPORTING):\n{}\n",
        payload.truth, payload.context
    );
    if !payload.confluence.is_empty() {
        out.push_str(&format!(
            "\nEPIC / ANCHOR DOCUMENTATION (SUPPORTING):\n{}\n",
            payload.confluence
        ));
    }
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// Repair request for exactly `ids`.
pub fn gap_fill_prompt(inventory: &str, compact: &str, ids: &[i64], language: &str) -> PromptInstance {
    let ids_csv = ids
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let user = format!(
        "Complete the missing test scenarios for this inventory.

INVENTORY (reference):
{inventory}

CONTEXT (compact, truth plus supporting):
{compact}

Return ONLY the scenarios whose inventory_id is EXACTLY in this list: {ids_csv}
CRITICAL RULES:
- Every inventory_id in the list must appear EXACTLY once.
- Do NOT return any inventory_id that is not in the list.
- All text in {language}.
"
    );

    PromptInstance {
        template_slug: "missing_scenarios_v1",
        system: gap_fill_system(),
        user,
    }
}
