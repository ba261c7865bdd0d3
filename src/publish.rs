//! Handoff of validated scenarios to a ticketing system.
//!
//! One "Test Case" ticket per scenario, linked to what it tests. The ticket
//! system itself sits behind [`Publisher`].

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::quality::{AutomationLabel, QualityGate};
use crate::scenario::{ScenarioRecord, Scope};

pub const TEST_CASE_ISSUE_TYPE: &str = "Test Case";
pub const TESTS_RELATION: &str = "Tests";
pub const MANUAL_EXECUTION: &str = "Manual";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("ticket creation failed for inventory id {inventory_id}: {message}")]
    Create { inventory_id: i64, message: String },
    #[error("linking {from} -> {to} failed: {message}")]
    Link {
        from: String,
        to: String,
        message: String,
    },
}

/// Everything needed to create one test-case ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseDraft {
    pub inventory_id: i64,
    pub issue_type: String,
    pub summary: String,
    /// Manual description, passed through verbatim.
    pub description: String,
    /// "End2End" or "System".
    pub scope: String,
    pub execution_mode: String,
    pub automation_candidate: AutomationLabel,
}

impl TestCaseDraft {
    pub fn from_record(rec: &ScenarioRecord, label: AutomationLabel) -> Self {
        let scope = match rec.scope {
            Scope::E2E => "End2End",
            Scope::System => "System",
        };
        Self {
            inventory_id: rec.inventory_id,
            issue_type: TEST_CASE_ISSUE_TYPE.to_string(),
            summary: format!("[{}] {} - Manual", rec.main_function, rec.test_title),
            description: rec.formatted_description.clone(),
            scope: scope.to_string(),
            execution_mode: MANUAL_EXECUTION.to_string(),
            automation_candidate: label,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create the ticket and return its key.
    async fn create_ticket(&self, draft: &TestCaseDraft) -> Result<String, PublishError>;

    async fn link(&self, from: &str, to: &str, relation: &str) -> Result<(), PublishError>;
}

/// Link targets for one run.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub story_key: String,
    /// Target of end-to-end cases; usually the parent of the story's epic.
    pub anchor_key: String,
}

/// Create and link one ticket per scenario, in id order. Returns the number
/// of tickets created.
pub async fn publish_scenarios(
    publisher: &dyn Publisher,
    gate: &QualityGate,
    target: &PublishTarget,
    scenarios: &[ScenarioRecord],
) -> Result<usize, PublishError> {
    let mut ordered: Vec<&ScenarioRecord> = scenarios.iter().collect();
    ordered.sort_by_key(|r| r.inventory_id);

    let mut created = 0;
    for rec in ordered {
        let label = gate.label(rec);
        let draft = TestCaseDraft::from_record(rec, label);
        let key = publisher.create_ticket(&draft).await?;
        created += 1;

        let primary = match rec.scope {
            Scope::E2E => &target.anchor_key,
            Scope::System => &target.story_key,
        };
        publisher.link(&key, primary, TESTS_RELATION).await?;
        if rec.scope == Scope::E2E && target.anchor_key != target.story_key {
            publisher.link(&key, &target.story_key, TESTS_RELATION).await?;
        }
        debug!(key = %key, inventory_id = rec.inventory_id, label = %label, "test case published");
    }

    info!(created, story = %target.story_key, anchor = %target.anchor_key, "publishing complete");
    Ok(created)
}

/// A link recorded by [`DraftPublisher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftLink {
    pub from: String,
    pub to: String,
    pub relation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftSet {
    pub tickets: Vec<(String, TestCaseDraft)>,
    pub links: Vec<DraftLink>,
}

/// Publisher that only records what it would create. Keys are
/// `{project}-{n}`, numbered from 1.
#[derive(Debug)]
pub struct DraftPublisher {
    project: String,
    drafts: Mutex<DraftSet>,
}

impl DraftPublisher {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            drafts: Mutex::new(DraftSet::default()),
        }
    }

    pub fn into_drafts(self) -> DraftSet {
        self.drafts
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for DraftPublisher {
    async fn create_ticket(&self, draft: &TestCaseDraft) -> Result<String, PublishError> {
        let mut drafts = self.drafts.lock().map_err(|_| PublishError::Create {
            inventory_id: draft.inventory_id,
            message: "draft store poisoned".to_string(),
        })?;
        let key = format!("{}-{}", self.project, drafts.tickets.len() + 1);
        drafts.tickets.push((key.clone(), draft.clone()));
        Ok(key)
    }

    async fn link(&self, from: &str, to: &str, relation: &str) -> Result<(), PublishError> {
        let mut drafts = self.drafts.lock().map_err(|_| PublishError::Link {
            from: from.to_string(),
            to: to.to_string(),
            message: "draft store poisoned".to_string(),
        })?;
        drafts.links.push(DraftLink {
            from: from.to_string(),
            to: to.to_string(),
            relation: relation.to_string(),
        });
        Ok(())
    }
}
