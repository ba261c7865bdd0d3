//! Context gathering over abstract ticket and wiki sources.
//!
//! Produces the three raw text blocks the budgeter consumes:
//!
//! - **truth**: the story, issues linked to it as dependencies, and issues
//!   referenced by key in their descriptions
//! - **context**: wiki documents embedded in the truth text, plus tickets
//!   referenced from it (breadth-first, bounded)
//! - **confluence**: the document attached to the anchor epic
//!
//! Lookups other than the story itself are best-effort: a failure or timeout
//! is logged and the item skipped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::budget::clip_text;

// =============================================================================
// Sources
// =============================================================================

/// Typed link from one issue to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLink {
    /// Link type name, e.g. "Blocks".
    pub name: String,
    #[serde(default)]
    pub inward: String,
    #[serde(default)]
    pub outward: String,
    /// Key of the issue on the other side.
    pub key: String,
}

impl IssueLink {
    /// Case-insensitive match of name, inward or outward label.
    pub fn matches(&self, accepted: &[String]) -> bool {
        [&self.name, &self.inward, &self.outward]
            .iter()
            .map(|s| s.trim().to_lowercase())
            .any(|s| !s.is_empty() && accepted.iter().any(|a| *a == s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    #[serde(default)]
    pub summary: String,
    /// Raw description; may contain markup.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<IssueLink>,
    #[serde(default)]
    pub epic_link: Option<String>,
    /// Wiki document attached to the issue.
    #[serde(default)]
    pub doc_url: Option<String>,
}

#[async_trait]
pub trait IssueSource: Send + Sync {
    /// `Ok(None)` when the issue does not exist or is not visible.
    async fn get_issue(&self, key: &str) -> Result<Option<Issue>, ContextError>;
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Plain text of a wiki page, `Ok(None)` when unavailable.
    async fn get_document(&self, url: &str) -> Result<Option<String>, ContextError>;
}

/// In-memory sources, loadable from a JSON bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSources {
    #[serde(default)]
    pub issues: HashMap<String, Issue>,
    #[serde(default)]
    pub documents: HashMap<String, String>,
}

impl StaticSources {
    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.insert(issue.key.clone(), issue);
        self
    }

    pub fn with_document(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents.insert(url.into(), text.into());
        self
    }
}

#[async_trait]
impl IssueSource for StaticSources {
    async fn get_issue(&self, key: &str) -> Result<Option<Issue>, ContextError> {
        Ok(self.issues.get(key).cloned())
    }
}

#[async_trait]
impl DocumentSource for StaticSources {
    async fn get_document(&self, url: &str) -> Result<Option<String>, ContextError> {
        Ok(self.documents.get(url).cloned())
    }
}

// =============================================================================
// Config, errors, results
// =============================================================================

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("issue {0} not found")]
    StoryNotFound(String),
    #[error("lookup of {0} timed out")]
    Timeout(String),
    #[error("source error: {0}")]
    Source(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_truth_issues: usize,
    pub max_truth_chars_per_issue: i64,
    pub max_referenced_issues: usize,
    pub max_referenced_chars: i64,
    /// Levels of references followed beyond the first.
    pub reference_depth: usize,
    pub max_embedded_doc_chars: i64,
    pub max_anchor_doc_chars: i64,
    /// Lower-cased link labels that make a linked issue part of the truth.
    pub dependency_link_names: Vec<String>,
    /// Lower-cased link labels that lead from an epic to its parent.
    pub parent_link_names: Vec<String>,
    /// A URL is a wiki document when it contains one of these.
    pub document_url_markers: Vec<String>,
    pub lookup_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_truth_issues: 10,
            max_truth_chars_per_issue: 8_000,
            max_referenced_issues: 8,
            max_referenced_chars: 900,
            reference_depth: 1,
            max_embedded_doc_chars: 1_200,
            max_anchor_doc_chars: 2_500,
            dependency_link_names: vec!["is a dependency for".to_string()],
            parent_link_names: vec!["is child of".to_string()],
            document_url_markers: vec!["confluence".to_string()],
            lookup_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the generation input came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub truth_issues: Vec<String>,
    pub referenced_issues: Vec<String>,
    pub document_urls: Vec<String>,
    pub anchor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatheredContext {
    pub story_key: String,
    pub truth_text: String,
    pub context_text: String,
    pub confluence_text: String,
    /// Link target for end-to-end test cases.
    pub anchor_key: String,
    pub provenance: Provenance,
}

// =============================================================================
// Text helpers
// =============================================================================

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid space regex"));
static ISSUE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").expect("Invalid issue key regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s\]\)\|,<>"']+"#).expect("Invalid url regex")
});

/// Replace markup tags with spaces and collapse whitespace.
pub fn strip_html_tags(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let without_tags = TAG_RE.replace_all(text, " ");
    SPACE_RE.replace_all(&without_tags, " ").trim().to_string()
}

fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Issue keys referenced in `text`, first occurrence order.
pub fn issue_keys(text: &str) -> Vec<String> {
    dedup(ISSUE_KEY_RE.find_iter(text).map(|m| m.as_str().to_string()))
}

/// Wiki document URLs in `text`, first occurrence order.
pub fn document_urls(text: &str, markers: &[String]) -> Vec<String> {
    dedup(
        URL_RE
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|url| {
                let low = url.to_lowercase();
                markers.iter().any(|m| low.contains(m.as_str()))
            }),
    )
}

// =============================================================================
// Gathering
// =============================================================================

struct Fetcher<'a> {
    issues: &'a dyn IssueSource,
    docs: &'a dyn DocumentSource,
    timeout: Duration,
    cache: HashMap<String, Option<Issue>>,
}

impl Fetcher<'_> {
    async fn issue(&mut self, key: &str) -> Result<Option<Issue>, ContextError> {
        if let Some(hit) = self.cache.get(key) {
            return Ok(hit.clone());
        }
        let found = timeout(self.timeout, self.issues.get_issue(key))
            .await
            .map_err(|_| ContextError::Timeout(key.to_string()))??;
        self.cache.insert(key.to_string(), found.clone());
        Ok(found)
    }

    /// Best-effort lookup: failures are logged and read as absent.
    async fn issue_or_skip(&mut self, key: &str) -> Option<Issue> {
        match self.issue(key).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(key, "issue not found, skipping");
                }
                found
            }
            Err(e) => {
                warn!(key, error = %e, "issue lookup failed, skipping");
                None
            }
        }
    }

    async fn document(&self, url: &str) -> String {
        match timeout(self.timeout, self.docs.get_document(url)).await {
            Ok(Ok(text)) => text.unwrap_or_default(),
            Ok(Err(e)) => {
                warn!(url, error = %e, "document lookup failed, skipping");
                String::new()
            }
            Err(_) => {
                warn!(url, "document lookup timed out, skipping");
                String::new()
            }
        }
    }
}

struct TruthIssue {
    key: String,
    summary: String,
    description: String,
    raw: String,
}

/// Collect truth, supporting context and anchor documentation for `story_key`.
pub async fn gather_context(
    issues: &dyn IssueSource,
    docs: &dyn DocumentSource,
    config: &ContextConfig,
    story_key: &str,
) -> Result<GatheredContext, ContextError> {
    let mut fetch = Fetcher {
        issues,
        docs,
        timeout: config.lookup_timeout,
        cache: HashMap::new(),
    };

    let story = fetch
        .issue(story_key)
        .await?
        .ok_or_else(|| ContextError::StoryNotFound(story_key.to_string()))?;

    // ----- truth sources -----
    let dependencies: Vec<String> = dedup(
        story
            .links
            .iter()
            .filter(|l| l.matches(&config.dependency_link_names))
            .map(|l| l.key.clone()),
    );
    if !dependencies.is_empty() {
        info!(?dependencies, "dependency issues join the truth sources");
    }
    let seeds = dedup(
        std::iter::once(story_key.to_string())
            .chain(dependencies.into_iter().filter(|k| k != story_key)),
    );

    let mut linked: Vec<String> = Vec::new();
    for seed in &seeds {
        let Some(issue) = fetch.issue_or_skip(seed).await else {
            continue;
        };
        for key in issue_keys(&issue.description) {
            if !seeds.contains(&key) && !linked.contains(&key) && key != story_key {
                linked.push(key);
            }
        }
    }

    let mut truth_keys = dedup(seeds.iter().cloned().chain(linked));
    truth_keys.truncate(config.max_truth_issues);

    let mut truth = Vec::new();
    for key in &truth_keys {
        let Some(issue) = fetch.issue_or_skip(key).await else {
            continue;
        };
        let description = clip_text(
            &format!("truth:{key}"),
            &strip_html_tags(&issue.description),
            config.max_truth_chars_per_issue,
        );
        truth.push(TruthIssue {
            key: key.clone(),
            summary: issue.summary,
            description,
            raw: issue.description,
        });
    }

    // ----- anchor -----
    let anchor_key = match story.epic_link.as_deref() {
        Some(epic_key) => match fetch.issue_or_skip(epic_key).await {
            Some(epic) => epic
                .links
                .iter()
                .find(|l| l.matches(&config.parent_link_names))
                .map(|l| l.key.clone())
                .unwrap_or_else(|| epic_key.to_string()),
            None => epic_key.to_string(),
        },
        None => story_key.to_string(),
    };
    info!(anchor = %anchor_key, "end-to-end anchor resolved");

    // ----- additional context -----
    let mut context_text = String::new();
    let mut document_urls_used = Vec::new();
    let mut referenced_used = Vec::new();

    let mut embedded_urls = Vec::new();
    let mut referenced_seed = Vec::new();
    for t in &truth {
        embedded_urls.extend(document_urls(&t.raw, &config.document_url_markers));
        referenced_seed.extend(
            issue_keys(&t.raw)
                .into_iter()
                .filter(|k| !truth_keys.contains(k)),
        );
    }

    for url in dedup(embedded_urls) {
        let text = fetch.document(&url).await;
        if text.is_empty() {
            continue;
        }
        push_block(
            &mut context_text,
            &format!("DOCUMENT {url}"),
            &clip_text("confluence", &text, config.max_embedded_doc_chars),
        );
        document_urls_used.push(url);
    }

    let mut visited: HashSet<String> = truth_keys.iter().cloned().collect();
    let mut queue: VecDeque<(String, usize)> = dedup(referenced_seed)
        .into_iter()
        .map(|k| (k, config.reference_depth))
        .collect();

    while let Some((key, depth)) = queue.pop_front() {
        if referenced_used.len() >= config.max_referenced_issues {
            break;
        }
        if !visited.insert(key.clone()) {
            continue;
        }
        let Some(issue) = fetch.issue_or_skip(&key).await else {
            continue;
        };
        let description = clip_text(
            &format!("ref:{key}"),
            &strip_html_tags(&issue.description),
            config.max_referenced_chars,
        );
        push_block(
            &mut context_text,
            &format!("REFERENCED TICKET {key} | {}", issue.summary),
            &description,
        );
        referenced_used.push(key);

        if depth > 0 {
            for next in issue_keys(&issue.description) {
                if !visited.contains(&next) {
                    queue.push_back((next, depth - 1));
                }
            }
        }
    }

    // ----- anchor documentation -----
    let mut confluence_text = String::new();
    if let Some(doc_url) = fetch
        .issue_or_skip(&anchor_key)
        .await
        .and_then(|anchor| anchor.doc_url)
    {
        let text = fetch.document(&doc_url).await;
        confluence_text = clip_text("epic_confluence", &text, config.max_anchor_doc_chars);
        if !confluence_text.is_empty() {
            document_urls_used.push(doc_url);
        }
    }

    let provenance = Provenance {
        truth_issues: truth_keys,
        referenced_issues: referenced_used,
        document_urls: dedup(document_urls_used),
        anchor: anchor_key.clone(),
    };
    info!(
        truth = ?provenance.truth_issues,
        referenced = ?provenance.referenced_issues,
        documents = ?provenance.document_urls,
        anchor = %provenance.anchor,
        "context provenance"
    );

    let truth_text = truth
        .iter()
        .map(|t| {
            format!(
                "Ticket: {}\nSummary: {}\nDescription:\n{}\n",
                t.key, t.summary, t.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    Ok(GatheredContext {
        story_key: story_key.to_string(),
        truth_text,
        context_text,
        confluence_text,
        anchor_key,
        provenance,
    })
}

fn push_block(out: &mut String, header: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    out.push_str(&format!("\n{header}:\n{body}\n"));
}
