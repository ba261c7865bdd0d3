//! Run configuration, built once at startup and passed down by reference.

use std::time::Duration;

use thiserror::Error;

use crate::budget::BudgetConfig;
use crate::context::ContextConfig;
use crate::engine::GenerationConfig;
use crate::gap_fill::GapFillConfig;
use crate::gateway::completions::DEFAULT_BASE_URL;
use crate::gateway::GatewayConfig;
use crate::quality::QualityGate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("no API token: set SCENARIO_API_KEY or GITHUB_TOKEN")]
    MissingApiKey,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Cleaned bearer token. Empty when none was configured.
    pub api_key: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub endpoint: EndpointConfig,
    pub gateway: GatewayConfig,
    pub budget: BudgetConfig,
    pub gap_fill: GapFillConfig,
    pub generation: GenerationConfig,
    pub gate: QualityGate,
    pub context: ContextConfig,
}

/// Strip quotes, a `Bearer ` prefix and anything outside printable ASCII.
pub fn clean_token(raw: &str) -> String {
    let t: String = raw.trim().chars().filter(|c| *c != '"' && *c != '\'').collect();
    let bearer = t
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "));
    let t = if bearer { t[7..].trim().to_string() } else { t };
    t.chars().filter(|c| c.is_ascii_graphic()).collect()
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr>(
        &self,
        var: &'static str,
        expected: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.string(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var,
                expected,
                value,
            }),
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parsed(var, "number of seconds", default.as_secs())
            .map(Duration::from_secs)
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(var).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                var,
                expected: "boolean",
                value,
            }),
        }
    }
}

impl EngineConfig {
    /// Load from `SCENARIO_*` environment variables.
    ///
    /// | Env Var                               | Default                                 |
    /// |---------------------------------------|-----------------------------------------|
    /// | `SCENARIO_BASE_URL`                   | `https://models.inference.ai.azure.com` |
    /// | `SCENARIO_API_KEY` / `GITHUB_TOKEN`   | (none)                                  |
    /// | `SCENARIO_MODEL`                      | `gpt-4o`                                |
    /// | `SCENARIO_MAX_TOKENS`                 | `7800`                                  |
    /// | `SCENARIO_CHARS_PER_TOKEN`            | `4.0`                                   |
    /// | `SCENARIO_MAX_TRUTH_CHARS`            | `20000`                                 |
    /// | `SCENARIO_MAX_CONTEXT_CHARS`          | `8000`                                  |
    /// | `SCENARIO_MAX_CONFLUENCE_CHARS`       | `3000`                                  |
    /// | `SCENARIO_SAFETY_OVERHEAD_TOKENS`     | `450`                                   |
    /// | `SCENARIO_DROP_CONFLUENCE`            | `true`                                  |
    /// | `SCENARIO_MAX_ATTEMPTS`               | `8`                                     |
    /// | `SCENARIO_RATE_LIMIT_MAX_DELAY_SECS`  | `90`                                    |
    /// | `SCENARIO_FAIL_FAST_WAIT_SECS`        | `900`                                   |
    /// | `SCENARIO_JITTER_SEED`                | (random)                                |
    /// | `SCENARIO_GAP_FILL_ATTEMPTS`          | `6`                                     |
    /// | `SCENARIO_GAP_FILL_BATCH`             | `5`                                     |
    /// | `SCENARIO_COMPLETION_CONTEXT_CHARS`   | `3500`                                  |
    /// | `SCENARIO_TEMPERATURE`                | `0.2`                                   |
    /// | `SCENARIO_GENERATION_TIMEOUT_SECS`    | `180`                                   |
    /// | `SCENARIO_METADATA_TIMEOUT_SECS`      | `30`                                    |
    /// | `SCENARIO_OUTPUT_LANGUAGE`            | `Spanish`                               |
    /// | `SCENARIO_MAX_INVENTORY_TOTAL`        | `500`                                   |
    /// | `SCENARIO_MIN_CODE_CHARS`             | `600`                                   |
    /// | `SCENARIO_DEPENDENCY_LINK_NAMES`      | `is a dependency for`                   |
    /// | `SCENARIO_PARENT_LINK_NAMES`          | `is child of`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`EngineConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let mut cfg = EngineConfig::default();

        if let Some(url) = env.string("SCENARIO_BASE_URL") {
            cfg.endpoint.base_url = url.trim_end_matches('/').to_string();
        }
        cfg.endpoint.api_key = env
            .string("SCENARIO_API_KEY")
            .or_else(|| env.string("GITHUB_TOKEN"))
            .map(|k| clean_token(&k))
            .unwrap_or_default();

        let b = &mut cfg.budget;
        b.max_tokens = env.parsed("SCENARIO_MAX_TOKENS", "integer", b.max_tokens)?;
        b.chars_per_token = env.parsed("SCENARIO_CHARS_PER_TOKEN", "number", b.chars_per_token)?;
        b.max_truth_chars = env.parsed("SCENARIO_MAX_TRUTH_CHARS", "integer", b.max_truth_chars)?;
        b.max_context_chars =
            env.parsed("SCENARIO_MAX_CONTEXT_CHARS", "integer", b.max_context_chars)?;
        b.max_confluence_chars =
            env.parsed("SCENARIO_MAX_CONFLUENCE_CHARS", "integer", b.max_confluence_chars)?;
        b.safety_overhead_tokens = env.parsed(
            "SCENARIO_SAFETY_OVERHEAD_TOKENS",
            "integer",
            b.safety_overhead_tokens,
        )?;
        b.drop_confluence_if_too_large =
            env.flag("SCENARIO_DROP_CONFLUENCE", b.drop_confluence_if_too_large)?;

        let g = &mut cfg.gateway;
        g.max_attempts = env.parsed("SCENARIO_MAX_ATTEMPTS", "integer", g.max_attempts)?;
        g.rate_limit_max_delay =
            env.secs("SCENARIO_RATE_LIMIT_MAX_DELAY_SECS", g.rate_limit_max_delay)?;
        g.fail_fast_wait = env.secs("SCENARIO_FAIL_FAST_WAIT_SECS", g.fail_fast_wait)?;
        if env.string("SCENARIO_JITTER_SEED").is_some() {
            g.jitter_seed = Some(env.parsed("SCENARIO_JITTER_SEED", "integer", 0u64)?);
        }

        let f = &mut cfg.gap_fill;
        f.max_attempts = env.parsed("SCENARIO_GAP_FILL_ATTEMPTS", "integer", f.max_attempts)?;
        f.batch_size = env.parsed("SCENARIO_GAP_FILL_BATCH", "integer", f.batch_size)?;
        f.max_completion_context_chars = env.parsed(
            "SCENARIO_COMPLETION_CONTEXT_CHARS",
            "integer",
            f.max_completion_context_chars,
        )?;

        let gen = &mut cfg.generation;
        if let Some(model) = env.string("SCENARIO_MODEL") {
            gen.model = model;
        }
        gen.temperature = env.parsed("SCENARIO_TEMPERATURE", "number", gen.temperature)?;
        gen.timeout = env.secs("SCENARIO_GENERATION_TIMEOUT_SECS", gen.timeout)?;
        if let Some(language) = env.string("SCENARIO_OUTPUT_LANGUAGE") {
            gen.output_language = language;
        }
        gen.max_inventory_total =
            env.parsed("SCENARIO_MAX_INVENTORY_TOTAL", "integer", gen.max_inventory_total)?;

        cfg.context.lookup_timeout =
            env.secs("SCENARIO_METADATA_TIMEOUT_SECS", cfg.context.lookup_timeout)?;
        cfg.gate.min_code_chars =
            env.parsed("SCENARIO_MIN_CODE_CHARS", "integer", cfg.gate.min_code_chars)?;

        if let Some(names) = env.string("SCENARIO_DEPENDENCY_LINK_NAMES") {
            cfg.context.dependency_link_names = split_names(&names);
        }
        if let Some(names) = env.string("SCENARIO_PARENT_LINK_NAMES") {
            cfg.context.parent_link_names = split_names(&names);
        }

        Ok(cfg)
    }

    /// The API token, or an error when none was configured.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        if self.endpoint.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(&self.endpoint.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.budget.max_tokens, 7_800);
        assert_eq!(cfg.gateway.max_attempts, 8);
        assert_eq!(cfg.gateway.fail_fast_wait, Duration::from_secs(900));
        assert_eq!(cfg.gap_fill.batch_size, 5);
        assert_eq!(cfg.generation.timeout, Duration::from_secs(180));
        assert_eq!(cfg.generation.max_inventory_total, 500);
        assert_eq!(cfg.context.lookup_timeout, Duration::from_secs(30));
        assert_eq!(cfg.endpoint.base_url, DEFAULT_BASE_URL);
        assert!(matches!(cfg.require_api_key(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("SCENARIO_MAX_TOKENS", "16000"),
            ("SCENARIO_DROP_CONFLUENCE", "no"),
            ("SCENARIO_JITTER_SEED", "42"),
            ("SCENARIO_MODEL", "gpt-4o-mini"),
            ("SCENARIO_BASE_URL", "http://localhost:9000/"),
            ("SCENARIO_PARENT_LINK_NAMES", "Is Child Of | belongs to"),
        ])
        .unwrap();
        assert_eq!(cfg.budget.max_tokens, 16_000);
        assert!(!cfg.budget.drop_confluence_if_too_large);
        assert_eq!(cfg.gateway.jitter_seed, Some(42));
        assert_eq!(cfg.generation.model, "gpt-4o-mini");
        assert_eq!(cfg.endpoint.base_url, "http://localhost:9000");
        assert_eq!(cfg.context.parent_link_names, vec!["is child of", "belongs to"]);
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = load(&[("SCENARIO_GAP_FILL_BATCH", "five")]).unwrap_err();
        assert!(err.to_string().contains("SCENARIO_GAP_FILL_BATCH"));
    }

    #[test]
    fn api_key_is_cleaned_and_falls_back() {
        let cfg = load(&[("GITHUB_TOKEN", "\"Bearer ghp_abc\u{7}123\"")]).unwrap();
        assert_eq!(cfg.require_api_key().unwrap(), "ghp_abc123");
        assert_eq!(clean_token("  'tok'  "), "tok");
        assert_eq!(clean_token("bearer xyz"), "xyz");
    }
}
