use anyhow::{Context, Result, bail};
use recap_core::{MappingConfig, RuleMatcher};
use recap_ledger::{ReconcilePolicy, RetryPolicy, YnabSettings};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::relative_to_config;

pub const SUPPORTED_VERSION: u32 = 1;
pub const TOKEN_ENV_VAR: &str = "YNAB_API_TOKEN";
pub const FLAG_COLORS: [&str; 6] = ["red", "orange", "yellow", "green", "blue", "purple"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: u32,
    pub ynab: YnabSection,
    #[serde(default)]
    pub app: AppSection,
    pub mappings: MappingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YnabSection {
    /// Falls back to `$YNAB_API_TOKEN` when unset.
    #[serde(default)]
    pub api_token: Option<String>,
    pub budget_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub policy: ReconcilePolicy,
    #[serde(default)]
    pub reimport: bool,
}

fn default_api_url() -> String {
    recap_ledger::ynab::DEFAULT_API_URL.to_string()
}

fn default_lookback_days() -> i64 {
    recap_ledger::pipeline::DEFAULT_LOOKBACK_DAYS
}

fn default_timeout_secs() -> u64 {
    recap_ledger::ynab::DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// The configured token, or the environment's.
    pub fn api_token(&self) -> Result<String> {
        resolve_api_token(
            self.ynab.api_token.as_deref(),
            std::env::var(TOKEN_ENV_VAR).ok().as_deref(),
        )
    }

    pub fn ynab_settings(&self, api_token: String) -> YnabSettings {
        YnabSettings {
            api_url: self.ynab.api_url.clone(),
            api_token,
            budget_id: self.ynab.budget_id.clone(),
            timeout: Duration::from_secs(self.ynab.timeout_secs),
            retry: RetryPolicy::default(),
        }
    }
}

pub fn resolve_api_token(configured: Option<&str>, env: Option<&str>) -> Result<String> {
    configured
        .or(env)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .with_context(|| format!("no ledger API token: set ynab.api_token or ${}", TOKEN_ENV_VAR))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut config = parse_config(&s).with_context(|| format!("parse {}", path.display()))?;
    config.app.log_path = config
        .app
        .log_path
        .take()
        .map(|log_path| relative_to_config(path, &log_path));
    Ok(config)
}

pub fn parse_config(s: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(s).context("invalid YAML")?;
    validate(&mut config)?;
    Ok(config)
}

fn non_empty(value: &str, key: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("'{}' must be a non-empty string", key);
    }
    Ok(())
}

/// Lowercase a flag color and check it against the colors the ledger knows.
fn normalize_flag_color(color: &mut Option<String>, key: &str) -> Result<()> {
    if let Some(value) = color.as_mut() {
        let normalized = value.trim().to_lowercase();
        if !FLAG_COLORS.contains(&normalized.as_str()) {
            bail!("'{}' must be one of: {}", key, FLAG_COLORS.join(", "));
        }
        *value = normalized;
    }
    Ok(())
}

fn validate(config: &mut Config) -> Result<()> {
    if config.version != SUPPORTED_VERSION {
        bail!(
            "unsupported config version: {} (expected {})",
            config.version,
            SUPPORTED_VERSION
        );
    }

    non_empty(&config.ynab.budget_id, "ynab.budget_id")?;
    non_empty(&config.ynab.api_url, "ynab.api_url")?;
    if config.ynab.lookback_days <= 0 {
        bail!("'ynab.lookback_days' must be a positive integer");
    }
    if config.ynab.timeout_secs == 0 {
        bail!("'ynab.timeout_secs' must be a positive integer");
    }

    let mappings = &mut config.mappings;
    non_empty(&mappings.defaults.account_id, "mappings.defaults.account_id")?;
    normalize_flag_color(&mut mappings.defaults.flag_color, "mappings.defaults.flag_color")?;

    if mappings.rules.is_empty() {
        bail!("'mappings.rules' must be a non-empty list");
    }
    let mut seen = HashSet::new();
    for rule in &mappings.rules {
        non_empty(&rule.id, "mappings.rules[].id")?;
        non_empty(&rule.match_spec.pattern, &format!("rule '{}' match.pattern", rule.id))?;
        if !seen.insert(rule.id.as_str()) {
            bail!("duplicate rule id: '{}'", rule.id);
        }
    }

    if let Some(fallback) = mappings.fallback.as_mut() {
        normalize_flag_color(&mut fallback.flag_color, "mappings.fallback.flag_color")?;
        let has_payee = fallback
            .payee_name
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());
        if fallback.enabled && !has_payee {
            bail!("'mappings.fallback.payee_name' is required when the fallback is enabled");
        }
    }

    // Disabled rules must compile too.
    let mut all_rules = mappings.clone();
    all_rules.rules.iter_mut().for_each(|r| r.enabled = true);
    RuleMatcher::new(&all_rules).context("compile mapping rules")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_core::MatchType;

    const VALID: &str = r#"
version: 1
ynab:
  api_token: "tok"
  budget_id: "budget-1"
app:
  log_path: "logs/run.log"
  policy: uncleared
mappings:
  defaults:
    ynab_account_id: "acct-1"
    ynab_flag_color: "Purple"
  rules:
    - id: apple_music
      match: {type: exact, value: "Apple Music"}
      ynab_category_id: "cat-music"
      ynab_payee_name: "Apple Music"
    - id: icloud
      enabled: false
      match: {type: regex, pattern: "^iCloud"}
      category_id: "cat-cloud"
      payee_name: "iCloud"
  fallback:
    enabled: true
    ynab_payee_name: "Apple"
    ynab_flag_color: "ORANGE"
"#;

    #[test]
    fn test_valid_config_with_aliases() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(config.ynab.api_url, "https://api.ynab.com/v1");
        assert_eq!(config.ynab.lookback_days, 7);
        assert_eq!(config.ynab.timeout_secs, 30);
        assert_eq!(config.app.policy, ReconcilePolicy::Uncleared);
        assert!(!config.app.reimport);

        let mappings = &config.mappings;
        assert_eq!(mappings.defaults.account_id, "acct-1");
        assert_eq!(mappings.defaults.currency, "USD");
        assert_eq!(mappings.defaults.flag_color.as_deref(), Some("purple"));
        assert_eq!(mappings.rules[0].match_spec.kind, MatchType::Exact);
        assert_eq!(mappings.rules[0].match_spec.pattern, "Apple Music");
        assert!(!mappings.rules[1].enabled);
        let fallback = mappings.fallback.as_ref().unwrap();
        assert_eq!(fallback.flag_color.as_deref(), Some("orange"));
    }

    fn invalid(from: &str, to: &str) -> String {
        assert!(VALID.contains(from), "fixture lacks {from}");
        let err = parse_config(&VALID.replacen(from, to, 1)).unwrap_err();
        format!("{:#}", err)
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert!(invalid("version: 1", "version: 2").contains("unsupported config version"));
    }

    #[test]
    fn test_rejects_bad_flag_color() {
        assert!(invalid("\"Purple\"", "\"pink\"").contains("flag_color"));
    }

    #[test]
    fn test_rejects_duplicate_rule_ids() {
        assert!(invalid("- id: icloud", "- id: apple_music").contains("duplicate rule id"));
    }

    #[test]
    fn test_rejects_bad_regex() {
        assert!(invalid("\"^iCloud\"", "\"(unclosed\"").contains("invalid regex"));
    }

    #[test]
    fn test_rejects_fallback_without_payee() {
        assert!(invalid("    ynab_payee_name: \"Apple\"\n", "").contains("fallback.payee_name"));
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(invalid("policy: uncleared", "policy: newest").contains("invalid YAML"));
    }

    #[test]
    fn test_rejects_empty_rules() {
        let s = r#"
version: 1
ynab: {budget_id: b}
mappings:
  defaults: {account_id: a}
  rules: []
"#;
        let err = format!("{:#}", parse_config(s).unwrap_err());
        assert!(err.contains("non-empty list"));
    }

    #[test]
    fn test_token_resolution() {
        assert_eq!(resolve_api_token(Some("cfg"), Some("env")).unwrap(), "cfg");
        assert_eq!(resolve_api_token(None, Some(" env ")).unwrap(), "env");
        assert!(resolve_api_token(None, None).is_err());
        assert!(resolve_api_token(Some("  "), None).is_err());
    }

    #[test]
    fn test_load_resolves_log_path_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, VALID).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.app.log_path, Some(dir.path().join("logs/run.log")));
    }
}
