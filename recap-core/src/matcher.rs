//! Deterministic mapping of receipt line items to ledger category and payee.
//!
//! Precedence: all `exact` rules, then all `contains` rules, then all `regex`
//! rules; configured order within a type. A looser rule never wins over a
//! more specific one, whatever order the configuration lists them in.

use regex::Regex;
use tracing::debug;

use crate::error::MappingError;
use crate::models::{
    FALLBACK_RULE_ID, MappingConfig, MappingRule, MatchType, MatchedSubscription, SubscriptionLine,
};

/// A rule with its pattern compiled.
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MappingRule,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, description: &str) -> bool {
        let pattern = self.rule.match_spec.pattern.as_str();
        match self.rule.match_spec.kind {
            MatchType::Exact => description == pattern,
            MatchType::Contains => description.contains(pattern),
            MatchType::Regex => self
                .regex
                .as_ref()
                .map(|re| re.is_match(description))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleMatcher {
    /// Enabled rules, already in evaluation order.
    ordered: Vec<CompiledRule>,
    config: MappingConfig,
}

impl RuleMatcher {
    /// Compile every enabled rule once.
    pub fn new(config: &MappingConfig) -> Result<Self, MappingError> {
        let mut ordered = Vec::new();
        for kind in MatchType::PRECEDENCE {
            for rule in config.rules.iter().filter(|r| r.enabled && r.match_spec.kind == kind) {
                let regex = match kind {
                    MatchType::Regex => Some(Regex::new(&rule.match_spec.pattern).map_err(|e| {
                        MappingError::InvalidPattern {
                            rule_id: rule.id.clone(),
                            message: e.to_string(),
                        }
                    })?),
                    _ => None,
                };
                ordered.push(CompiledRule {
                    rule: rule.clone(),
                    regex,
                });
            }
        }

        Ok(Self {
            ordered,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// First rule that matches `description`, in precedence order.
    pub fn find_rule(&self, description: &str) -> Option<&MappingRule> {
        let normalized = normalize_description(description);
        self.ordered
            .iter()
            .find(|c| c.matches(&normalized))
            .map(|c| &c.rule)
    }

    /// Resolve every line, or fail naming all lines that could not be mapped.
    pub fn match_subscriptions(
        &self,
        subscriptions: &[SubscriptionLine],
    ) -> Result<Vec<MatchedSubscription>, MappingError> {
        let mut matched = Vec::with_capacity(subscriptions.len());
        let mut unmatched = Vec::new();

        for sub in subscriptions {
            if let Some(rule) = self.find_rule(&sub.description) {
                debug!(description = %sub.description, rule = %rule.id, "matched mapping rule");
                matched.push(MatchedSubscription {
                    description: sub.description.clone(),
                    base_amount: sub.base_amount,
                    category_id: rule.category_id.clone(),
                    payee_id: rule.payee_id.clone(),
                    payee_name: rule.payee_name.clone(),
                    mapping_rule_id: rule.id.clone(),
                });
                continue;
            }

            match self.config.fallback.as_ref().filter(|f| f.enabled) {
                Some(fallback) => {
                    let category_id = fallback
                        .category_id
                        .clone()
                        .or_else(|| self.config.defaults.category_id.clone())
                        .ok_or(MappingError::FallbackMisconfigured {
                            missing: "category_id",
                        })?;
                    let payee_name = fallback.payee_name.clone().ok_or(
                        MappingError::FallbackMisconfigured {
                            missing: "payee_name",
                        },
                    )?;
                    debug!(description = %sub.description, "using fallback mapping");
                    matched.push(MatchedSubscription {
                        description: sub.description.clone(),
                        base_amount: sub.base_amount,
                        category_id,
                        payee_id: fallback.payee_id.clone(),
                        payee_name,
                        mapping_rule_id: FALLBACK_RULE_ID.to_string(),
                    });
                }
                None => unmatched.push(sub.description.clone()),
            }
        }

        if !unmatched.is_empty() {
            return Err(MappingError::UnmappedSubscription {
                descriptions: unmatched,
            });
        }
        Ok(matched)
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize_description(description: &str) -> String {
    description.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FallbackMapping, MappingDefaults};
    use rust_decimal::Decimal;

    fn line(desc: &str) -> SubscriptionLine {
        SubscriptionLine::new(desc, Decimal::new(999, 2))
    }

    fn config(rules: Vec<MappingRule>, fallback: Option<FallbackMapping>) -> MappingConfig {
        MappingConfig {
            defaults: MappingDefaults::new("acct-1"),
            rules,
            fallback,
        }
    }

    #[test]
    fn test_exact_beats_contains_and_regex_regardless_of_order() {
        let cfg = config(
            vec![
                MappingRule::new("contains_rule", MatchType::Contains, "Apple", "c1", "Contains"),
                MappingRule::new("regex_rule", MatchType::Regex, r"(?i)apple\s+music", "c3", "Regex"),
                MappingRule::new("exact_rule", MatchType::Exact, "Apple Music", "c2", "Exact"),
            ],
            None,
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        let matched = matcher.match_subscriptions(&[line("Apple Music")]).unwrap();
        assert_eq!(matched[0].mapping_rule_id, "exact_rule");
        assert_eq!(matched[0].payee_name, "Exact");
        assert_eq!(matched[0].category_id, "c2");
    }

    #[test]
    fn test_contains_beats_regex() {
        let cfg = config(
            vec![
                MappingRule::new("regex_rule", MatchType::Regex, "Music", "c3", "Regex"),
                MappingRule::new("contains_rule", MatchType::Contains, "Music", "c1", "Contains"),
            ],
            None,
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        assert_eq!(matcher.find_rule("Apple Music").unwrap().id, "contains_rule");
    }

    #[test]
    fn test_list_order_within_type_and_disabled_rules_skipped() {
        let cfg = config(
            vec![
                MappingRule::new("first", MatchType::Contains, "iCloud", "c1", "First").disabled(),
                MappingRule::new("second", MatchType::Contains, "iCloud", "c2", "Second"),
                MappingRule::new("third", MatchType::Contains, "iCloud+", "c3", "Third"),
            ],
            None,
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        assert_eq!(matcher.find_rule("iCloud+ 2TB").unwrap().id, "second");
    }

    #[test]
    fn test_description_whitespace_is_normalized_before_exact_match() {
        let cfg = config(
            vec![MappingRule::new("exact", MatchType::Exact, "Apple One", "c1", "Apple One")],
            None,
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        assert!(matcher.find_rule("  Apple   One ").is_some());
    }

    #[test]
    fn test_unmapped_reports_all_descriptions() {
        let cfg = config(
            vec![MappingRule::new("music", MatchType::Exact, "Apple Music", "c1", "Apple Music")],
            None,
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        let err = matcher
            .match_subscriptions(&[line("Foo"), line("Apple Music"), line("Bar")])
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::UnmappedSubscription {
                descriptions: vec!["Foo".to_string(), "Bar".to_string()]
            }
        );
    }

    #[test]
    fn test_fallback_uses_default_category() {
        let mut cfg = config(
            vec![],
            Some(FallbackMapping {
                enabled: true,
                payee_name: Some("Apple".to_string()),
                ..Default::default()
            }),
        );
        cfg.defaults.category_id = Some("cat-default".to_string());
        let matcher = RuleMatcher::new(&cfg).unwrap();
        let matched = matcher.match_subscriptions(&[line("Unknown App")]).unwrap();
        assert_eq!(matched[0].category_id, "cat-default");
        assert_eq!(matched[0].mapping_rule_id, FALLBACK_RULE_ID);
        assert!(matched[0].used_fallback());
    }

    #[test]
    fn test_fallback_without_category_is_misconfigured() {
        let cfg = config(
            vec![],
            Some(FallbackMapping {
                enabled: true,
                payee_name: Some("Apple".to_string()),
                ..Default::default()
            }),
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        let err = matcher.match_subscriptions(&[line("Unknown App")]).unwrap_err();
        assert_eq!(
            err,
            MappingError::FallbackMisconfigured {
                missing: "category_id"
            }
        );
    }

    #[test]
    fn test_disabled_fallback_is_ignored() {
        let cfg = config(
            vec![],
            Some(FallbackMapping {
                enabled: false,
                category_id: Some("c".to_string()),
                payee_name: Some("Apple".to_string()),
                ..Default::default()
            }),
        );
        let matcher = RuleMatcher::new(&cfg).unwrap();
        assert!(matches!(
            matcher.match_subscriptions(&[line("Unknown App")]),
            Err(MappingError::UnmappedSubscription { .. })
        ));
    }

    #[test]
    fn test_invalid_regex_rejected_at_compile_time() {
        let cfg = config(
            vec![MappingRule::new("bad", MatchType::Regex, "(unclosed", "c1", "Bad")],
            None,
        );
        assert!(matches!(
            RuleMatcher::new(&cfg),
            Err(MappingError::InvalidPattern { .. })
        ));
    }
}
