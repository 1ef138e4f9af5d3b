//! Receipt, mapping and split-line types shared by every stage of the pipeline.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Rule id recorded on items resolved through the fallback mapping.
pub const FALLBACK_RULE_ID: &str = "fallback";

/// One subscription charge as printed on the receipt, before tax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionLine {
    pub description: String,
    pub base_amount: Decimal,
}

impl SubscriptionLine {
    pub fn new(description: impl Into<String>, base_amount: Decimal) -> Self {
        Self {
            description: description.into(),
            base_amount,
        }
    }
}

/// Structured record extracted from a single receipt document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReceipt {
    /// Name of the document this came from (file path, `gmail-<id>.eml`, ...)
    pub source_id: String,
    pub receipt_id: String,
    pub receipt_date: NaiveDate,
    pub currency: String,
    /// Never empty on a successful parse.
    pub subscriptions: Vec<SubscriptionLine>,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
    #[serde(skip_serializing)]
    pub raw_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Contains,
    Regex,
}

impl MatchType {
    /// Evaluation order: more specific match types always outrank looser ones.
    pub const PRECEDENCE: [MatchType; 3] = [MatchType::Exact, MatchType::Contains, MatchType::Regex];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Contains => "contains",
            MatchType::Regex => "regex",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    #[serde(rename = "type")]
    pub kind: MatchType,
    #[serde(alias = "value")]
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "match")]
    pub match_spec: MatchSpec,
    #[serde(alias = "ynab_category_id")]
    pub category_id: String,
    #[serde(alias = "ynab_payee_name")]
    pub payee_name: String,
    #[serde(default, alias = "ynab_payee_id")]
    pub payee_id: Option<String>,
}

impl MappingRule {
    pub fn new(
        id: impl Into<String>,
        kind: MatchType,
        pattern: impl Into<String>,
        category_id: impl Into<String>,
        payee_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            match_spec: MatchSpec {
                kind,
                pattern: pattern.into(),
            },
            category_id: category_id.into(),
            payee_name: payee_name.into(),
            payee_id: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Assignment used when no rule matches an item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FallbackMapping {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "ynab_category_id")]
    pub category_id: Option<String>,
    #[serde(default, alias = "ynab_payee_id")]
    pub payee_id: Option<String>,
    #[serde(default, alias = "ynab_payee_name")]
    pub payee_name: Option<String>,
    #[serde(default, alias = "ynab_flag_color")]
    pub flag_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDefaults {
    #[serde(alias = "ynab_account_id")]
    pub account_id: String,
    #[serde(default, alias = "ynab_category_id")]
    pub category_id: Option<String>,
    #[serde(default, alias = "ynab_flag_color")]
    pub flag_color: Option<String>,
    #[serde(default = "default_currency", alias = "default_currency")]
    pub currency: String,
    /// Payee of the parent transaction when a receipt splits into several lines.
    #[serde(default = "default_split_payee")]
    pub split_payee_name: String,
}

impl MappingDefaults {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            category_id: None,
            flag_color: None,
            currency: default_currency(),
            split_payee_name: default_split_payee(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub defaults: MappingDefaults,
    pub rules: Vec<MappingRule>,
    #[serde(default)]
    pub fallback: Option<FallbackMapping>,
}

/// A subscription line with its resolved ledger category and payee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedSubscription {
    pub description: String,
    pub base_amount: Decimal,
    pub category_id: String,
    pub payee_id: Option<String>,
    pub payee_name: String,
    pub mapping_rule_id: String,
}

impl MatchedSubscription {
    pub fn used_fallback(&self) -> bool {
        self.mapping_rule_id == FALLBACK_RULE_ID
    }
}

/// A matched line with its share of the receipt tax, all in milliunits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitLine {
    pub description: String,
    pub base_minor: i64,
    pub tax_minor: i64,
    pub total_minor: i64,
    pub category_id: String,
    pub payee_id: Option<String>,
    pub payee_name: String,
    pub mapping_rule_id: String,
}

impl SplitLine {
    pub fn used_fallback(&self) -> bool {
        self.mapping_rule_id == FALLBACK_RULE_ID
    }
}

fn default_enabled() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_split_payee() -> String {
    "Apple".to_string()
}
