//! Existing ledger entries, normalized from whatever shape the ledger returns.

use chrono::NaiveDate;
use recap_core::RECEIPT_MEMO_PREFIX;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearedState {
    Cleared,
    #[default]
    Uncleared,
    Reconciled,
}

impl ClearedState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cleared" => Some(ClearedState::Cleared),
            "uncleared" => Some(ClearedState::Uncleared),
            "reconciled" => Some(ClearedState::Reconciled),
            _ => None,
        }
    }
}

/// One transaction already in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: i64,
    pub memo: Option<String>,
    pub payee_name: Option<String>,
    pub category_id: Option<String>,
    pub cleared: ClearedState,
    pub deleted: bool,
}

impl LedgerEntry {
    /// Live and still awaiting review by the user.
    pub fn is_uncleared(&self) -> bool {
        !self.deleted && self.cleared == ClearedState::Uncleared
    }

    /// The memo, when it names the receipt this entry was posted for.
    pub fn receipt_memo(&self) -> Option<&str> {
        self.memo
            .as_deref()
            .filter(|memo| memo.starts_with(RECEIPT_MEMO_PREFIX))
    }
}

/// Typed transaction record as the ledger API documents it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub id: String,
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: i64,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub payee_name: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub cleared: ClearedState,
    #[serde(default)]
    pub deleted: bool,
}

/// An entry as it arrives: a typed record, or a loose key/value map.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Record(TransactionDetail),
    Map(Map<String, Value>),
}

/// The single boundary adapter from either entry shape to [`LedgerEntry`].
///
/// Maps missing an id, account, integer amount or parseable date are skipped.
pub fn normalize_entry(raw: RawEntry) -> Option<LedgerEntry> {
    match raw {
        RawEntry::Record(detail) => Some(LedgerEntry {
            id: detail.id,
            account_id: detail.account_id,
            date: detail.date,
            amount: detail.amount,
            memo: detail.memo,
            payee_name: detail.payee_name,
            category_id: detail.category_id,
            cleared: detail.cleared,
            deleted: detail.deleted,
        }),
        RawEntry::Map(map) => {
            let entry = entry_from_map(&map);
            if entry.is_none() {
                debug!(keys = ?map.keys().collect::<Vec<_>>(), "skipping unusable ledger entry");
            }
            entry
        }
    }
}

pub fn normalize_entries(raw: impl IntoIterator<Item = RawEntry>) -> Vec<LedgerEntry> {
    raw.into_iter().filter_map(normalize_entry).collect()
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn entry_from_map(map: &Map<String, Value>) -> Option<LedgerEntry> {
    let date = ["date", "var_date"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())?;
    let cleared = match map.get("cleared") {
        Some(Value::String(s)) => ClearedState::parse(s)?,
        _ => ClearedState::default(),
    };

    Some(LedgerEntry {
        id: str_field(map, "id")?,
        account_id: str_field(map, "account_id")?,
        date,
        amount: map.get("amount").and_then(Value::as_i64)?,
        memo: str_field(map, "memo"),
        payee_name: str_field(map, "payee_name"),
        category_id: str_field(map, "category_id"),
        cleared,
        deleted: map.get("deleted").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_record_and_map_normalize_identically() {
        let body = json!({
            "id": "tx-1",
            "account_id": "acct-1",
            "date": "2026-02-12",
            "amount": -21550,
            "memo": "Receipt: MKT-SIMPLE1",
            "payee_name": "Apple",
            "category_id": "cat-1",
            "cleared": "uncleared",
            "deleted": false
        });
        let record: TransactionDetail = serde_json::from_value(body.clone()).unwrap();
        let from_record = normalize_entry(RawEntry::Record(record)).unwrap();
        let from_map = normalize_entry(RawEntry::Map(body.as_object().unwrap().clone())).unwrap();
        assert_eq!(from_record, from_map);
        assert_eq!(from_record.cleared, ClearedState::Uncleared);
    }

    #[test]
    fn test_untagged_falls_back_to_map() {
        // `var_date` instead of `date` does not fit the typed record
        let raw: RawEntry = serde_json::from_value(json!({
            "id": "tx-2",
            "account_id": "acct-1",
            "var_date": "2026-02-13",
            "amount": 1000,
            "cleared": "Reconciled"
        }))
        .unwrap();
        assert!(matches!(raw, RawEntry::Map(_)));
        let entry = normalize_entry(raw).unwrap();
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2026, 2, 13).unwrap());
        assert_eq!(entry.cleared, ClearedState::Reconciled);
        assert!(!entry.is_uncleared());
    }

    #[test]
    fn test_incomplete_maps_are_skipped() {
        let raws = vec![
            RawEntry::Map(json!({"id": "a", "account_id": "x", "date": "2026-01-01"}).as_object().unwrap().clone()),
            RawEntry::Map(json!({"id": "b", "account_id": "x", "date": "nope", "amount": 1}).as_object().unwrap().clone()),
            RawEntry::Map(json!({"id": "c", "account_id": "x", "date": "2026-01-01", "amount": 1}).as_object().unwrap().clone()),
        ];
        let entries = normalize_entries(raws);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "c");
    }
}
