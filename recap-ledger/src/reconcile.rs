//! Deciding what to do with an assembled transaction given what the ledger
//! already holds.
//!
//! The snapshot is fetched once per batch and updated in memory after every
//! write, so two copies of the same receipt in one batch are not both posted.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use recap_core::TransactionCandidate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::EntryUpdate;
use crate::entry::{ClearedState, LedgerEntry};

/// Two transactions with the same key are the same posting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: i64,
    pub memo: String,
}

impl DedupKey {
    pub fn from_candidate(candidate: &TransactionCandidate) -> Option<Self> {
        Some(Self {
            account_id: candidate.account_id.clone(),
            date: candidate.date,
            amount: candidate.amount,
            memo: candidate.memo.clone()?,
        })
    }

    pub fn from_entry(entry: &LedgerEntry) -> Option<Self> {
        Some(Self {
            account_id: entry.account_id.clone(),
            date: entry.date,
            amount: entry.amount,
            memo: entry.memo.clone()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// Skip when an entry with the same dedup key exists.
    #[default]
    ExactKey,
    /// Reuse or replace open entries that match line by line.
    Uncleared,
}

impl ReconcilePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePolicy::ExactKey => "exact-key",
            ReconcilePolicy::Uncleared => "uncleared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    Skip { existing_id: String },
    /// Move an existing entry onto this receipt instead of posting a new one.
    Reuse { entry_id: String, update: EntryUpdate },
    /// Post the split transaction, then remove the entries it supersedes.
    /// Ids are sorted.
    CreateAndDelete { delete_ids: Vec<String> },
}

/// Existing entries for one account, kept current across a batch.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    entries: Vec<LedgerEntry>,
    index: HashMap<DedupKey, String>,
}

impl LedgerSnapshot {
    pub fn new(entries: Vec<LedgerEntry>) -> Self {
        let mut snapshot = Self::default();
        for entry in entries {
            snapshot.insert(entry);
        }
        snapshot
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: LedgerEntry) {
        if !entry.deleted {
            if let Some(key) = DedupKey::from_entry(&entry) {
                self.index.insert(key, entry.id.clone());
            }
        }
        self.entries.push(entry);
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .filter(|e| !e.deleted)
            .filter_map(|e| DedupKey::from_entry(e).map(|k| (k, e.id.clone())))
            .collect();
    }

    /// Id of a live entry with the same key.
    pub fn find_duplicate(&self, key: &DedupKey) -> Option<&str> {
        self.index.get(key).map(String::as_str)
    }

    pub fn record_created(&mut self, id: &str, candidate: &TransactionCandidate) {
        self.insert(LedgerEntry {
            id: id.to_string(),
            account_id: candidate.account_id.clone(),
            date: candidate.date,
            amount: candidate.amount,
            memo: candidate.memo.clone(),
            payee_name: candidate.payee_name.clone(),
            category_id: candidate.category_id.clone(),
            cleared: ClearedState::parse(&candidate.cleared).unwrap_or_default(),
            deleted: false,
        });
    }

    pub fn record_updated(&mut self, id: &str, update: &EntryUpdate) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.date = update.date;
            entry.memo = Some(update.memo.clone());
            self.rebuild_index();
        }
    }

    pub fn record_deleted(&mut self, id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.deleted = true;
            self.rebuild_index();
        }
    }
}

/// One ledger line of the candidate: the flat transaction itself, or each
/// subtransaction of a split.
struct LineKey<'a> {
    amount: i64,
    payee_name: Option<&'a str>,
    category_id: Option<&'a str>,
}

fn line_keys(candidate: &TransactionCandidate) -> Vec<LineKey<'_>> {
    if !candidate.is_split() {
        return vec![LineKey {
            amount: candidate.amount,
            payee_name: candidate.payee_name.as_deref(),
            category_id: candidate.category_id.as_deref(),
        }];
    }
    candidate
        .subtransactions
        .iter()
        .map(|s| LineKey {
            amount: s.amount,
            payee_name: s.payee_name.as_deref(),
            category_id: Some(s.category_id.as_str()),
        })
        .collect()
}

/// Uncleared entries that no other receipt has claimed, plus the candidate's
/// own earlier posting. Entries posted for another receipt are never touched.
fn is_claimable(entry: &LedgerEntry, candidate: &TransactionCandidate) -> bool {
    if entry.deleted || entry.cleared == ClearedState::Reconciled {
        return false;
    }
    match entry.receipt_memo() {
        Some(memo) => candidate.memo.as_deref() == Some(memo),
        None => entry.is_uncleared(),
    }
}

/// For each line, the earliest unused claimable entry with the same amount,
/// payee and category. An entry is matched at most once.
fn match_open_entries<'a>(
    snapshot: &'a LedgerSnapshot,
    candidate: &TransactionCandidate,
) -> Vec<&'a LedgerEntry> {
    let mut open: Vec<&LedgerEntry> = snapshot
        .entries()
        .iter()
        .filter(|e| e.account_id == candidate.account_id && is_claimable(e, candidate))
        .collect();
    open.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let mut used: HashSet<&str> = HashSet::new();
    let mut matches = Vec::new();
    for line in line_keys(candidate) {
        let found = open.iter().copied().find(|e| {
            !used.contains(e.id.as_str())
                && e.amount == line.amount
                && e.payee_name.as_deref() == line.payee_name
                && e.category_id.as_deref() == line.category_id
        });
        if let Some(entry) = found {
            used.insert(entry.id.as_str());
            matches.push(entry);
        }
    }
    matches
}

fn exact_key(snapshot: &LedgerSnapshot, candidate: &TransactionCandidate) -> Decision {
    match DedupKey::from_candidate(candidate)
        .as_ref()
        .and_then(|key| snapshot.find_duplicate(key))
    {
        Some(id) => Decision::Skip {
            existing_id: id.to_string(),
        },
        None => Decision::Create,
    }
}

fn uncleared(snapshot: &LedgerSnapshot, candidate: &TransactionCandidate) -> Decision {
    // A split parent never matches line by line, so it is guarded by its key.
    if candidate.is_split() {
        if let decision @ Decision::Skip { .. } = exact_key(snapshot, candidate) {
            return decision;
        }
    }

    let matches = match_open_entries(snapshot, candidate);
    if !candidate.is_split() {
        return match matches.first() {
            Some(entry) => Decision::Reuse {
                entry_id: entry.id.clone(),
                update: EntryUpdate {
                    date: candidate.date,
                    memo: candidate.memo.clone().unwrap_or_default(),
                },
            },
            None => Decision::Create,
        };
    }

    if matches.is_empty() {
        return Decision::Create;
    }
    let mut delete_ids: Vec<String> = matches.iter().map(|e| e.id.clone()).collect();
    delete_ids.sort();
    Decision::CreateAndDelete { delete_ids }
}

pub fn decide(
    policy: ReconcilePolicy,
    snapshot: &LedgerSnapshot,
    candidate: &TransactionCandidate,
) -> Decision {
    let decision = match policy {
        ReconcilePolicy::ExactKey => exact_key(snapshot, candidate),
        ReconcilePolicy::Uncleared => uncleared(snapshot, candidate),
    };
    debug!(policy = policy.as_str(), ?decision, memo = ?candidate.memo, "reconcile decision");
    decision
}
