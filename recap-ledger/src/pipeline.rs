//! Batch coordinator: documents in, ledger actions out.
//!
//! Documents are processed one at a time. A failed document never stops the
//! batch; the only state carried between documents is the ledger snapshot.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use rand::Rng;
use recap_core::{
    ParseError, ParsedReceipt, RuleMatcher, SplitLine, TransactionCandidate, assemble_transaction,
    build_split_lines, validate_totals,
};
use recap_ingest::{FetchedDocument, SourceDocument, parse_document};
use tracing::{info, warn};

use crate::client::Ledger;
use crate::error::{LedgerApiError, ProcessError};
use crate::reconcile::{Decision, LedgerSnapshot, ReconcilePolicy, decide};

/// Re-import ids tried before giving up on a duplicate.
pub const MAX_REIMPORT_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Source of the two-digit suffix used for re-import ids.
pub trait SuffixSource: Send + Sync {
    /// A value in `0..=99`.
    fn next_suffix(&mut self) -> u8;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSuffix;

impl SuffixSource for RandomSuffix {
    fn next_suffix(&mut self) -> u8 {
        rand::thread_rng().gen_range(0..100)
    }
}

/// Replays a fixed sequence, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct FixedSuffixes {
    values: Vec<u8>,
    next: usize,
}

impl FixedSuffixes {
    pub fn new(values: Vec<u8>) -> Self {
        Self { values, next: 0 }
    }
}

impl SuffixSource for FixedSuffixes {
    fn next_suffix(&mut self) -> u8 {
        if self.values.is_empty() {
            return 0;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value % 100
    }
}

/// `<base>#NN`, never one of `attempted`.
pub fn reimport_receipt_id(
    base: &str,
    suffixes: &mut dyn SuffixSource,
    attempted: &HashSet<String>,
) -> String {
    for _ in 0..100 {
        let id = format!("{}#{:02}", base, suffixes.next_suffix());
        if !attempted.contains(&id) {
            return id;
        }
    }
    // The source keeps repeating itself; take the first free suffix.
    (0..100u8)
        .map(|n| format!("{}#{:02}", base, n))
        .find(|id| !attempted.contains(id))
        .unwrap_or_else(|| format!("{}#{:02}", base, 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub policy: ReconcilePolicy,
    /// Parse, match, allocate and validate, but make no ledger calls.
    pub dry_run: bool,
    /// Post exact duplicates again under a suffixed receipt id.
    pub reimport: bool,
    pub lookback_days: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            policy: ReconcilePolicy::ExactKey,
            dry_run: false,
            reimport: false,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DryRun,
    Created,
    Duplicate,
    Reused,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::DryRun => "DRY_RUN",
            Action::Created => "created",
            Action::Duplicate => "duplicate",
            Action::Reused => "reused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub entry_id: String,
    pub error: LedgerApiError,
}

/// A receipt that made it through matching, allocation and validation.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub receipt: ParsedReceipt,
    pub split_lines: Vec<SplitLine>,
    pub candidate: TransactionCandidate,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub receipt: ParsedReceipt,
    /// Receipt id the transaction was posted under; differs from the parsed
    /// id after a re-import.
    pub receipt_id: String,
    pub split_lines: Vec<SplitLine>,
    pub candidate: TransactionCandidate,
    pub action: Action,
    pub transaction_id: Option<String>,
    pub deleted_ids: Vec<String>,
    pub failed_deletes: Vec<FailedDelete>,
}

impl ProcessOutcome {
    /// Posted, but some superseded entries are still in the ledger.
    pub fn is_partial(&self) -> bool {
        !self.failed_deletes.is_empty()
    }

    pub fn message(&self) -> String {
        let mut message = match (self.action, &self.transaction_id) {
            (Action::DryRun, _) => "Dry run completed. No transaction posted.".to_string(),
            (Action::Created, Some(id)) => format!("Posted transaction {}.", id),
            (Action::Duplicate, Some(id)) => {
                format!("Duplicate transaction already exists ({}). Skipped create.", id)
            }
            (Action::Reused, Some(id)) => format!("Updated existing transaction {}.", id),
            (action, None) => format!("{} without a transaction id.", action.as_str()),
        };
        if !self.deleted_ids.is_empty() {
            message.push_str(&format!(" Deleted {}.", self.deleted_ids.join(", ")));
        }
        for failed in &self.failed_deletes {
            message.push_str(&format!(" Failed to delete {}: {}.", failed.entry_id, failed.error));
        }
        message
    }
}

#[derive(Debug)]
pub struct DocumentResult {
    pub document: String,
    pub result: Result<ProcessOutcome, ProcessError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub documents: Vec<DocumentResult>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.documents.len()
    }

    pub fn count(&self, action: Action) -> usize {
        self.outcomes().filter(|o| o.action == action).count()
    }

    pub fn failed(&self) -> usize {
        self.documents.iter().filter(|d| d.result.is_err()).count()
    }

    pub fn partial(&self) -> usize {
        self.outcomes().filter(|o| o.is_partial()).count()
    }

    pub fn has_unmapped(&self) -> bool {
        self.documents
            .iter()
            .any(|d| matches!(&d.result, Err(e) if e.is_unmapped()))
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.documents.iter().filter_map(|d| d.result.as_ref().ok())
    }

    pub fn summary(&self) -> String {
        format!(
            "Processed {} receipts. created={} duplicate_skipped={} reused={} failed={} partial={}",
            self.processed(),
            self.count(Action::Created),
            self.count(Action::Duplicate),
            self.count(Action::Reused),
            self.failed(),
            self.partial(),
        )
    }
}

pub struct Pipeline<L: Ledger> {
    ledger: L,
    matcher: RuleMatcher,
    settings: PipelineSettings,
    suffixes: Box<dyn SuffixSource>,
}

impl<L: Ledger> Pipeline<L> {
    pub fn new(ledger: L, matcher: RuleMatcher, settings: PipelineSettings) -> Self {
        Self {
            ledger,
            matcher,
            settings,
            suffixes: Box::new(RandomSuffix),
        }
    }

    pub fn with_suffix_source(mut self, suffixes: Box<dyn SuffixSource>) -> Self {
        self.suffixes = suffixes;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn account_id(&self) -> &str {
        &self.matcher.config().defaults.account_id
    }

    fn currency(&self) -> &str {
        &self.matcher.config().defaults.currency
    }

    /// Entries for the configured account since `today - lookback_days`.
    /// A dry run never calls the ledger and starts from an empty snapshot.
    pub async fn load_snapshot(&self, today: NaiveDate) -> Result<LedgerSnapshot, LedgerApiError> {
        if self.settings.dry_run {
            return Ok(LedgerSnapshot::default());
        }
        let since = today - Duration::days(self.settings.lookback_days);
        let entries = self.ledger.list_transactions(self.account_id(), since).await?;
        info!(account_id = self.account_id(), %since, entries = entries.len(), "loaded ledger snapshot");
        Ok(LedgerSnapshot::new(entries))
    }

    /// Match, allocate, assemble and validate. Nothing here touches the ledger.
    pub fn prepare(&self, receipt: ParsedReceipt) -> Result<Prepared, ProcessError> {
        let document = receipt.source_id.clone();
        let matched = self
            .matcher
            .match_subscriptions(&receipt.subscriptions)
            .map_err(|source| ProcessError::Mapping {
                document: document.clone(),
                source,
            })?;
        let split_lines = build_split_lines(&matched, receipt.tax_total).map_err(|source| {
            ProcessError::Allocation {
                document: document.clone(),
                source,
            }
        })?;
        let validation = |source| ProcessError::Validation {
            document: document.clone(),
            source,
        };
        let candidate =
            assemble_transaction(&receipt, &split_lines, self.matcher.config()).map_err(validation)?;
        validate_totals(&receipt, &split_lines, &candidate).map_err(validation)?;

        Ok(Prepared {
            receipt,
            split_lines,
            candidate,
        })
    }

    pub async fn process_document(
        &mut self,
        doc: &SourceDocument,
        snapshot: &mut LedgerSnapshot,
    ) -> Result<ProcessOutcome, ProcessError> {
        let receipt = parse_document(doc, self.currency())?;
        self.process_receipt(receipt, snapshot).await
    }

    pub async fn process_receipt(
        &mut self,
        receipt: ParsedReceipt,
        snapshot: &mut LedgerSnapshot,
    ) -> Result<ProcessOutcome, ProcessError> {
        let Prepared {
            receipt,
            split_lines,
            mut candidate,
        } = self.prepare(receipt)?;

        let mut outcome = ProcessOutcome {
            receipt_id: receipt.receipt_id.clone(),
            receipt,
            split_lines,
            candidate: candidate.clone(),
            action: Action::DryRun,
            transaction_id: None,
            deleted_ids: Vec::new(),
            failed_deletes: Vec::new(),
        };
        if self.settings.dry_run {
            return Ok(outcome);
        }

        let decision = self.decide_with_reimport(&mut outcome.receipt_id, &mut candidate, snapshot)?;
        outcome.candidate = candidate.clone();
        let receipt_id = outcome.receipt_id.clone();

        match decision {
            Decision::Skip { existing_id } => {
                info!(receipt_id = %receipt_id, existing_id = %existing_id, "duplicate, skipped create");
                outcome.action = Action::Duplicate;
                outcome.transaction_id = Some(existing_id);
            }
            Decision::Create => {
                let id = self.create(&receipt_id, &candidate, snapshot).await?;
                outcome.action = Action::Created;
                outcome.transaction_id = Some(id);
            }
            Decision::Reuse { entry_id, update } => {
                let id = self
                    .ledger
                    .update_transaction(&entry_id, &update)
                    .await
                    .map_err(|source| ProcessError::Ledger {
                        receipt_id: receipt_id.clone(),
                        source,
                    })?;
                snapshot.record_updated(&entry_id, &update);
                info!(receipt_id = %receipt_id, entry_id = %id, "reused existing entry");
                outcome.action = Action::Reused;
                outcome.transaction_id = Some(id);
            }
            Decision::CreateAndDelete { delete_ids } => {
                let id = self.create(&receipt_id, &candidate, snapshot).await?;
                outcome.action = Action::Created;
                outcome.transaction_id = Some(id);
                for entry_id in delete_ids {
                    match self.ledger.delete_transaction(&entry_id).await {
                        Ok(_) => {
                            snapshot.record_deleted(&entry_id);
                            info!(receipt_id = %receipt_id, entry_id = %entry_id, "deleted superseded entry");
                            outcome.deleted_ids.push(entry_id);
                        }
                        Err(error) => {
                            warn!(receipt_id = %receipt_id, entry_id = %entry_id, "delete failed: {error}");
                            outcome.failed_deletes.push(FailedDelete { entry_id, error });
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Decide, and while the decision is a skip under re-import, move the
    /// candidate onto a fresh `<id>#NN` and decide again.
    fn decide_with_reimport(
        &mut self,
        receipt_id: &mut String,
        candidate: &mut TransactionCandidate,
        snapshot: &LedgerSnapshot,
    ) -> Result<Decision, ProcessError> {
        let base = receipt_id.clone();
        let mut attempted = HashSet::from([base.clone()]);
        let mut attempts = 0;
        loop {
            let decision = decide(self.settings.policy, snapshot, candidate);
            if !self.settings.reimport || !matches!(decision, Decision::Skip { .. }) {
                return Ok(decision);
            }
            if attempts == MAX_REIMPORT_ATTEMPTS {
                return Err(ProcessError::ReimportExhausted {
                    receipt_id: base,
                    attempts,
                });
            }
            attempts += 1;
            let next = reimport_receipt_id(&base, self.suffixes.as_mut(), &attempted);
            info!(receipt_id = %base, reimport_id = %next, attempt = attempts, "re-importing duplicate");
            attempted.insert(next.clone());
            candidate.relabel(&next);
            *receipt_id = next;
        }
    }

    async fn create(
        &self,
        receipt_id: &str,
        candidate: &TransactionCandidate,
        snapshot: &mut LedgerSnapshot,
    ) -> Result<String, ProcessError> {
        match self.ledger.create_transaction(candidate).await {
            Ok(id) => {
                snapshot.record_created(&id, candidate);
                info!(receipt_id, transaction_id = %id, amount = candidate.amount, "created transaction");
                Ok(id)
            }
            Err(source) if source.outcome_unknown() => {
                warn!(receipt_id, "create outcome unknown, not retrying: {source}");
                Err(ProcessError::AmbiguousCreate {
                    receipt_id: receipt_id.to_string(),
                    source,
                })
            }
            Err(source) => Err(ProcessError::CreateRejected {
                receipt_id: receipt_id.to_string(),
                source,
            }),
        }
    }

    /// Process every document against one snapshot. If the snapshot cannot be
    /// loaded, every document fails without any ledger write.
    pub async fn run_batch(&mut self, docs: &[SourceDocument], today: NaiveDate) -> BatchReport {
        self.run_fetched(docs.iter().cloned().map(Ok).collect(), today).await
    }

    /// Like [`Pipeline::run_batch`], for sources that report read failures per
    /// document. Those documents fail on their own and the rest still run.
    pub async fn run_fetched(&mut self, fetched: Vec<FetchedDocument>, today: NaiveDate) -> BatchReport {
        let mut report = BatchReport::default();
        let mut snapshot = match self.load_snapshot(today).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("ledger lookup failed, no actions were taken: {err}");
                report.documents = fetched
                    .into_iter()
                    .map(|item| match item {
                        Ok(doc) => DocumentResult {
                            result: Err(ProcessError::SnapshotUnavailable {
                                document: doc.id.clone(),
                                source: err.clone(),
                            }),
                            document: doc.id,
                        },
                        Err(read) => unreadable(read),
                    })
                    .collect();
                return report;
            }
        };

        for item in fetched {
            let doc = match item {
                Ok(doc) => doc,
                Err(read) => {
                    warn!(document = %read.document(), "receipt unreadable: {read}");
                    report.documents.push(unreadable(read));
                    continue;
                }
            };
            let result = self.process_document(&doc, &mut snapshot).await;
            if let Err(err) = &result {
                warn!(document = %doc.id, "receipt failed: {err}");
            }
            report.documents.push(DocumentResult {
                document: doc.id,
                result,
            });
        }
        info!("{}", report.summary());
        report
    }
}

fn unreadable(err: ParseError) -> DocumentResult {
    DocumentResult {
        document: err.document().to_string(),
        result: Err(ProcessError::Parse(err)),
    }
}
