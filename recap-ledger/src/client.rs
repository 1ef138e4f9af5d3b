use async_trait::async_trait;
use chrono::NaiveDate;
use recap_core::TransactionCandidate;
use serde::Serialize;

use crate::entry::LedgerEntry;
use crate::error::LedgerApiError;

/// Fields changed when an existing entry is reused for a new receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryUpdate {
    pub date: NaiveDate,
    pub memo: String,
}

/// The four ledger operations reconciliation needs.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerApiError>;

    /// Returns the id of the created entry.
    async fn create_transaction(
        &self,
        candidate: &TransactionCandidate,
    ) -> Result<String, LedgerApiError>;

    async fn update_transaction(
        &self,
        entry_id: &str,
        update: &EntryUpdate,
    ) -> Result<String, LedgerApiError>;

    async fn delete_transaction(&self, entry_id: &str) -> Result<String, LedgerApiError>;
}
