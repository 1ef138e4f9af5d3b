//! HTTP client for the YNAB REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use recap_core::TransactionCandidate;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::{EntryUpdate, Ledger};
use crate::entry::{LedgerEntry, RawEntry, normalize_entries};
use crate::error::LedgerApiError;
use crate::retry::{RetryPolicy, with_retry};

pub const DEFAULT_API_URL: &str = "https://api.ynab.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection details for one budget.
#[derive(Debug, Clone)]
pub struct YnabSettings {
    pub api_url: String,
    pub api_token: String,
    pub budget_id: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl YnabSettings {
    pub fn new(api_token: impl Into<String>, budget_id: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: api_token.into(),
            budget_id: budget_id.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct YnabClient {
    http_client: Client,
    base_url: String,
    api_token: String,
    budget_id: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct TransactionsData {
    transactions: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct SaveData {
    #[serde(default)]
    transaction: Option<IdOnly>,
    #[serde(default)]
    transaction_ids: Vec<String>,
}

impl SaveData {
    fn into_id(self, operation: &str) -> Result<String, LedgerApiError> {
        self.transaction
            .map(|t| t.id)
            .or_else(|| self.transaction_ids.into_iter().next())
            .ok_or_else(|| LedgerApiError::MissingTransactionId {
                operation: operation.to_string(),
            })
    }
}

fn send_error(operation: &str, err: reqwest::Error) -> LedgerApiError {
    if err.is_decode() {
        return LedgerApiError::Decode {
            operation: operation.to_string(),
            message: err.to_string(),
        };
    }
    LedgerApiError::Connectivity {
        operation: operation.to_string(),
        message: err.to_string(),
        timeout: err.is_timeout(),
    }
}

impl YnabClient {
    pub fn new(settings: YnabSettings) -> Result<Self, LedgerApiError> {
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| send_error("build_client", e))?;
        Ok(Self {
            http_client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token,
            budget_id: settings.budget_id,
            retry: settings.retry,
        })
    }

    pub fn budget_id(&self) -> &str {
        &self.budget_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/budgets/{}{}", self.base_url, self.budget_id, path)
    }

    /// Send one request and decode the `{"data": ...}` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, LedgerApiError> {
        let resp = request
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .send()
            .await
            .map_err(|e| send_error(operation, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LedgerApiError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = resp.json().await.map_err(|e| LedgerApiError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl Ledger for YnabClient {
    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerApiError> {
        let operation = "list_transactions";
        let url = self.url(&format!("/accounts/{account_id}/transactions"));
        let since_date = since.format("%Y-%m-%d").to_string();
        let data: TransactionsData = with_retry(self.retry, operation, true, || {
            let request = self
                .http_client
                .get(&url)
                .query(&[("since_date", since_date.as_str())]);
            self.send(operation, request)
        })
        .await?;

        let total = data.transactions.len();
        let entries = normalize_entries(data.transactions);
        debug!(account_id, %since, total, usable = entries.len(), "listed ledger entries");
        Ok(entries)
    }

    async fn create_transaction(
        &self,
        candidate: &TransactionCandidate,
    ) -> Result<String, LedgerApiError> {
        let operation = "create_transaction";
        let url = self.url("/transactions");
        let body = serde_json::json!({ "transaction": candidate });
        let data: SaveData = with_retry(self.retry, operation, false, || {
            self.send(operation, self.http_client.post(&url).json(&body))
        })
        .await?;
        let id = data.into_id(operation)?;
        info!(transaction_id = %id, amount = candidate.amount, "created ledger transaction");
        Ok(id)
    }

    async fn update_transaction(
        &self,
        entry_id: &str,
        update: &EntryUpdate,
    ) -> Result<String, LedgerApiError> {
        let operation = "update_transaction";
        let url = self.url(&format!("/transactions/{entry_id}"));
        let body = serde_json::json!({ "transaction": update });
        let data: SaveData = with_retry(self.retry, operation, true, || {
            self.send(operation, self.http_client.put(&url).json(&body))
        })
        .await?;
        data.into_id(operation)
    }

    async fn delete_transaction(&self, entry_id: &str) -> Result<String, LedgerApiError> {
        let operation = "delete_transaction";
        let url = self.url(&format!("/transactions/{entry_id}"));
        let data: SaveData = with_retry(self.retry, operation, true, || {
            self.send(operation, self.http_client.delete(&url))
        })
        .await?;
        data.into_id(operation)
    }
}
