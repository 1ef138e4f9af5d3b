use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::NaiveDate;
use recap_core::{CLEARED, TransactionCandidate};
use recap_ledger::{
    ClearedState, EntryUpdate, Ledger, LedgerApiError, RetryPolicy, YnabClient, YnabSettings,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;

#[derive(Default)]
struct MockState {
    /// Statuses returned (and consumed) before any real handling.
    failures: VecDeque<u16>,
    requests: Vec<String>,
    auth: Vec<String>,
    bodies: Vec<Value>,
    queries: Vec<HashMap<String, String>>,
}

type Shared = Arc<Mutex<MockState>>;

/// Local stand-in for the ledger REST API.
struct MockLedgerServer {
    addr: SocketAddr,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockLedgerServer {
    async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/v1/budgets/:budget/accounts/:account/transactions", get(list))
            .route("/v1/budgets/:budget/transactions", post(create))
            .route("/v1/budgets/:budget/transactions/:id", put(update).delete(delete))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn client(&self) -> YnabClient {
        let mut settings = YnabSettings::new("secret-token", "budget-1");
        settings.api_url = format!("http://{}/v1/", self.addr);
        settings.timeout = Duration::from_secs(5);
        settings.retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        YnabClient::new(settings).unwrap()
    }

    fn fail_next(&self, statuses: &[u16]) {
        self.state.lock().unwrap().failures.extend(statuses);
    }

    fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl Drop for MockLedgerServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn record(state: &Shared, label: String, headers: &HeaderMap) -> Option<Response> {
    let mut state = state.lock().unwrap();
    state.requests.push(label);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.auth.push(auth.to_string());
    }
    let status = state.failures.pop_front()?;
    let status = StatusCode::from_u16(status).unwrap();
    Some((status, Json(json!({"error": {"id": status.as_u16().to_string()}}))).into_response())
}

async fn list(
    State(state): State<Shared>,
    Path((_budget, account)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = record(&state, format!("GET {account}"), &headers) {
        return failure;
    }
    state.lock().unwrap().queries.push(query);
    Json(json!({
        "data": {
            "transactions": [
                {
                    "id": "tx-1",
                    "account_id": account,
                    "date": "2026-02-12",
                    "amount": -21550,
                    "memo": "Receipt: MKT-SIMPLE1",
                    "payee_name": "Apple",
                    "category_id": "cat-1",
                    "cleared": "cleared",
                    "approved": true,
                    "deleted": false
                },
                {
                    "id": "tx-2",
                    "account_id": account,
                    "var_date": "2026-02-14",
                    "amount": -3230,
                    "cleared": "uncleared"
                },
                {"id": "broken"}
            ],
            "server_knowledge": 12
        }
    }))
    .into_response()
}

async fn create(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(failure) = record(&state, "POST".to_string(), &headers) {
        return failure;
    }
    state.lock().unwrap().bodies.push(body);
    (
        StatusCode::CREATED,
        Json(json!({"data": {"transaction_ids": ["new-1"], "transaction": {"id": "new-1"}}})),
    )
        .into_response()
}

async fn update(
    State(state): State<Shared>,
    Path((_budget, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = record(&state, format!("PUT {id}"), &headers) {
        return failure;
    }
    state.lock().unwrap().bodies.push(body);
    Json(json!({"data": {"transaction": {"id": id}}})).into_response()
}

async fn delete(
    State(state): State<Shared>,
    Path((_budget, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = record(&state, format!("DELETE {id}"), &headers) {
        return failure;
    }
    Json(json!({"data": {"transaction": {"id": id, "deleted": true}}})).into_response()
}

fn candidate() -> TransactionCandidate {
    TransactionCandidate {
        account_id: "acct-1".to_string(),
        date: NaiveDate::from_ymd_opt(2026, 2, 12).unwrap(),
        cleared: CLEARED.to_string(),
        approved: false,
        amount: -21550,
        payee_id: None,
        payee_name: Some("Apple One".to_string()),
        category_id: Some("cat-1".to_string()),
        memo: Some("Receipt: MKT-SIMPLE1".to_string()),
        flag_color: None,
        subtransactions: vec![],
    }
}

#[tokio::test]
async fn test_list_normalizes_both_entry_shapes() {
    let server = MockLedgerServer::start().await;
    let client = server.client();

    let entries = client
        .list_transactions("acct-1", NaiveDate::from_ymd_opt(2026, 2, 13).unwrap())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, "tx-1");
    assert_eq!(entries[0].cleared, ClearedState::Cleared);
    assert_eq!(entries[1].date, NaiveDate::from_ymd_opt(2026, 2, 14).unwrap());

    let state = server.state.lock().unwrap();
    assert_eq!(state.queries[0].get("since_date").map(String::as_str), Some("2026-02-13"));
    assert_eq!(state.auth[0], "Bearer secret-token");
}

#[tokio::test]
async fn test_list_retries_transient_failures() {
    let server = MockLedgerServer::start().await;
    server.fail_next(&[503, 429]);

    let entries = server
        .client()
        .list_transactions("acct-1", NaiveDate::from_ymd_opt(2026, 2, 13).unwrap())
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_list_gives_up_after_two_retries() {
    let server = MockLedgerServer::start().await;
    server.fail_next(&[500, 502, 504]);

    let err = server
        .client()
        .list_transactions("acct-1", NaiveDate::from_ymd_opt(2026, 2, 13).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(504));
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_permanent_status_is_not_retried() {
    let server = MockLedgerServer::start().await;
    server.fail_next(&[401]);

    let err = server
        .client()
        .list_transactions("acct-1", NaiveDate::from_ymd_opt(2026, 2, 13).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerApiError::Status { status: 401, .. }));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_create_posts_wire_shape() {
    let server = MockLedgerServer::start().await;
    let id = server.client().create_transaction(&candidate()).await.unwrap();
    assert_eq!(id, "new-1");

    let state = server.state.lock().unwrap();
    let sent = &state.bodies[0]["transaction"];
    assert_eq!(sent["date"], "2026-02-12");
    assert_eq!(sent["amount"], -21550);
    assert_eq!(sent["cleared"], "cleared");
    assert_eq!(sent["approved"], false);
    assert!(sent.get("subtransactions").is_none());
    assert!(sent.get("flag_color").is_none());
}

#[tokio::test]
async fn test_create_does_not_retry_server_errors() {
    let server = MockLedgerServer::start().await;
    server.fail_next(&[502]);

    let err = server.client().create_transaction(&candidate()).await.unwrap_err();
    assert!(err.outcome_unknown());
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_create_retries_rate_limit() {
    let server = MockLedgerServer::start().await;
    server.fail_next(&[429]);

    let id = server.client().create_transaction(&candidate()).await.unwrap();
    assert_eq!(id, "new-1");
    assert_eq!(server.requests(), vec!["POST".to_string(), "POST".to_string()]);
}

#[tokio::test]
async fn test_update_and_delete() {
    let server = MockLedgerServer::start().await;
    let client = server.client();
    let update = EntryUpdate {
        date: NaiveDate::from_ymd_opt(2026, 2, 12).unwrap(),
        memo: "Receipt: R-1".to_string(),
    };

    assert_eq!(client.update_transaction("tx-9", &update).await.unwrap(), "tx-9");
    assert_eq!(client.delete_transaction("tx-9").await.unwrap(), "tx-9");
    assert_eq!(server.requests(), vec!["PUT tx-9".to_string(), "DELETE tx-9".to_string()]);

    let state = server.state.lock().unwrap();
    assert_eq!(state.bodies[0], json!({"transaction": {"date": "2026-02-12", "memo": "Receipt: R-1"}}));
}

#[tokio::test]
async fn test_unreachable_server_is_connectivity_error() {
    let mut settings = YnabSettings::new("t", "b");
    settings.api_url = "http://127.0.0.1:1/v1".to_string();
    settings.retry = RetryPolicy::none();
    let err = YnabClient::new(settings)
        .unwrap()
        .delete_transaction("tx-1")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerApiError::Connectivity { .. }));
}
