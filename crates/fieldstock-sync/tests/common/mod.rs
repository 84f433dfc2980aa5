//! In-process fake authority and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use fieldstock_core::{EntityPayload, InventoryItemPayload};
use fieldstock_sync::{HttpRemoteClient, RemoteConfig, StaticToken};

pub const TOKEN: &str = "field-token";

/// One request received on `/api/{endpoint}`.
#[derive(Debug, Clone)]
pub struct Push {
    pub endpoint: String,
    pub idempotency_key: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Default)]
pub struct AuthorityState {
    pub pushes: Mutex<Vec<Push>>,
    pub failing: Mutex<HashSet<String>>,
    pub snapshot: Mutex<Vec<u8>>,
    pub uploaded: Mutex<Option<Vec<u8>>>,
    pub delay: Mutex<Option<Duration>>,
    pub required_token: Mutex<Option<String>>,
}

impl AuthorityState {
    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }

    /// Entity ids pushed so far, in arrival order.
    pub fn pushed_ids(&self) -> Vec<String> {
        self.pushes().iter().filter_map(|p| entity_id(&p.endpoint, &p.body)).collect()
    }

    pub fn fail(&self, entity_id: &str) {
        self.failing.lock().unwrap().insert(entity_id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

pub struct FakeAuthority {
    pub state: Arc<AuthorityState>,
    pub base_url: String,
}

impl FakeAuthority {
    pub async fn start() -> Self {
        let state = Arc::new(AuthorityState::default());

        let app = Router::new()
            .route("/", get(|| async { "fieldstock authority" }))
            .route("/api/{endpoint}", post(push_record))
            .route("/central/download", get(download))
            .route("/central/upload", post(upload))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FakeAuthority {
            state,
            base_url: format!("http://{}", addr),
        }
    }

    pub fn client(&self) -> HttpRemoteClient {
        self.client_with(RemoteConfig::new(&self.base_url).unwrap())
    }

    pub fn client_with(&self, config: RemoteConfig) -> HttpRemoteClient {
        HttpRemoteClient::new(config, Some(Arc::new(StaticToken::new(TOKEN)))).unwrap()
    }
}

/// Base URL of a port nobody listens on.
pub async fn dead_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn item(id: &str, quantity: i64) -> EntityPayload {
    EntityPayload::InventoryItem(InventoryItemPayload {
        item_id: id.into(),
        sku: format!("SKU-{}", id.to_uppercase()),
        name: format!("Item {}", id),
        quantity,
        unit: Some("pcs".into()),
        location: Some("AISLE-2".into()),
        barcode: None,
    })
}

fn entity_id(endpoint: &str, body: &Value) -> Option<String> {
    let field = match endpoint {
        "inventory" => "item_id",
        "transactions" => "transaction_id",
        "transfers" => "transfer_id",
        _ => return None,
    };
    body.get(field).and_then(Value::as_str).map(str::to_string)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn authorized(state: &AuthorityState, headers: &HeaderMap) -> bool {
    match state.required_token.lock().unwrap().as_ref() {
        Some(token) => header(headers, "authorization") == Some(format!("Bearer {}", token)),
        None => true,
    }
}

async fn push_record(
    State(state): State<Arc<AuthorityState>>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid token" })));
    }

    let failing = entity_id(&endpoint, &body)
        .map(|id| state.failing.lock().unwrap().contains(&id))
        .unwrap_or(false);
    if failing {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "database is locked" })),
        );
    }

    state.pushes.lock().unwrap().push(Push {
        endpoint,
        idempotency_key: header(&headers, "idempotency-key"),
        authorization: header(&headers, "authorization"),
        body,
    });

    (StatusCode::CREATED, Json(json!({ "ok": true })))
}

async fn download(State(state): State<Arc<AuthorityState>>) -> (StatusCode, Vec<u8>) {
    let snapshot = state.snapshot.lock().unwrap().clone();
    (StatusCode::OK, snapshot)
}

async fn upload(
    State(state): State<Arc<AuthorityState>>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().map(str::to_string);
        if name.as_deref() != Some("file") {
            continue;
        }
        match field.bytes().await {
            Ok(bytes) => {
                *state.uploaded.lock().unwrap() = Some(bytes.to_vec());
                return (StatusCode::OK, Json(json!({ "ok": true })));
            }
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": e.to_string() })),
                )
            }
        }
    }

    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "missing file part" })),
    )
}
