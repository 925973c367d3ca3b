use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, ETAG, IF_MATCH, IF_NONE_MATCH};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use docbench::codec::{DocumentId, DocumentKey, DocumentRecord};
use docbench::config::{ClusterConfig, Config, StoreBackend};
use docbench::error::BenchError;
use docbench::storage::{DocumentStore, MemoryStore, INDEX_NOT_FOUND};
use docbench::types::{
    DropOutcome, GetOutcome, IndexDefinition, IndexedQuery, ViewDefinition, ViewQuery,
    WriteOutcome,
};

struct MockState {
    store: Arc<MemoryStore>,
    statements: Mutex<Vec<String>>,
    catalog: Value,
}

/// Cluster stand-in serving the document, view, query-service, admin and
/// Consul catalog endpoints over HTTP, backed by a [`MemoryStore`].
///
/// Documents and views are served from `data_addr`; the admin, query and
/// catalog endpoints from `admin_addr`.
pub struct MockCluster {
    pub store: Arc<MemoryStore>,
    pub data_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockCluster {
    pub async fn start(bucket: &str) -> Self {
        docbench::metrics::init();
        let store = Arc::new(MemoryStore::new(bucket));
        let state = Arc::new(MockState {
            store: store.clone(),
            statements: Mutex::new(Vec::new()),
            catalog: json!([
                {"Node": "cb1", "Address": "127.0.0.1", "ServiceAddress": ""},
                {"Node": "cb2", "Address": "10.255.0.2", "ServiceAddress": "127.0.0.1"},
            ]),
        });

        let data = Router::new()
            .route("/:bucket/docs/:key", put(put_doc).get(get_doc))
            .route("/:bucket/_design/:ddoc", put(put_design_doc))
            .route("/:bucket/_design/:ddoc/_view/:view", get(query_view))
            .layer(middleware::from_fn(require_auth))
            .with_state(state.clone());
        let admin = Router::new()
            .route("/pools/default/buckets/:bucket", get(get_bucket))
            .route("/query/service", post(query_service))
            .layer(middleware::from_fn(require_auth))
            .route("/v1/catalog/service/:service", get(catalog))
            .with_state(state.clone());

        let data_addr = serve(data).await;
        let admin_addr = serve(admin).await;
        Self {
            store,
            data_addr,
            admin_addr,
            state,
        }
    }

    /// Cluster settings pointing every port at this mock.
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            backend: StoreBackend::Http,
            consul_address: self.admin_addr.to_string(),
            service: "couchbase".into(),
            nodes: vec!["127.0.0.1".into()],
            admin_port: self.admin_addr.port(),
            doc_port: self.data_addr.port(),
            view_port: self.data_addr.port(),
            query_port: self.admin_addr.port(),
            request_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    pub fn config(&self, max_docs: DocumentId, concurrency: usize) -> Config {
        let mut config = Config::default();
        config.bench.bucket = self.store.bucket().to_string();
        config.bench.max_docs = max_docs;
        config.bench.concurrency = concurrency;
        config.cluster = self.cluster_config();
        config
    }

    /// Statements received by the query service, in arrival order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Basic "))
        .unwrap_or(false);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(req).await
}

fn parse_key(key: &str) -> Option<DocumentKey> {
    key.parse::<DocumentId>().ok().and_then(|id| DocumentKey::new(id).ok())
}

fn with_etag(status: StatusCode, cas: &str) -> Response {
    (status, [(ETAG, format!("\"{cas}\""))]).into_response()
}

async fn put_doc(
    State(state): State<Arc<MockState>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(record): Json<DocumentRecord>,
) -> Response {
    if bucket != state.store.bucket() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(key) = parse_key(&key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let if_match = headers
        .get(IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string());

    if headers.get(IF_NONE_MATCH).is_some() {
        match state.store.insert(&key, &record).await {
            Ok(WriteOutcome::Stored(cas)) => with_etag(StatusCode::CREATED, cas.as_str()),
            Ok(_) => StatusCode::CONFLICT.into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    } else if let Some(cas) = if_match {
        let cas = docbench::types::Cas::new(cas);
        match state.store.replace(&key, &record, &cas).await {
            Ok(WriteOutcome::Stored(cas)) => with_etag(StatusCode::OK, cas.as_str()),
            Ok(WriteOutcome::Conflict) => StatusCode::PRECONDITION_FAILED.into_response(),
            Ok(WriteOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    } else {
        StatusCode::BAD_REQUEST.into_response()
    }
}

async fn get_doc(
    State(state): State<Arc<MockState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let Some(key) = parse_key(&key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if bucket != state.store.bucket() {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.store.get(&key).await {
        Ok(GetOutcome::Found { record, cas }) => (
            StatusCode::OK,
            [(ETAG, format!("\"{cas}\""))],
            Json(record),
        )
            .into_response(),
        Ok(GetOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn put_design_doc(
    State(state): State<Arc<MockState>>,
    Path((_bucket, ddoc)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(views) = body["views"].as_object() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    for (view, def) in views {
        let definition = ViewDefinition {
            design_doc: ddoc.clone(),
            view: view.clone(),
            map: def["map"].as_str().unwrap_or_default().to_string(),
        };
        if state.store.create_view(&definition).await.is_err() {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    (StatusCode::CREATED, Json(json!({"ok": true}))).into_response()
}

#[derive(Deserialize)]
struct ViewParams {
    key: String,
    #[serde(default)]
    stale: Option<String>,
}

async fn query_view(
    State(state): State<Arc<MockState>>,
    Path((_bucket, ddoc, view)): Path<(String, String, String)>,
    Query(params): Query<ViewParams>,
) -> Response {
    if params.stale.as_deref() != Some("false") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let Ok(key) = serde_json::from_str::<String>(&params.key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let query = ViewQuery {
        design_doc: ddoc,
        view,
        key,
    };
    match state.store.execute_view(&query).await {
        Ok(rows) => Json(json!({ "total_rows": rows.len(), "rows": rows })).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "not_found", "reason": "missing"})),
        )
            .into_response(),
    }
}

async fn get_bucket(
    State(state): State<Arc<MockState>>,
    Path(bucket): Path<String>,
) -> Response {
    if bucket == state.store.bucket() {
        Json(json!({ "name": bucket })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn catalog(State(state): State<Arc<MockState>>, Path(service): Path<String>) -> Response {
    if service == "couchbase" {
        Json(state.catalog.clone()).into_response()
    } else {
        Json(json!([])).into_response()
    }
}

#[derive(Deserialize)]
struct StatementForm {
    statement: String,
    #[serde(default)]
    args: Option<String>,
}

fn between<'a>(s: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = s.find(start)? + start.len();
    let len = s[from..].find(end)?;
    Some(&s[from..from + len])
}

fn query_error(err: BenchError) -> Response {
    let (code, msg) = match err {
        BenchError::Query { code, message, .. } => (code, message),
        other => (5000, other.to_string()),
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": "errors",
            "errors": [{"code": code, "msg": msg}],
        })),
    )
        .into_response()
}

fn query_success(results: Vec<Value>) -> Response {
    Json(json!({ "status": "success", "results": results })).into_response()
}

async fn query_service(
    State(state): State<Arc<MockState>>,
    Form(form): Form<StatementForm>,
) -> Response {
    if let Ok(mut statements) = state.statements.lock() {
        statements.push(form.statement.clone());
    }
    let statement = form.statement.as_str();
    let store = &state.store;

    if statement.starts_with("CREATE INDEX") {
        let parsed = (|| {
            Some(IndexDefinition {
                name: between(statement, "CREATE INDEX `", "`")?.to_string(),
                lower_email: between(statement, "email >= \"", "\"")?.to_string(),
                upper_email: between(statement, "email < \"", "\"")?.to_string(),
                node: between(statement, "\"nodes\": [\"", "\"")?.to_string(),
            })
        })();
        let Some(definition) = parsed else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        match store.create_index(&definition).await {
            Ok(()) => query_success(Vec::new()),
            Err(e) => query_error(e),
        }
    } else if statement.starts_with("DROP INDEX") {
        let Some(name) = between(statement, "`.`", "`") else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        match store.drop_index(name).await {
            Ok(DropOutcome::Dropped) => query_success(Vec::new()),
            Ok(DropOutcome::NotFound) => query_error(BenchError::Query {
                operation: "drop index".into(),
                code: INDEX_NOT_FOUND,
                message: format!("Index Not Found - cause: GSI index {name} not found."),
            }),
            Err(e) => query_error(e),
        }
    } else if statement.starts_with("CREATE PRIMARY INDEX") {
        match store.create_primary_index().await {
            Ok(()) => query_success(Vec::new()),
            Err(e) => query_error(e),
        }
    } else if statement.starts_with("SELECT") {
        let args: Vec<Value> = form
            .args
            .as_deref()
            .and_then(|a| serde_json::from_str(a).ok())
            .unwrap_or_default();
        let query = IndexedQuery {
            statement: form.statement.clone(),
            args,
        };
        match store.execute_indexed_query(&query).await {
            Ok(results) => query_success(results),
            Err(e) => query_error(e),
        }
    } else {
        StatusCode::BAD_REQUEST.into_response()
    }
}
