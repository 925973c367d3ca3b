use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    create_index_statement, create_primary_index_statement, drop_index_statement,
    is_index_exists, is_index_not_found, DocumentStore,
};
use crate::codec::{DocumentKey, DocumentRecord};
use crate::config::ClusterConfig;
use crate::error::{BenchError, Result};
use crate::types::{
    Cas, DropOutcome, GetOutcome, IndexDefinition, IndexedQuery, NodeAddress, ViewDefinition,
    ViewQuery, ViewRow, WriteOutcome,
};

#[derive(Debug, Deserialize)]
struct ViewResponse {
    #[serde(default)]
    rows: Vec<ViewRow>,
}

#[derive(Debug, Deserialize)]
struct QueryServiceError {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct QueryServiceResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    errors: Vec<QueryServiceError>,
}

/// Session to the cluster over its REST ports.
///
/// Opened once per run from the discovered node list. Requests rotate over
/// the nodes; every request carries basic auth and the configured timeout.
#[derive(Clone)]
pub struct ClusterHandle {
    client: Client,
    nodes: Arc<Vec<NodeAddress>>,
    next: Arc<AtomicUsize>,
    bucket: String,
    scheme: String,
    admin_port: u16,
    doc_port: u16,
    view_port: u16,
    query_port: u16,
    username: String,
    password: String,
    timeout_ms: u64,
}

impl ClusterHandle {
    /// Build the handle and check the keyspace exists on the first node.
    pub async fn open(nodes: Vec<NodeAddress>, bucket: &str, config: &ClusterConfig) -> Result<Self> {
        if nodes.is_empty() {
            return Err(BenchError::NoNodes {
                service: config.service.clone(),
            });
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(64)
            .build()
            .map_err(|e| BenchError::Connect(format!("failed to build http client: {e}")))?;

        let handle = Self {
            client,
            nodes: Arc::new(nodes),
            next: Arc::new(AtomicUsize::new(0)),
            bucket: bucket.to_string(),
            scheme: config.scheme.clone(),
            admin_port: config.admin_port,
            doc_port: config.doc_port,
            view_port: config.view_port,
            query_port: config.query_port,
            username: config.username.clone(),
            password: config.password.clone(),
            timeout_ms: config.request_timeout_ms,
        };
        handle.check_bucket().await?;
        Ok(handle)
    }

    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }

    async fn check_bucket(&self) -> Result<()> {
        let node = &self.nodes[0];
        let url = format!(
            "{}://{}:{}/pools/default/buckets/{}",
            self.scheme, node, self.admin_port, self.bucket
        );
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BenchError::Connect(format!("{node}: {e}")))?;
        match resp.status() {
            s if s.is_success() => {
                debug!(node = %node, bucket = %self.bucket, "bucket opened");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BenchError::Connect(format!(
                "bucket {} not found on {node}",
                self.bucket
            ))),
            s => Err(BenchError::Connect(format!(
                "bucket check on {node} returned {s}"
            ))),
        }
    }

    fn node_base(&self, port: u16) -> String {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        format!("{}://{}:{}", self.scheme, self.nodes[i], port)
    }

    fn doc_url(&self, key: &DocumentKey) -> String {
        format!("{}/{}/docs/{}", self.node_base(self.doc_port), self.bucket, key)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        self.authed(builder).send().await.map_err(|e| {
            crate::metrics::STORE_ERRORS_TOTAL
                .with_label_values(&[operation])
                .inc();
            if e.is_timeout() {
                BenchError::Timeout {
                    operation: operation.to_string(),
                    millis: self.timeout_ms,
                }
            } else {
                BenchError::Http(e)
            }
        })
    }

    async fn status_error(operation: &str, resp: Response) -> BenchError {
        crate::metrics::STORE_ERRORS_TOTAL
            .with_label_values(&[operation])
            .inc();
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        BenchError::Status {
            operation: operation.to_string(),
            status,
            body,
        }
    }

    fn cas_from(resp: &Response) -> Cas {
        let token = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        Cas::new(token)
    }

    async fn write(
        &self,
        operation: &str,
        builder: RequestBuilder,
        record: &DocumentRecord,
    ) -> Result<WriteOutcome> {
        let resp = self.send(operation, builder.json(record)).await?;
        match resp.status() {
            s if s.is_success() => Ok(WriteOutcome::Stored(Self::cas_from(&resp))),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Ok(WriteOutcome::Conflict),
            StatusCode::NOT_FOUND => Ok(WriteOutcome::NotFound),
            _ => Err(Self::status_error(operation, resp).await),
        }
    }

    /// Run one statement on the query service.
    async fn query_service(
        &self,
        operation: &str,
        statement: &str,
        args: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/query/service", self.node_base(self.query_port));
        let mut form = vec![("statement", statement.to_string())];
        if !args.is_empty() {
            form.push(("args", serde_json::to_string(args)?));
        }
        let resp = self.send(operation, self.client.post(&url).form(&form)).await?;
        let status = resp.status();
        let body = resp.text().await.map_err(BenchError::Http)?;
        let parsed: QueryServiceResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) => {
                crate::metrics::STORE_ERRORS_TOTAL
                    .with_label_values(&[operation])
                    .inc();
                return Err(BenchError::Status {
                    operation: operation.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }
        };
        if let Some(err) = parsed.errors.into_iter().next() {
            crate::metrics::STORE_ERRORS_TOTAL
                .with_label_values(&[operation])
                .inc();
            return Err(BenchError::Query {
                operation: operation.to_string(),
                code: err.code,
                message: err.msg,
            });
        }
        if !status.is_success() || (!parsed.status.is_empty() && parsed.status != "success") {
            crate::metrics::STORE_ERRORS_TOTAL
                .with_label_values(&[operation])
                .inc();
            return Err(BenchError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: parsed.status,
            });
        }
        Ok(parsed.results)
    }
}

#[async_trait]
impl DocumentStore for ClusterHandle {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, key, record), fields(key = %key))]
    async fn insert(&self, key: &DocumentKey, record: &DocumentRecord) -> Result<WriteOutcome> {
        let builder = self.client.put(self.doc_url(key)).header(IF_NONE_MATCH, "*");
        self.write("insert", builder, record).await
    }

    #[instrument(skip(self, key, record, cas), fields(key = %key, cas = %cas))]
    async fn replace(
        &self,
        key: &DocumentKey,
        record: &DocumentRecord,
        cas: &Cas,
    ) -> Result<WriteOutcome> {
        let builder = self
            .client
            .put(self.doc_url(key))
            .header(IF_MATCH, format!("\"{cas}\""));
        self.write("replace", builder, record).await
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn get(&self, key: &DocumentKey) -> Result<GetOutcome> {
        let resp = self.send("get", self.client.get(self.doc_url(key))).await?;
        match resp.status() {
            s if s.is_success() => {
                let cas = Self::cas_from(&resp);
                let record = resp.json::<DocumentRecord>().await?;
                Ok(GetOutcome::Found { record, cas })
            }
            StatusCode::NOT_FOUND => Ok(GetOutcome::NotFound),
            _ => Err(Self::status_error("get", resp).await),
        }
    }

    #[instrument(skip(self, query), fields(view = %query.view, key = %query.key))]
    async fn execute_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>> {
        let url = format!(
            "{}/{}/_design/{}/_view/{}",
            self.node_base(self.view_port),
            self.bucket,
            query.design_doc,
            query.view
        );
        let key = serde_json::to_string(&query.key)?;
        let builder = self
            .client
            .get(&url)
            .query(&[("key", key.as_str()), ("stale", "false")]);
        let resp = self.send("view query", builder).await?;
        if !resp.status().is_success() {
            return Err(Self::status_error("view query", resp).await);
        }
        let body = resp.json::<ViewResponse>().await?;
        Ok(body.rows)
    }

    #[instrument(skip(self, query))]
    async fn execute_indexed_query(&self, query: &IndexedQuery) -> Result<Vec<serde_json::Value>> {
        self.query_service("indexed query", &query.statement, &query.args)
            .await
    }

    #[instrument(skip(self, definition), fields(design_doc = %definition.design_doc))]
    async fn create_view(&self, definition: &ViewDefinition) -> Result<()> {
        let url = format!(
            "{}/{}/_design/{}",
            self.node_base(self.view_port),
            self.bucket,
            definition.design_doc
        );
        let resp = self
            .send(
                "create view",
                self.client.put(&url).json(&definition.to_design_doc()),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(Self::status_error("create view", resp).await);
        }
        let body = resp.text().await.unwrap_or_default();
        debug!(response = %body, "design document stored");
        Ok(())
    }

    #[instrument(skip(self, definition), fields(index = %definition.name, node = %definition.node))]
    async fn create_index(&self, definition: &IndexDefinition) -> Result<()> {
        let statement = create_index_statement(&self.bucket, definition);
        self.query_service("create index", &statement, &[]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_index(&self, name: &str) -> Result<DropOutcome> {
        let statement = drop_index_statement(&self.bucket, name);
        match self.query_service("drop index", &statement, &[]).await {
            Ok(_) => Ok(DropOutcome::Dropped),
            Err(e) if is_index_not_found(&e) => Ok(DropOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn create_primary_index(&self) -> Result<()> {
        let statement = create_primary_index_statement(&self.bucket);
        match self.query_service("create primary index", &statement, &[]).await {
            Ok(_) => Ok(()),
            Err(e) if is_index_exists(&e) => {
                debug!("primary index already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
