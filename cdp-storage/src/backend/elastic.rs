// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Elasticsearch backend over HTTP

use super::response::parse_bulk_response;
use super::{BulkOperation, BulkResponse, SearchBackend};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use cdp_core::config::ElasticConfig;
use reqwest::{Client as HttpClient, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Elasticsearch-compatible cluster client
///
/// Requests rotate over the configured hosts.
pub struct ElasticBackend {
    hosts: Vec<String>,
    next_host: AtomicUsize,
    credentials: Option<(String, Option<String>)>,
    http_client: HttpClient,
}

impl ElasticBackend {
    pub fn new(config: &ElasticConfig) -> BackendResult<Self> {
        if config.hosts.is_empty() {
            return Err(BackendError::Response("no elastic hosts configured".into()));
        }
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(50)
            .build()?;

        Ok(Self {
            hosts: config
                .hosts
                .iter()
                .map(|h| h.trim_end_matches('/').to_string())
                .collect(),
            next_host: AtomicUsize::new(0),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        format!("{}/{}", self.hosts[i], path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http_client.request(method, self.url(path));
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    /// Send a JSON request and decode a JSON response
    async fn send_json(&self, method: Method, path: &str, body: Option<&Value>) -> BackendResult<Value> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body, path));
        }
        Ok(response.json().await?)
    }

    /// HEAD request; 404 means "does not exist"
    async fn exists(&self, path: &str) -> BackendResult<bool> {
        let response = self.request(Method::HEAD, path).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(BackendError::Api {
                status: s.as_u16(),
                body: String::new(),
            }),
        }
    }
}

fn api_error(status: StatusCode, body: String, path: &str) -> BackendError {
    if status == StatusCode::NOT_FOUND && body.contains("index_not_found_exception") {
        let index = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        return BackendError::IndexNotFound(index.to_string());
    }
    BackendError::Api {
        status: status.as_u16(),
        body,
    }
}

/// NDJSON body of a `_bulk` request
fn bulk_body(operations: &[BulkOperation]) -> BackendResult<String> {
    let mut body = String::new();
    for op in operations {
        let action = match &op.id {
            Some(id) => json!({"index": {"_index": op.index, "_id": id}}),
            None => json!({"index": {"_index": op.index}}),
        };
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&op.source)?);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl SearchBackend for ElasticBackend {
    async fn bulk(&self, operations: Vec<BulkOperation>) -> BackendResult<BulkResponse> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }
        let body = bulk_body(&operations)?;
        let response = self
            .request(Method::POST, "_bulk")
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body, "_bulk"));
        }
        parse_bulk_response(&response.json().await?)
    }

    async fn search(&self, index: &str, body: &Value) -> BackendResult<Value> {
        self.send_json(Method::POST, &format!("{index}/_search"), Some(body))
            .await
    }

    async fn count(&self, index: &str, query: &Value) -> BackendResult<u64> {
        let body = json!({ "query": query });
        let response = self
            .send_json(Method::POST, &format!("{index}/_count"), Some(&body))
            .await?;
        response["count"]
            .as_u64()
            .ok_or_else(|| BackendError::Response("count response has no count".into()))
    }

    async fn delete_by_query(&self, index: &str, query: &Value) -> BackendResult<u64> {
        let body = json!({ "query": query });
        let response = self
            .send_json(Method::POST, &format!("{index}/_delete_by_query"), Some(&body))
            .await?;
        Ok(response["deleted"].as_u64().unwrap_or(0))
    }

    async fn refresh(&self, index: &str) -> BackendResult<()> {
        self.send_json(Method::POST, &format!("{index}/_refresh"), None)
            .await?;
        Ok(())
    }

    async fn flush(&self, index: &str) -> BackendResult<()> {
        self.send_json(Method::POST, &format!("{index}/_flush"), None)
            .await?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> BackendResult<bool> {
        self.exists(index).await
    }

    async fn create_index(&self, index: &str, body: &Value) -> BackendResult<()> {
        self.send_json(Method::PUT, index, Some(body)).await?;
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> BackendResult<bool> {
        self.exists(&format!("_alias/{alias}")).await
    }

    async fn put_alias(&self, index: &str, alias: &str) -> BackendResult<()> {
        let body = json!({"actions": [{"add": {"index": index, "alias": alias}}]});
        self.send_json(Method::POST, "_aliases", Some(&body)).await?;
        Ok(())
    }

    async fn template_exists(&self, name: &str) -> BackendResult<bool> {
        self.exists(&format!("_index_template/{name}")).await
    }

    async fn put_template(&self, name: &str, body: &Value) -> BackendResult<()> {
        self.send_json(Method::PUT, &format!("_index_template/{name}"), Some(body))
            .await?;
        Ok(())
    }

    async fn translate_sql(&self, sql: &str) -> BackendResult<Value> {
        let body = json!({ "query": sql });
        self.send_json(Method::POST, "_sql/translate", Some(&body))
            .await
    }
}
