//! Azure DevOps REST backend
//!
//! Work items, relations, WIQL queries and team iterations are read through
//! the public REST API using a personal access token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::traits::{GatewayError, ProjectInfo, SourceFactory, WorkItemSource};
use crate::models::{Iteration, LinkedRef, TimeFrame, WorkItem};
use crate::registry::Connection;

/// Default REST API version sent with every request
pub const DEFAULT_API_VERSION: &str = "7.0";

/// Longest error body kept in a [`GatewayError::Status`] message
const MAX_ERROR_BODY: usize = 300;

/// Retry behaviour for transient failures (transport errors, 5xx and 429)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
        }
    }
}

/// Settings for one Azure DevOps project
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Organization URL, e.g. `https://dev.azure.com/contoso`
    pub org_url: String,
    pub project: String,
    /// Personal access token
    pub token: SecretString,
    pub api_version: String,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(org_url: &str, project: &str, token: SecretString) -> Self {
        Self {
            org_url: org_url.to_string(),
            project: project.to_string(),
            token,
            api_version: DEFAULT_API_VERSION.to_string(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Builds the settings for a stored connection
    pub fn from_connection(connection: &Connection) -> Self {
        Self::new(
            &connection.org_url,
            &connection.project,
            connection.token.clone(),
        )
    }
}

/// [`WorkItemSource`] backed by the Azure DevOps REST API
pub struct AzureDevOpsGateway {
    org: Url,
    project: String,
    token: SecretString,
    api_version: String,
    retry: RetryPolicy,
    client: Client,
}

impl AzureDevOpsGateway {
    /// Creates a gateway, validating the organization URL
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let org = Url::parse(config.org_url.trim().trim_end_matches('/'))
            .map_err(|e| GatewayError::InvalidConfig(format!("organization url: {}", e)))?;
        if org.cannot_be_a_base() || !matches!(org.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidConfig(format!(
                "organization url must be http(s): {}",
                config.org_url
            )));
        }
        if config.project.trim().is_empty() {
            return Err(GatewayError::InvalidConfig("project name is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self {
            org,
            project: config.project.trim().to_string(),
            token: config.token,
            api_version: config.api_version,
            retry: config.retry,
            client,
        })
    }

    /// Builds `{org}[/{project}]/_apis/{segments}?api-version=...`
    fn api_url(&self, project_scoped: bool, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.org.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                GatewayError::InvalidConfig("organization url cannot have a path".to_string())
            })?;
            path.pop_if_empty();
            if project_scoped {
                path.push(&self.project);
            }
            path.push("_apis");
            path.extend(segments);
        }
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// Sends a request, retrying transient failures
    ///
    /// 404 yields `Ok(None)`. 401, 403 and 203 (the sign-in page served for a
    /// bad token) yield [`GatewayError::Unauthorized`] without retrying; see
    /// [`GatewayError::is_unauthorized`] for which of them fail a whole batch.
    #[instrument(name = "azure_send_with_retry", skip(self, url, build), fields(url = %url))]
    async fn send_with_retry<F>(&self, url: &Url, build: F) -> Result<Option<Response>, GatewayError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = build(&self.client).basic_auth("", Some(self.token.expose_secret()));
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if matches!(
                        status,
                        StatusCode::UNAUTHORIZED
                            | StatusCode::FORBIDDEN
                            | StatusCode::NON_AUTHORITATIVE_INFORMATION
                    ) {
                        return Err(GatewayError::Unauthorized(status.as_u16()));
                    }
                    if status.is_success() {
                        return Ok(Some(resp));
                    }

                    let transient =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if !transient || attempt >= max_attempts {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(GatewayError::Status {
                            status: status.as_u16(),
                            message: truncate(&body, MAX_ERROR_BODY),
                        });
                    }
                    warn!(attempt, status = status.as_u16(), "transient backend status, retrying");
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        return Err(GatewayError::Transport(e.to_string()));
                    }
                    warn!(attempt, error = %e, "backend request failed, retrying");
                }
            }
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, GatewayError> {
        match self.send_with_retry(&url, |c| c.get(url.clone())).await? {
            Some(resp) => decode(resp).await.map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_raw(&self, id: u64, expand: bool) -> Result<Option<RawWorkItem>, GatewayError> {
        let mut url = self.api_url(true, &["wit", "workitems", &id.to_string()])?;
        if expand {
            url.query_pairs_mut().append_pair("$expand", "relations");
        }
        self.get_json(url).await
    }
}

#[async_trait]
impl WorkItemSource for AzureDevOpsGateway {
    fn backend_tag(&self) -> &'static str {
        "azure-devops"
    }

    #[instrument(skip(self), fields(project = %self.project))]
    async fn test_connection(&self) -> Result<ProjectInfo, GatewayError> {
        let url = self.api_url(false, &["projects", &self.project])?;
        self.get_json::<ProjectInfo>(url).await?.ok_or_else(|| GatewayError::Status {
            status: 404,
            message: format!("project '{}' not found", self.project),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_item(&self, id: u64) -> Result<Option<WorkItem>, GatewayError> {
        Ok(self.fetch_raw(id, false).await?.map(|raw| raw.into_parts().0))
    }

    #[instrument(skip(self))]
    async fn fetch_item_with_links(
        &self,
        id: u64,
    ) -> Result<Option<(WorkItem, Vec<LinkedRef>)>, GatewayError> {
        Ok(self.fetch_raw(id, true).await?.map(RawWorkItem::into_parts))
    }

    #[instrument(skip(self, query))]
    async fn query_by_filter(&self, query: &str) -> Result<Vec<u64>, GatewayError> {
        let url = self.api_url(true, &["wit", "wiql"])?;
        let body = json!({ "query": query });
        let resp = self
            .send_with_retry(&url, |c| c.post(url.clone()).json(&body))
            .await?
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                message: format!("project '{}' not found", self.project),
            })?;
        let result: WiqlResponse = decode(resp).await?;
        let ids: Vec<u64> = result.work_items.into_iter().map(|r| r.id).collect();
        debug!(count = ids.len(), "query returned work items");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn list_iterations(&self) -> Result<Vec<Iteration>, GatewayError> {
        let url = self.api_url(true, &["work", "teamsettings", "iterations"])?;
        let list: ListResponse<RawIteration> =
            self.get_json(url).await?.ok_or_else(|| GatewayError::Status {
                status: 404,
                message: format!("no team iterations for project '{}'", self.project),
            })?;
        Ok(list.value.into_iter().map(RawIteration::into_iteration).collect())
    }
}

/// Connects stored connections to Azure DevOps
#[derive(Debug, Clone, Default)]
pub struct AzureSourceFactory {
    pub retry: RetryPolicy,
}

impl SourceFactory for AzureSourceFactory {
    fn connect(&self, connection: &Connection) -> Result<Arc<dyn WorkItemSource>, GatewayError> {
        let mut config = GatewayConfig::from_connection(connection);
        config.retry = self.retry.clone();
        Ok(Arc::new(AzureDevOpsGateway::new(config)?))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, GatewayError> {
    resp.json::<T>()
        .await
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RawWorkItem {
    id: u64,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    relations: Option<Vec<RawRelation>>,
}

impl RawWorkItem {
    fn into_parts(self) -> (WorkItem, Vec<LinkedRef>) {
        let links = self
            .relations
            .unwrap_or_default()
            .into_iter()
            .map(|r| LinkedRef {
                kind: r.rel,
                label: r.attributes.name,
                url: r.url,
            })
            .collect();
        (
            WorkItem {
                id: self.id,
                fields: self.fields,
            },
            links,
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    rel: String,
    url: String,
    #[serde(default)]
    attributes: RawRelationAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct RawRelationAttributes {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WiqlResponse {
    #[serde(default, rename = "workItems")]
    work_items: Vec<WiqlRef>,
}

#[derive(Debug, Deserialize)]
struct WiqlRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawIteration {
    id: String,
    name: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    attributes: RawIterationAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIterationAttributes {
    #[serde(default)]
    start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    finish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    time_frame: TimeFrame,
}

impl RawIteration {
    fn into_iteration(self) -> Iteration {
        Iteration {
            id: self.id,
            name: self.name,
            path: self.path,
            start_date: self.attributes.start_date,
            finish_date: self.attributes.finish_date,
            time_frame: self.attributes.time_frame,
        }
    }
}
