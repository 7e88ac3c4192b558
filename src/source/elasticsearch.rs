//! Elasticsearch source built on the scroll API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::extract::{Page, PageHints, QuerySpec, Record, Source, SourceError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Keep-alive sent when the extraction leaves it to the backend. Without a
/// `scroll` parameter Elasticsearch answers a plain search with no scroll id.
pub const DEFAULT_KEEP_ALIVE: &str = "1m";

/// Connection settings for [`ElasticsearchSource`].
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL such as `https://search.internal:9200`.
    pub url: String,
    pub timeout: Duration,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct ElasticsearchSource {
    client: Client,
    base_url: String,
}

impl ElasticsearchSource {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, SourceError> {
        let base_url = config.url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SourceError::Connection(
                "elasticsearch url is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::Connection(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, SourceError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Protocol(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl Source for ElasticsearchSource {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn check_exists(&self, collection: &str) -> Result<bool, SourceError> {
        let url = format!("{}/{}", self.base_url, collection);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(classify_transport)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(classify_status(status, "")),
        }
    }

    async fn search(
        &self,
        collection: &str,
        query: &QuerySpec,
        hints: &PageHints,
    ) -> Result<Page, SourceError> {
        let url = format!("{}/{}/_search", self.base_url, collection);
        let mut params: Vec<(&str, String)> = vec![("scroll", keep_alive(hints).to_string())];
        if let Some(size) = hints.page_size {
            params.push(("size", size.to_string()));
        }

        let body = render_body(query);
        debug!(%url, %body, "opening scroll");
        let response = self
            .send(self.client.post(&url).query(&params).json(&body))
            .await?;
        parse_page(response)
    }

    async fn continue_page(&self, token: &str, hints: &PageHints) -> Result<Page, SourceError> {
        let url = format!("{}/_search/scroll", self.base_url);
        let body = json!({ "scroll_id": token, "scroll": keep_alive(hints) });
        let response = self.send(self.client.post(&url).json(&body)).await?;
        parse_page(response)
    }

    async fn release(&self, token: &str) -> Result<(), SourceError> {
        let url = format!("{}/_search/scroll", self.base_url);
        let body = json!({ "scroll_id": [token] });
        self.send(self.client.delete(&url).json(&body)).await?;
        Ok(())
    }
}

fn keep_alive(hints: &PageHints) -> &str {
    hints.keep_alive.as_deref().unwrap_or(DEFAULT_KEEP_ALIVE)
}

/// Renders the search body for a query.
pub fn render_body(query: &QuerySpec) -> Value {
    let mut clauses = Vec::new();

    if let Some(range) = &query.range {
        let mut bounds = serde_json::Map::new();
        if let Some(gte) = range.gte {
            bounds.insert("gte".to_string(), json!(gte.format(TIMESTAMP_FORMAT).to_string()));
        }
        if let Some(lt) = range.lt {
            bounds.insert("lt".to_string(), json!(lt.format(TIMESTAMP_FORMAT).to_string()));
        }
        clauses.push(json!({ "range": { range.field.as_str(): bounds } }));
    }

    if let Some(filter) = &query.filter {
        for (field, value) in &filter.terms {
            clauses.push(json!({ "term": { field.as_str(): value } }));
        }
    }

    let mut body = if clauses.is_empty() {
        json!({ "query": { "match_all": {} } })
    } else {
        json!({ "query": { "bool": { "filter": clauses } } })
    };

    if let Some(projection) = &query.projection {
        body["_source"] = json!(projection.fields);
    }
    body
}

/// Turns a search or scroll response into a page of hits.
pub fn parse_page(response: Value) -> Result<Page, SourceError> {
    let token = response
        .get("_scroll_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let hits = response
        .get("hits")
        .and_then(|hits| hits.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Protocol("response has no hits.hits array".to_string()))?;

    let records = hits
        .iter()
        .map(|hit| match hit {
            Value::Object(map) => Ok(map.clone()),
            other => Err(SourceError::Protocol(format!("hit is not an object: {other}"))),
        })
        .collect::<Result<Vec<Record>, _>>()?;

    Ok(Page {
        token,
        records,
        exhausted: false,
    })
}

pub fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Authorization(message),
        StatusCode::NOT_FOUND => SourceError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SourceError::Timeout(message),
        StatusCode::TOO_MANY_REQUESTS => SourceError::Transient(message),
        status if status.is_server_error() => SourceError::Transient(message),
        _ => SourceError::MalformedQuery(message),
    }
}

fn classify_transport(error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        SourceError::Connection(error.to_string())
    } else {
        SourceError::Protocol(error.to_string())
    }
}
