// src/sync/webflow.rs
//! Webflow CMS v2 collection as a [`RemoteStore`].
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::store::{ItemPayload, RemoteItem, RemoteStore};
use crate::resilience::{ensure_success, send_with_retry, HttpError, RateLimiter, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.webflow.com/v2";
const API: &str = "webflow";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    id: String,
    #[serde(default)]
    is_draft: bool,
    #[serde(default)]
    field_data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireWrite<'a> {
    is_draft: bool,
    field_data: &'a Map<String, Value>,
}

pub struct WebflowStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    collection_id: String,
    site_id: Option<String>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl WebflowStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        collection_id: impl Into<String>,
        site_id: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            collection_id: collection_id.into(),
            site_id,
            // 60/min documented; keep two in reserve
            limiter: Arc::new(RateLimiter::per_minute("webflow", 58)),
            retry: RetryPolicy::default(),
        }
    }

    /// Needs `WEBFLOW_API_TOKEN` and `WEBFLOW_COLLECTION_ID`; without them
    /// the store is disabled. `WEBFLOW_SITE_ID` is only needed to publish.
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        let Some(token) = var("WEBFLOW_API_TOKEN") else {
            tracing::warn!("WEBFLOW_API_TOKEN not set, CMS sync disabled");
            return None;
        };
        let Some(collection) = var("WEBFLOW_COLLECTION_ID") else {
            tracing::warn!("WEBFLOW_COLLECTION_ID not set, CMS sync disabled");
            return None;
        };
        let site = var("WEBFLOW_SITE_ID");
        if site.is_none() {
            tracing::warn!("WEBFLOW_SITE_ID not set, changes will not be published");
        }
        Some(Self::new(client, DEFAULT_BASE_URL, token, collection, site))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    fn items_url(&self) -> String {
        format!("{}/collections/{}/items", self.base_url, self.collection_id)
    }

    async fn call(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<reqwest::Response, HttpError> {
        self.limiter.acquire().await;
        let mut req = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = send_with_retry(API, req, &self.retry).await?;
        ensure_success(API, resp).await
    }

    fn write_body(payload: &ItemPayload) -> Result<Value> {
        Ok(serde_json::to_value(WireWrite {
            is_draft: payload.is_draft,
            field_data: &payload.field_data,
        })?)
    }
}

#[async_trait]
impl RemoteStore for WebflowStore {
    fn name(&self) -> &'static str {
        "webflow"
    }

    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<RemoteItem>> {
        let url = format!("{}?offset={offset}&limit={limit}", self.items_url());
        let resp = self.call(Method::GET, url, None).await?;
        let body: ListResponse = resp
            .json()
            .await
            .map_err(|source| HttpError::Decode { api: API, source })?;
        Ok(body
            .items
            .into_iter()
            .map(|w| RemoteItem::from_field_data(w.id, w.is_draft, &w.field_data))
            .collect())
    }

    async fn create(&self, payload: &ItemPayload) -> Result<String> {
        let body = Self::write_body(payload)?;
        let resp = self.call(Method::POST, self.items_url(), Some(body)).await?;
        let created: Created = resp
            .json()
            .await
            .map_err(|source| HttpError::Decode { api: API, source })?;
        Ok(created.id)
    }

    async fn update(&self, id: &str, payload: &ItemPayload) -> Result<()> {
        let body = Self::write_body(payload)?;
        let url = format!("{}/{id}", self.items_url());
        self.call(Method::PATCH, url, Some(body)).await?;
        Ok(())
    }

    async fn set_draft(&self, id: &str) -> Result<()> {
        let url = format!("{}/{id}", self.items_url());
        self.call(Method::PATCH, url, Some(json!({ "isDraft": true })))
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/{id}", self.items_url());
        self.call(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn publish(&self) -> Result<()> {
        let Some(site) = &self.site_id else {
            anyhow::bail!("no site id configured");
        };
        let url = format!("{}/sites/{site}/publish", self.base_url);
        self.call(Method::POST, url, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store(server: &mockito::Server) -> WebflowStore {
        WebflowStore::new(
            reqwest::Client::new(),
            server.url(),
            "tok",
            "col1",
            Some("site1".into()),
        )
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn list_page_maps_items_and_sends_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/collections/col1/items")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("offset".into(), "0".into()),
                mockito::Matcher::UrlEncoded("limit".into(), "100".into()),
            ]))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "items": [{
                        "id": "w1",
                        "isDraft": true,
                        "fieldData": {
                            "slug": "pm-at-acme",
                            "source-url": "https://x/1",
                            "pipeline-managed": true,
                            "expiration-date": "2024-03-01T00:00:00.000Z"
                        }
                    }],
                    "pagination": { "total": 1, "offset": 0, "limit": 100 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let items = store(&server).list_page(0, 100).await.unwrap();
        mock.assert_async().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_draft && items[0].pipeline_managed);
        assert_eq!(items[0].source_url.as_deref(), Some("https://x/1"));
        assert!(items[0].expiration_date.is_some());
    }

    #[tokio::test]
    async fn create_posts_field_data_and_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/collections/col1/items")
            .match_body(mockito::Matcher::PartialJson(json!({
                "isDraft": false,
                "fieldData": { "slug": "s", "pipeline-managed": true }
            })))
            .with_status(202)
            .with_body(r#"{"id":"new-1"}"#)
            .create_async()
            .await;

        let mut data = Map::new();
        data.insert("slug".into(), json!("s"));
        data.insert("pipeline-managed".into(), json!(true));
        let payload = ItemPayload {
            is_draft: false,
            field_data: data,
        };
        let id = store(&server).create(&payload).await.unwrap();
        assert_eq!(id, "new-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn terminal_status_surfaces_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/collections/col1/items/gone")
            .with_status(400)
            .with_body(r#"{"message":"bad"}"#)
            .expect(1)
            .create_async()
            .await;

        let err = store(&server).delete("gone").await.unwrap_err();
        mock.assert_async().await;
        let http = err.downcast_ref::<HttpError>().unwrap();
        assert_eq!(http.status().map(|s| s.as_u16()), Some(400));
    }

    #[tokio::test]
    async fn publish_without_site_is_an_error() {
        let server = mockito::Server::new_async().await;
        let s = WebflowStore::new(reqwest::Client::new(), server.url(), "t", "c", None);
        assert!(s.publish().await.is_err());
    }
}
