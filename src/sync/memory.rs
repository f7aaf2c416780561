// src/sync/memory.rs
//! In-process remote store for tests and local dry runs, with a call log
//! and switches to make individual operations fail.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::store::{fields, ItemPayload, RemoteItem, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List { offset: usize, limit: usize },
    Create { id: String },
    Update { id: String },
    SetDraft { id: String },
    Delete { id: String },
    Publish,
}

impl Call {
    pub fn is_write(&self) -> bool {
        !matches!(self, Call::List { .. })
    }
}

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    is_draft: bool,
    field_data: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct InMemoryCms {
    items: Mutex<Vec<Stored>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    fail_listing: AtomicBool,
    fail_publish: AtomicBool,
    failing_urls: Mutex<HashSet<String>>,
    failing_ids: Mutex<HashSet<String>>,
}

impl InMemoryCms {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_id(&self) -> String {
        format!("item-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Insert an item directly, bypassing the call log. Returns its id.
    pub async fn seed(&self, field_data: Map<String, Value>, is_draft: bool) -> String {
        let id = self.mint_id();
        self.items.lock().await.push(Stored {
            id: id.clone(),
            is_draft,
            field_data,
        });
        id
    }

    pub async fn items(&self) -> Vec<RemoteItem> {
        self.items
            .lock()
            .await
            .iter()
            .map(|s| RemoteItem::from_field_data(s.id.clone(), s.is_draft, &s.field_data))
            .collect()
    }

    pub async fn item(&self, id: &str) -> Option<RemoteItem> {
        self.items().await.into_iter().find(|i| i.id == id)
    }

    pub async fn field_data(&self, id: &str) -> Option<Map<String, Value>> {
        self.items
            .lock()
            .await
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.field_data.clone())
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn write_calls(&self) -> Vec<Call> {
        self.calls().await.into_iter().filter(Call::is_write).collect()
    }

    pub fn fail_listing(&self, on: bool) {
        self.fail_listing.store(on, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, on: bool) {
        self.fail_publish.store(on, Ordering::SeqCst);
    }

    /// Creates and updates carrying this source URL fail.
    pub async fn fail_writes_for_url(&self, url: impl Into<String>) {
        self.failing_urls.lock().await.insert(url.into());
    }

    /// Any write addressed to this item id fails.
    pub async fn fail_writes_for_id(&self, id: impl Into<String>) {
        self.failing_ids.lock().await.insert(id.into());
    }

    async fn log(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    async fn check_url(&self, payload: &ItemPayload) -> Result<()> {
        let url = payload
            .field_data
            .get(fields::SOURCE_URL)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if self.failing_urls.lock().await.contains(url) {
            bail!("injected write failure for {url}");
        }
        Ok(())
    }

    async fn check_id(&self, id: &str) -> Result<()> {
        if self.failing_ids.lock().await.contains(id) {
            bail!("injected write failure for item {id}");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryCms {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<RemoteItem>> {
        self.log(Call::List { offset, limit }).await;
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("injected listing failure");
        }
        Ok(self
            .items
            .lock()
            .await
            .iter()
            .skip(offset)
            .take(limit)
            .map(|s| RemoteItem::from_field_data(s.id.clone(), s.is_draft, &s.field_data))
            .collect())
    }

    async fn create(&self, payload: &ItemPayload) -> Result<String> {
        self.check_url(payload).await?;
        let id = self.mint_id();
        self.items.lock().await.push(Stored {
            id: id.clone(),
            is_draft: payload.is_draft,
            field_data: payload.field_data.clone(),
        });
        self.log(Call::Create { id: id.clone() }).await;
        Ok(id)
    }

    async fn update(&self, id: &str, payload: &ItemPayload) -> Result<()> {
        self.check_id(id).await?;
        self.check_url(payload).await?;
        let mut items = self.items.lock().await;
        let Some(stored) = items.iter_mut().find(|s| s.id == id) else {
            bail!("no item {id}");
        };
        stored.is_draft = payload.is_draft;
        stored.field_data = payload.field_data.clone();
        drop(items);
        self.log(Call::Update { id: id.to_string() }).await;
        Ok(())
    }

    async fn set_draft(&self, id: &str) -> Result<()> {
        self.check_id(id).await?;
        let mut items = self.items.lock().await;
        let Some(stored) = items.iter_mut().find(|s| s.id == id) else {
            bail!("no item {id}");
        };
        stored.is_draft = true;
        drop(items);
        self.log(Call::SetDraft { id: id.to_string() }).await;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check_id(id).await?;
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|s| s.id != id);
        if items.len() == before {
            bail!("no item {id}");
        }
        drop(items);
        self.log(Call::Delete { id: id.to_string() }).await;
        Ok(())
    }

    async fn publish(&self) -> Result<()> {
        self.log(Call::Publish).await;
        if self.fail_publish.load(Ordering::SeqCst) {
            bail!("injected publish failure");
        }
        Ok(())
    }
}
