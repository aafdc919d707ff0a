use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ProviderConfig;
use crate::error::StoreError;
use crate::types::WebhookEvent;

/// Most rows the event log will ever return.
pub const MAX_LISTED_EVENTS: usize = 50;

const EVENTS_TABLE: &str = "webhook_events";

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Up to `limit` rows, newest `created_at` first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<WebhookEvent>, StoreError>;
}

// ─── Supabase (PostgREST) ───────────────────────────────────────────────────

pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseStore {
    pub fn new(client: reqwest::Client, base_url: &str, anon_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }
}

#[async_trait]
impl EventStore for SupabaseStore {
    async fn recent_events(&self, limit: usize) -> Result<Vec<WebhookEvent>, StoreError> {
        let url = format!("{}/rest/v1/{EVENTS_TABLE}", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("select", "*"),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, message });
        }

        resp.json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

// ─── In-memory ──────────────────────────────────────────────────────────────

/// Bounded in-process event history; keeps the newest [`MAX_LISTED_EVENTS`] rows.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<VecDeque<WebhookEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: WebhookEvent) {
        let mut queue = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_LISTED_EVENTS {
            // Drop the oldest row, not simply the first inserted.
            if let Some(pos) = queue
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(i, _)| i)
            {
                if queue[pos].created_at > event.created_at {
                    return;
                }
                queue.remove(pos);
            }
        }
        queue.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn recent_events(&self, limit: usize) -> Result<Vec<WebhookEvent>, StoreError> {
        let queue = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut items: Vec<WebhookEvent> = queue.iter().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }
}

// ─── Event log reader ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventListing {
    pub records: Vec<WebhookEvent>,
    pub error: Option<String>,
}

/// Read side of the `webhook_events` table.
#[derive(Clone, Default)]
pub struct EventLog {
    store: Option<Arc<dyn EventStore>>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A log with no backing store; every listing is empty.
    pub fn unconfigured() -> Self {
        Self { store: None }
    }

    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        match config.credentials() {
            Some((url, key)) => Self::new(Arc::new(SupabaseStore::new(client, url, key))),
            None => Self::unconfigured(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub async fn list(&self) -> EventListing {
        let Some(store) = &self.store else {
            return EventListing::default();
        };

        match store.recent_events(MAX_LISTED_EVENTS).await {
            Ok(mut records) => {
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                records.truncate(MAX_LISTED_EVENTS);
                EventListing {
                    records,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load webhook events");
                EventListing {
                    records: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
