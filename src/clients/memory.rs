//! Process-local stores, used when no database is configured and in tests.

use std::collections::HashMap;

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    clients::{ConsentStore, DeliveryLog},
    models::{
        consent::{ConsentRecord, ConsentStats},
        delivery::{ActionSummary, DeliveryLogEntry, DeliveryStatus},
    },
};

#[derive(Default)]
pub struct MemoryDeliveryLog {
    entries: RwLock<Vec<DeliveryLogEntry>>,
}

impl MemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded entry, oldest first.
    pub async fn entries(&self) -> Vec<DeliveryLogEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DeliveryLog for MemoryDeliveryLog {
    async fn record(&self, entry: DeliveryLogEntry) -> Result<(), Error> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn recent(
        &self,
        user_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DeliveryLogEntry>, Error> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let entries = self.entries.read().await;

        Ok(entries
            .iter()
            .rev()
            .filter(|e| user_id.is_none() || e.user_id.as_deref() == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn summarize(&self, since: DateTime<Utc>) -> Result<Vec<ActionSummary>, Error> {
        let entries = self.entries.read().await;
        let mut by_action: HashMap<&str, ActionSummary> = HashMap::new();

        for entry in entries.iter().filter(|e| e.created_at >= since) {
            let summary = by_action
                .entry(entry.action_type.as_str())
                .or_insert_with(|| ActionSummary {
                    action_type: entry.action_type.clone(),
                    total: 0,
                    successful: 0,
                    failed: 0,
                    queued: 0,
                    last_attempt_at: None,
                });

            summary.total += 1;
            match entry.status {
                DeliveryStatus::Success => summary.successful += 1,
                DeliveryStatus::Failed => summary.failed += 1,
                DeliveryStatus::Queued => summary.queued += 1,
            }
            if summary.last_attempt_at.is_none_or(|last| entry.created_at > last) {
                summary.last_attempt_at = Some(entry.created_at);
            }
        }

        let mut summaries: Vec<ActionSummary> = by_action.into_values().collect();
        summaries.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| a.action_type.cmp(&b.action_type))
        });

        Ok(summaries)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConsentStore {
    records: RwLock<HashMap<String, ConsentRecord>>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: &str, record: ConsentRecord) {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), record);
    }

    pub async fn remove(&self, user_id: &str) {
        self.records.write().await.remove(user_id);
    }
}

#[async_trait]
impl ConsentStore for MemoryConsentStore {
    async fn get_consent(&self, user_id: &str) -> Result<Option<ConsentRecord>, Error> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn consent_stats(&self) -> Result<ConsentStats, Error> {
        let records = self.records.read().await;
        let count = |pred: fn(&ConsentRecord) -> bool| {
            records.values().filter(|r| pred(r)).count() as i64
        };

        Ok(ConsentStats {
            total_users: records.len() as i64,
            primary_consent: count(|r| r.primary_consent),
            marketing_consent: count(|r| r.marketing_consent),
            has_contact: count(|r| {
                r.contact_address
                    .as_deref()
                    .map(|c| !c.trim().is_empty())
                    .unwrap_or(false)
            }),
        })
    }
}
