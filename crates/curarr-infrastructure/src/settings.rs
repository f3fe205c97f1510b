// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use chrono::Utc;
use curarr_domain::{SelectionPolicy, WorkflowToggles};
use moka::sync::Cache;
use sqlx::Row;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::repositories::SettingsStore;

pub const KEY_WORKFLOW_TOGGLES: &str = "workflow_toggles";
pub const KEY_SELECTION_POLICY: &str = "selection_policy";
pub const KEY_BULK_LOCK: &str = "bulk_enrichment_lock";

pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ? LIMIT 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("value")).transpose()?)
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Typed settings reader backed by the database with a short TTL cache, so
/// toggles flipped at runtime take effect within a minute without a query per
/// routing decision.
#[derive(Clone)]
pub struct SettingsReader {
    store: Arc<dyn SettingsStore>,
    cache: Cache<String, String>,
}

impl SettingsReader {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self::with_ttl(store, Duration::from_secs(60))
    }

    pub fn with_ttl(store: Arc<dyn SettingsStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Cache::builder().max_capacity(256).time_to_live(ttl).build(),
        }
    }

    async fn get_cached(&self, key: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.get(key) {
            return Ok(Some(hit));
        }
        let value = self.store.get_raw(key).await?;
        if let Some(value) = &value {
            self.cache.insert(key.to_string(), value.clone());
        }
        Ok(value)
    }

    pub async fn workflow_toggles(&self) -> Result<WorkflowToggles> {
        match self.get_cached(KEY_WORKFLOW_TOGGLES).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(WorkflowToggles::default()),
        }
    }

    pub async fn selection_policy(&self) -> Result<SelectionPolicy> {
        match self.get_cached(KEY_SELECTION_POLICY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(SelectionPolicy::default()),
        }
    }

    /// Writes go straight through and drop the cached entry.
    pub async fn set_workflow_toggles(&self, toggles: &WorkflowToggles) -> Result<()> {
        debug!(target: "settings", ?toggles, "updating workflow toggles");
        self.store
            .set_raw(KEY_WORKFLOW_TOGGLES, &serde_json::to_string(toggles)?)
            .await?;
        self.cache.invalidate(KEY_WORKFLOW_TOGGLES);
        Ok(())
    }

    pub async fn set_selection_policy(&self, policy: &SelectionPolicy) -> Result<()> {
        self.store
            .set_raw(KEY_SELECTION_POLICY, &serde_json::to_string(policy)?)
            .await?;
        self.cache.invalidate(KEY_SELECTION_POLICY);
        Ok(())
    }

    /// Storage-backed lock row for the bulk scheduler. An empty value means
    /// released. Returns false when the lock is already held.
    pub async fn try_acquire_bulk_lock(&self, holder: &str) -> Result<bool> {
        match self.store.get_raw(KEY_BULK_LOCK).await? {
            Some(value) if !value.is_empty() => Ok(false),
            _ => {
                self.store.set_raw(KEY_BULK_LOCK, holder).await?;
                Ok(true)
            }
        }
    }

    pub async fn release_bulk_lock(&self) -> Result<()> {
        self.store.set_raw(KEY_BULK_LOCK, "").await
    }
}
