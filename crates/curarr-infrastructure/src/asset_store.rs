// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use curarr_domain::{
    AssetCandidate, AssetKind, AssetSource, CacheFile, CacheFileId, CandidateId, EntityKind,
    EntityRef, MetadataRecord, Provider, RefreshLogEntry, SelectedBy,
};
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::debug;

use crate::repositories::{
    CacheFileStore, CandidateAnalysis, CandidateStore, NewCandidate, ProviderCacheStore,
    RefreshLogStore,
};
use crate::sqlite_adapters::{parse_dt, parse_dt_opt};

fn hash_to_db(hash: Option<u64>) -> Option<i64> {
    hash.map(|h| h as i64)
}

fn hash_from_db(raw: Option<i64>) -> Option<u64> {
    raw.map(|h| h as u64)
}

// ----------------------------------------------------------------------------
// Provider cache
// ----------------------------------------------------------------------------

pub struct SqliteProviderCacheStore {
    pool: SqlitePool,
}

impl SqliteProviderCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProviderCacheStore for SqliteProviderCacheStore {
    async fn get(
        &self,
        entity_kind: EntityKind,
        provider_key: &str,
    ) -> Result<Option<(MetadataRecord, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT payload, fetched_at FROM provider_cache WHERE entity_kind = ? AND provider_key = ? LIMIT 1",
        )
        .bind(entity_kind.to_string())
        .bind(provider_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let payload: String = r.try_get("payload")?;
                let record: MetadataRecord = serde_json::from_str(&payload)?;
                let fetched_at = parse_dt(r.try_get("fetched_at")?)?;
                Ok(Some((record, fetched_at)))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        entity_kind: EntityKind,
        provider_key: &str,
        record: &MetadataRecord,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        debug!(
            target: "repository",
            entity_kind = %entity_kind,
            provider_key,
            images = record.images.len(),
            "writing provider cache record"
        );
        let payload = serde_json::to_string(record)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO provider_cache (entity_kind, provider_key, payload, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_kind, provider_key)
            DO UPDATE SET payload = excluded.payload, fetched_at = excluded.fetched_at
            "#,
        )
        .bind(entity_kind.to_string())
        .bind(provider_key)
        .bind(payload)
        .bind(fetched_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let cache_id: i64 = sqlx::query(
            "SELECT id FROM provider_cache WHERE entity_kind = ? AND provider_key = ?",
        )
        .bind(entity_kind.to_string())
        .bind(provider_key)
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        sqlx::query("DELETE FROM provider_cache_images WHERE cache_id = ?")
            .bind(cache_id)
            .execute(&mut *tx)
            .await?;
        for image in &record.images {
            sqlx::query(
                r#"
                INSERT INTO provider_cache_images (
                    cache_id, provider, image_type, url, width, height,
                    vote_average, vote_count, language, is_hd
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cache_id)
            .bind(image.provider.to_string())
            .bind(image.image_type.clone())
            .bind(image.url.clone())
            .bind(image.width)
            .bind(image.height)
            .bind(image.vote_average)
            .bind(image.vote_count)
            .bind(image.language.clone())
            .bind(image.is_hd)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Candidates
// ----------------------------------------------------------------------------

pub struct SqliteCandidateStore {
    pool: SqlitePool,
}

impl SqliteCandidateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CandidateStore for SqliteCandidateStore {
    async fn upsert(&self, candidate: NewCandidate, update_existing: bool) -> Result<CandidateId> {
        let existing = sqlx::query(
            "SELECT id FROM provider_assets WHERE entity_kind = ? AND entity_id = ? AND url = ? LIMIT 1",
        )
        .bind(candidate.entity.kind.to_string())
        .bind(candidate.entity.id)
        .bind(candidate.url.clone())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let id: i64 = row.try_get("id")?;
            if update_existing {
                sqlx::query(
                    r#"
                    UPDATE provider_assets
                    SET width = ?, height = ?, vote_average = ?, vote_count = ?,
                        language = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(candidate.width)
                .bind(candidate.height)
                .bind(candidate.vote_average)
                .bind(candidate.vote_count)
                .bind(candidate.language.clone())
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            return Ok(CandidateId(id));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO provider_assets (
                entity_kind, entity_id, asset_kind, provider, url,
                width, height, vote_average, vote_count, language,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candidate.entity.kind.to_string())
        .bind(candidate.entity.id)
        .bind(candidate.kind.to_string())
        .bind(candidate.provider.to_string())
        .bind(candidate.url.clone())
        .bind(candidate.width)
        .bind(candidate.height)
        .bind(candidate.vote_average)
        .bind(candidate.vote_count)
        .bind(candidate.language.clone())
        .bind(now.clone())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(CandidateId(result.last_insert_rowid()))
    }

    async fn get(&self, id: CandidateId) -> Result<Option<AssetCandidate>> {
        let row = sqlx::query("SELECT * FROM provider_assets WHERE id = ? LIMIT 1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_candidate(&r)).transpose()
    }

    async fn list_for_entity(
        &self,
        entity: EntityRef,
        kind: Option<AssetKind>,
    ) -> Result<Vec<AssetCandidate>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT * FROM provider_assets WHERE entity_kind = ? AND entity_id = ? AND asset_kind = ? ORDER BY id",
                )
                .bind(entity.kind.to_string())
                .bind(entity.id)
                .bind(kind.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM provider_assets WHERE entity_kind = ? AND entity_id = ? ORDER BY id",
                )
                .bind(entity.kind.to_string())
                .bind(entity.id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_candidate).collect()
    }

    async fn record_analysis(&self, id: CandidateId, analysis: &CandidateAnalysis) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE provider_assets
            SET width = COALESCE(?, width), height = COALESCE(?, height),
                content_hash = COALESCE(?, content_hash),
                perceptual_hash = COALESCE(?, perceptual_hash),
                difference_hash = COALESCE(?, difference_hash),
                alpha_ratio = COALESCE(?, alpha_ratio),
                format = COALESCE(?, format),
                analyzed = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(analysis.width)
        .bind(analysis.height)
        .bind(analysis.content_hash.clone())
        .bind(hash_to_db(analysis.perceptual_hash))
        .bind(hash_to_db(analysis.difference_hash))
        .bind(analysis.alpha_ratio)
        .bind(analysis.format.clone())
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_score(&self, id: CandidateId, score: i32) -> Result<()> {
        sqlx::query("UPDATE provider_assets SET score = ?, updated_at = ? WHERE id = ?")
            .bind(score)
            .bind(Utc::now().to_rfc3339())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_downloaded(&self, id: CandidateId, content_hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE provider_assets SET is_downloaded = 1, content_hash = ?, updated_at = ? WHERE id = ?",
        )
        .bind(content_hash)
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn swap_selected(
        &self,
        entity: EntityRef,
        kind: AssetKind,
        selected: &[CandidateId],
        selected_by: SelectedBy,
        at: DateTime<Utc>,
    ) -> Result<()> {
        debug!(
            target: "repository",
            entity = %entity,
            asset_kind = %kind,
            selected = selected.len(),
            "swapping selected candidate set"
        );
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE provider_assets
            SET is_selected = 0, selected_at = NULL, selected_by = NULL, updated_at = ?
            WHERE entity_kind = ? AND entity_id = ? AND asset_kind = ?
            "#,
        )
        .bind(at.to_rfc3339())
        .bind(entity.kind.to_string())
        .bind(entity.id)
        .bind(kind.to_string())
        .execute(&mut *tx)
        .await?;

        for id in selected {
            let result = sqlx::query(
                r#"
                UPDATE provider_assets
                SET is_selected = 1, selected_at = ?, selected_by = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(at.to_rfc3339())
            .bind(selected_by.to_string())
            .bind(at.to_rfc3339())
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(anyhow!("candidate not found during selection: {}", id));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn selected_ids(&self, entity: EntityRef, kind: AssetKind) -> Result<Vec<CandidateId>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM provider_assets
            WHERE entity_kind = ? AND entity_id = ? AND asset_kind = ? AND is_selected = 1
            ORDER BY id
            "#,
        )
        .bind(entity.kind.to_string())
        .bind(entity.id)
        .bind(kind.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok(CandidateId(r.try_get("id")?)))
            .collect()
    }
}

fn row_to_candidate(row: &sqlx::sqlite::SqliteRow) -> Result<AssetCandidate> {
    let entity_kind: String = row.try_get("entity_kind")?;
    let asset_kind: String = row.try_get("asset_kind")?;
    let provider: String = row.try_get("provider")?;
    let selected_by: Option<String> = row.try_get("selected_by")?;
    Ok(AssetCandidate {
        id: CandidateId(row.try_get("id")?),
        entity: EntityRef {
            kind: entity_kind.parse::<EntityKind>().map_err(|e| anyhow!(e))?,
            id: row.try_get("entity_id")?,
        },
        kind: asset_kind.parse::<AssetKind>().map_err(|e| anyhow!(e))?,
        provider: provider.parse::<Provider>().map_err(|e| anyhow!(e))?,
        url: row.try_get("url")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        content_hash: row.try_get("content_hash")?,
        perceptual_hash: hash_from_db(row.try_get("perceptual_hash")?),
        difference_hash: hash_from_db(row.try_get("difference_hash")?),
        alpha_ratio: row.try_get("alpha_ratio")?,
        format: row.try_get("format")?,
        vote_average: row.try_get("vote_average")?,
        vote_count: row.try_get("vote_count")?,
        language: row.try_get("language")?,
        analyzed: row.try_get("analyzed")?,
        is_downloaded: row.try_get("is_downloaded")?,
        is_selected: row.try_get("is_selected")?,
        is_rejected: row.try_get("is_rejected")?,
        score: row.try_get("score")?,
        selected_at: parse_dt_opt(row.try_get("selected_at")?)?,
        selected_by: selected_by
            .map(|s| s.parse::<SelectedBy>().map_err(|e| anyhow!(e)))
            .transpose()?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
    })
}

// ----------------------------------------------------------------------------
// Cache files
// ----------------------------------------------------------------------------

pub struct SqliteCacheFileStore {
    pool: SqlitePool,
}

impl SqliteCacheFileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CacheFileStore for SqliteCacheFileStore {
    async fn insert(&self, file: CacheFile) -> Result<CacheFile> {
        debug!(
            target: "repository",
            entity = %file.entity,
            asset_kind = %file.kind,
            content_hash = %file.content_hash,
            "inserting cache file"
        );
        let result = sqlx::query(
            r#"
            INSERT INTO cache_files (
                entity_kind, entity_id, asset_kind, file_path, file_size,
                content_hash, perceptual_hash, width, height, source,
                source_url, provider, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.entity.kind.to_string())
        .bind(file.entity.id)
        .bind(file.kind.to_string())
        .bind(file.file_path.clone())
        .bind(file.file_size)
        .bind(file.content_hash.clone())
        .bind(hash_to_db(file.perceptual_hash))
        .bind(file.width)
        .bind(file.height)
        .bind(file.source.to_string())
        .bind(file.source_url.clone())
        .bind(file.provider.map(|p| p.to_string()))
        .bind(file.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(CacheFile {
            id: CacheFileId(result.last_insert_rowid()),
            ..file
        })
    }

    async fn get_by_hash(
        &self,
        entity: EntityRef,
        content_hash: &str,
    ) -> Result<Option<CacheFile>> {
        let row = sqlx::query(
            "SELECT * FROM cache_files WHERE entity_kind = ? AND entity_id = ? AND content_hash = ? LIMIT 1",
        )
        .bind(entity.kind.to_string())
        .bind(entity.id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_cache_file(&r)).transpose()
    }

    async fn list_for_entity(
        &self,
        entity: EntityRef,
        kind: Option<AssetKind>,
    ) -> Result<Vec<CacheFile>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT * FROM cache_files WHERE entity_kind = ? AND entity_id = ? AND asset_kind = ? ORDER BY id",
                )
                .bind(entity.kind.to_string())
                .bind(entity.id)
                .bind(kind.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM cache_files WHERE entity_kind = ? AND entity_id = ? ORDER BY id",
                )
                .bind(entity.kind.to_string())
                .bind(entity.id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_cache_file).collect()
    }

    async fn set_perceptual_hash(&self, id: CacheFileId, hash: u64) -> Result<()> {
        sqlx::query("UPDATE cache_files SET perceptual_hash = ? WHERE id = ?")
            .bind(hash as i64)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn link_provider(
        &self,
        id: CacheFileId,
        provider: Provider,
        source_url: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE cache_files SET provider = ?, source_url = ? WHERE id = ?")
            .bind(provider.to_string())
            .bind(source_url)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn relocate(
        &self,
        id: CacheFileId,
        new_path: &str,
        new_source: AssetSource,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE cache_files SET file_path = ?, source = ? WHERE id = ?")
            .bind(new_path)
            .bind(new_source.to_string())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("cache file not found: {}", id));
        }
        Ok(())
    }

    async fn delete(&self, id: CacheFileId) -> Result<()> {
        let result = sqlx::query("DELETE FROM cache_files WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("cache file not found: {}", id));
        }
        Ok(())
    }

    async fn list_local_for(&self, entity: EntityRef, kind: AssetKind) -> Result<Vec<CacheFile>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM cache_files
            WHERE entity_kind = ? AND entity_id = ? AND asset_kind = ? AND source = 'local'
            ORDER BY id
            "#,
        )
        .bind(entity.kind.to_string())
        .bind(entity.id)
        .bind(kind.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_cache_file).collect()
    }

    async fn list_orphans(&self) -> Result<Vec<CacheFile>> {
        let rows = sqlx::query(
            r#"
            SELECT cf.* FROM cache_files cf
            WHERE cf.source = 'provider'
              AND NOT EXISTS (
                SELECT 1 FROM provider_assets pa
                WHERE pa.entity_kind = cf.entity_kind
                  AND pa.entity_id = cf.entity_id
                  AND pa.content_hash = cf.content_hash
                  AND pa.is_selected = 1
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_cache_file).collect()
    }
}

fn row_to_cache_file(row: &sqlx::sqlite::SqliteRow) -> Result<CacheFile> {
    let entity_kind: String = row.try_get("entity_kind")?;
    let asset_kind: String = row.try_get("asset_kind")?;
    let source: String = row.try_get("source")?;
    let provider: Option<String> = row.try_get("provider")?;
    Ok(CacheFile {
        id: CacheFileId(row.try_get("id")?),
        entity: EntityRef {
            kind: entity_kind.parse::<EntityKind>().map_err(|e| anyhow!(e))?,
            id: row.try_get("entity_id")?,
        },
        kind: asset_kind.parse::<AssetKind>().map_err(|e| anyhow!(e))?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        content_hash: row.try_get("content_hash")?,
        perceptual_hash: hash_from_db(row.try_get("perceptual_hash")?),
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        source: source.parse::<AssetSource>().map_err(|e| anyhow!(e))?,
        source_url: row.try_get("source_url")?,
        provider: provider
            .map(|p| p.parse::<Provider>().map_err(|e| anyhow!(e)))
            .transpose()?,
        created_at: parse_dt(row.try_get("created_at")?)?,
    })
}

// ----------------------------------------------------------------------------
// Refresh log
// ----------------------------------------------------------------------------

pub struct SqliteRefreshLogStore {
    pool: SqlitePool,
}

impl SqliteRefreshLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RefreshLogStore for SqliteRefreshLogStore {
    async fn upsert(&self, entry: RefreshLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_log (entity_kind, entity_id, provider, last_checked, last_modified, needs_refresh)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_kind, entity_id, provider)
            DO UPDATE SET last_checked = excluded.last_checked,
                          last_modified = excluded.last_modified,
                          needs_refresh = excluded.needs_refresh
            "#,
        )
        .bind(entry.entity_kind.to_string())
        .bind(entry.entity_id)
        .bind(entry.provider.to_string())
        .bind(entry.last_checked.to_rfc3339())
        .bind(entry.last_modified.map(|dt| dt.to_rfc3339()))
        .bind(entry.needs_refresh)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        entity_kind: EntityKind,
        entity_id: i64,
        provider: Provider,
    ) -> Result<Option<RefreshLogEntry>> {
        let row = sqlx::query(
            "SELECT * FROM refresh_log WHERE entity_kind = ? AND entity_id = ? AND provider = ? LIMIT 1",
        )
        .bind(entity_kind.to_string())
        .bind(entity_id)
        .bind(provider.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let entity_kind: String = r.try_get("entity_kind")?;
            let provider: String = r.try_get("provider")?;
            Ok(RefreshLogEntry {
                entity_kind: entity_kind.parse::<EntityKind>().map_err(|e| anyhow!(e))?,
                entity_id: r.try_get("entity_id")?,
                provider: provider.parse::<Provider>().map_err(|e| anyhow!(e))?,
                last_checked: parse_dt(r.try_get("last_checked")?)?,
                last_modified: parse_dt_opt(r.try_get("last_modified")?)?,
                needs_refresh: r.try_get("needs_refresh")?,
            })
        })
        .transpose()
    }

    async fn stale_entities(
        &self,
        entity_kind: EntityKind,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT entity_id FROM refresh_log
            WHERE entity_kind = ? AND (last_checked < ? OR needs_refresh = 1)
            ORDER BY entity_id
            "#,
        )
        .bind(entity_kind.to_string())
        .bind(checked_before.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok(r.try_get::<i64, _>("entity_id")?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    fn movie_ref() -> EntityRef {
        EntityRef {
            kind: EntityKind::Movie,
            id: 1,
        }
    }

    fn poster_candidate(url: &str) -> NewCandidate {
        NewCandidate {
            entity: movie_ref(),
            kind: AssetKind::Poster,
            provider: Provider::Tmdb,
            url: url.to_string(),
            width: Some(2000),
            height: Some(3000),
            vote_average: Some(7.5),
            vote_count: Some(120),
            language: Some("en".to_string()),
        }
    }

    #[tokio::test]
    async fn candidate_upsert_respects_update_flag() {
        let pool = test_pool().await;
        let store = SqliteCandidateStore::new(pool);

        let id = store
            .upsert(poster_candidate("https://img/p1.jpg"), false)
            .await
            .unwrap();

        let mut refreshed = poster_candidate("https://img/p1.jpg");
        refreshed.vote_count = Some(999);

        // Automated run leaves the row alone.
        let same = store.upsert(refreshed.clone(), false).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(
            store.get(id).await.unwrap().unwrap().vote_count,
            Some(120)
        );

        // Manual run refreshes metadata in place.
        store.upsert(refreshed, true).await.unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().vote_count,
            Some(999)
        );
    }

    #[tokio::test]
    async fn analysis_marks_candidate_analyzed() {
        let pool = test_pool().await;
        let store = SqliteCandidateStore::new(pool);
        let id = store
            .upsert(poster_candidate("https://img/p1.jpg"), false)
            .await
            .unwrap();

        store
            .record_analysis(
                id,
                &CandidateAnalysis {
                    width: Some(1000),
                    height: Some(1500),
                    content_hash: Some("abc123".to_string()),
                    perceptual_hash: Some(u64::MAX),
                    difference_hash: Some(42),
                    alpha_ratio: Some(0.0),
                    format: Some("jpeg".to_string()),
                },
            )
            .await
            .unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert!(loaded.analyzed);
        // Round-trips through the signed column.
        assert_eq!(loaded.perceptual_hash, Some(u64::MAX));
        assert_eq!(loaded.difference_hash, Some(42));
    }

    #[tokio::test]
    async fn selection_swap_replaces_previous_set() {
        let pool = test_pool().await;
        let store = SqliteCandidateStore::new(pool);
        let a = store
            .upsert(poster_candidate("https://img/a.jpg"), false)
            .await
            .unwrap();
        let b = store
            .upsert(poster_candidate("https://img/b.jpg"), false)
            .await
            .unwrap();

        let now = Utc::now();
        store
            .swap_selected(movie_ref(), AssetKind::Poster, &[a], SelectedBy::Auto, now)
            .await
            .unwrap();
        assert_eq!(
            store.selected_ids(movie_ref(), AssetKind::Poster).await.unwrap(),
            vec![a]
        );

        store
            .swap_selected(movie_ref(), AssetKind::Poster, &[b], SelectedBy::Auto, now)
            .await
            .unwrap();
        let selected = store.selected_ids(movie_ref(), AssetKind::Poster).await.unwrap();
        assert_eq!(selected, vec![b]);
        assert!(!store.get(a).await.unwrap().unwrap().is_selected);
    }

    #[tokio::test]
    async fn provider_cache_round_trip() {
        let pool = test_pool().await;
        let store = SqliteProviderCacheStore::new(pool);

        let mut record = MetadataRecord {
            tmdb_id: Some(27205),
            title: Some("Inception".to_string()),
            ..MetadataRecord::default()
        };
        record.images.push(curarr_domain::ProviderImage {
            provider: Provider::Tmdb,
            image_type: "poster".to_string(),
            url: "https://img/p.jpg".to_string(),
            width: Some(2000),
            height: Some(3000),
            vote_average: Some(8.0),
            vote_count: Some(50),
            language: Some("en".to_string()),
            is_hd: true,
        });

        let fetched_at = Utc::now();
        store
            .put(EntityKind::Movie, "tmdb:27205", &record, fetched_at)
            .await
            .unwrap();

        let (loaded, at) = store
            .get(EntityKind::Movie, "tmdb:27205")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.title.as_deref(), Some("Inception"));
        assert_eq!(loaded.images.len(), 1);
        assert_eq!(at.timestamp(), fetched_at.timestamp());

        // Second put replaces, not duplicates, image child rows.
        store
            .put(EntityKind::Movie, "tmdb:27205", &record, fetched_at)
            .await
            .unwrap();
        let (loaded, _) = store
            .get(EntityKind::Movie, "tmdb:27205")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.images.len(), 1);
    }

    #[tokio::test]
    async fn orphaned_cache_files_are_listed() {
        let pool = test_pool().await;
        let candidates = SqliteCandidateStore::new(pool.clone());
        let files = SqliteCacheFileStore::new(pool);

        let id = candidates
            .upsert(poster_candidate("https://img/kept.jpg"), false)
            .await
            .unwrap();
        candidates.mark_downloaded(id, "hash-kept").await.unwrap();
        candidates
            .swap_selected(movie_ref(), AssetKind::Poster, &[id], SelectedBy::Auto, Utc::now())
            .await
            .unwrap();

        let kept = files
            .insert(sample_cache_file("hash-kept"))
            .await
            .unwrap();
        let orphan = files
            .insert(sample_cache_file("hash-orphan"))
            .await
            .unwrap();

        let orphans = files.list_orphans().await.unwrap();
        let ids: Vec<CacheFileId> = orphans.iter().map(|f| f.id).collect();
        assert!(ids.contains(&orphan.id));
        assert!(!ids.contains(&kept.id));
    }

    fn sample_cache_file(hash: &str) -> CacheFile {
        CacheFile {
            id: CacheFileId(0),
            entity: movie_ref(),
            kind: AssetKind::Poster,
            file_path: format!("cache/poster/{}/{}.jpg", &hash[0..2], hash),
            file_size: 1024,
            content_hash: hash.to_string(),
            perceptual_hash: None,
            width: Some(2000),
            height: Some(3000),
            source: AssetSource::Provider,
            source_url: Some("https://img/p.jpg".to_string()),
            provider: Some(Provider::Tmdb),
            created_at: Utc::now(),
        }
    }
}
