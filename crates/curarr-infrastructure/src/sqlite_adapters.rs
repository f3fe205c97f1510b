// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use curarr_domain::{
    Actor, ActorId, AutomationMode, CastMember, IdentificationStatus, Library, LibraryId,
    LibraryKind, MediaStream, Movie, MovieCollection, MovieId, NotifierKind, StreamKind,
};
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::debug;

use crate::repositories::{ActorRepository, LibraryRepository, MovieRepository, NewMovie};

// ----------------------------------------------------------------------------
// Shared row helpers
// ----------------------------------------------------------------------------

pub(crate) fn parse_dt(s: String) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP format: "YYYY-MM-DD HH:MM:SS"
    let ndt = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

pub(crate) fn parse_dt_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_dt).transpose()
}

fn json_list<T: serde::de::DeserializeOwned>(raw: String) -> Result<Vec<T>> {
    Ok(serde_json::from_str(&raw)?)
}

fn json_text<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

// ----------------------------------------------------------------------------
// Libraries
// ----------------------------------------------------------------------------

pub struct SqliteLibraryRepository {
    pool: SqlitePool,
}

impl SqliteLibraryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LibraryRepository for SqliteLibraryRepository {
    async fn create(&self, entity: Library) -> Result<Library> {
        debug!(target: "repository", name = %entity.name, "creating library");
        let q = r#"
            INSERT INTO libraries (
                name, root_path, kind, enabled, automation,
                auto_scan, auto_identify, auto_enrich, auto_publish,
                notifiers, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        let result = sqlx::query(q)
            .bind(entity.name.clone())
            .bind(entity.root_path.clone())
            .bind(entity.kind.to_string())
            .bind(entity.enabled)
            .bind(entity.automation.to_string())
            .bind(entity.auto_scan)
            .bind(entity.auto_identify)
            .bind(entity.auto_enrich)
            .bind(entity.auto_publish)
            .bind(json_text(&entity.notifiers)?)
            .bind(entity.created_at.to_rfc3339())
            .bind(entity.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(Library {
            id: LibraryId(result.last_insert_rowid()),
            ..entity
        })
    }

    async fn get_by_id(&self, id: LibraryId) -> Result<Option<Library>> {
        let row = sqlx::query("SELECT * FROM libraries WHERE id = ? LIMIT 1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_library(&r)).transpose()
    }

    async fn list(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query("SELECT * FROM libraries ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_library).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<Library>> {
        let rows = sqlx::query("SELECT * FROM libraries WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_library).collect()
    }

    async fn update(&self, entity: Library) -> Result<Library> {
        debug!(target: "repository", library_id = %entity.id, "updating library");
        let q = r#"
            UPDATE libraries SET
                name = ?, root_path = ?, kind = ?, enabled = ?, automation = ?,
                auto_scan = ?, auto_identify = ?, auto_enrich = ?, auto_publish = ?,
                notifiers = ?, updated_at = ?
            WHERE id = ?
        "#;
        let result = sqlx::query(q)
            .bind(entity.name.clone())
            .bind(entity.root_path.clone())
            .bind(entity.kind.to_string())
            .bind(entity.enabled)
            .bind(entity.automation.to_string())
            .bind(entity.auto_scan)
            .bind(entity.auto_identify)
            .bind(entity.auto_enrich)
            .bind(entity.auto_publish)
            .bind(json_text(&entity.notifiers)?)
            .bind(Utc::now().to_rfc3339())
            .bind(entity.id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("library not found: {}", entity.id));
        }
        Ok(entity)
    }
}

fn row_to_library(row: &sqlx::sqlite::SqliteRow) -> Result<Library> {
    let kind_str: String = row.try_get("kind")?;
    let automation_str: String = row.try_get("automation")?;
    Ok(Library {
        id: LibraryId(row.try_get("id")?),
        name: row.try_get("name")?,
        root_path: row.try_get("root_path")?,
        kind: match kind_str.as_str() {
            "movie" => LibraryKind::Movie,
            "series" => LibraryKind::Series,
            "music" => LibraryKind::Music,
            other => return Err(anyhow!("unknown library kind: {}", other)),
        },
        enabled: row.try_get("enabled")?,
        automation: automation_str
            .parse::<AutomationMode>()
            .map_err(|e| anyhow!(e))?,
        auto_scan: row.try_get("auto_scan")?,
        auto_identify: row.try_get("auto_identify")?,
        auto_enrich: row.try_get("auto_enrich")?,
        auto_publish: row.try_get("auto_publish")?,
        notifiers: json_list(row.try_get("notifiers")?)?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
    })
}

// ----------------------------------------------------------------------------
// Movies
// ----------------------------------------------------------------------------

pub struct SqliteMovieRepository {
    pool: SqlitePool,
}

impl SqliteMovieRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MovieRepository for SqliteMovieRepository {
    async fn insert(&self, movie: NewMovie) -> Result<Movie> {
        debug!(target: "repository", title = %movie.title, "inserting movie");
        let now = Utc::now();
        let q = r#"
            INSERT INTO movies (
                library_id, title, year, tmdb_id, imdb_id, directory,
                video_file, video_hash, identification_status,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        let result = sqlx::query(q)
            .bind(movie.library_id.0)
            .bind(movie.title.clone())
            .bind(movie.year)
            .bind(movie.tmdb_id)
            .bind(movie.imdb_id.clone())
            .bind(movie.directory.clone())
            .bind(movie.video_file.clone())
            .bind(movie.video_hash.clone())
            .bind(movie.identification_status.to_string())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        let id = MovieId(result.last_insert_rowid());
        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("movie vanished after insert: {}", id))
    }

    async fn get_by_id(&self, id: MovieId) -> Result<Option<Movie>> {
        let row = sqlx::query("SELECT * FROM movies WHERE id = ? LIMIT 1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_movie(&r)).transpose()
    }

    async fn get_by_tmdb_id(&self, tmdb_id: i64) -> Result<Option<Movie>> {
        let row = sqlx::query("SELECT * FROM movies WHERE tmdb_id = ? LIMIT 1")
            .bind(tmdb_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_movie(&r)).transpose()
    }

    async fn get_by_directory(&self, directory: &str) -> Result<Option<Movie>> {
        let row = sqlx::query("SELECT * FROM movies WHERE directory = ? LIMIT 1")
            .bind(directory)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_movie(&r)).transpose()
    }

    async fn update(&self, entity: Movie) -> Result<Movie> {
        debug!(target: "repository", movie_id = %entity.id, "updating movie");
        let q = r#"
            UPDATE movies SET
                library_id = ?, title = ?, original_title = ?, sort_title = ?,
                year = ?, plot = ?, outline = ?, tagline = ?, runtime = ?,
                content_rating = ?, premiered = ?, genres = ?, directors = ?,
                writers = ?, studios = ?,
                countries = ?, tags = ?, ratings = ?, collection = ?,
                tmdb_id = ?, imdb_id = ?, monitored = ?,
                identification_status = ?, enriched_at = ?, directory = ?,
                video_file = ?, video_hash = ?, locked_fields = ?, updated_at = ?
            WHERE id = ?
        "#;
        let collection = entity
            .collection
            .as_ref()
            .map(json_text)
            .transpose()?;
        let result = sqlx::query(q)
            .bind(entity.library_id.0)
            .bind(entity.title.clone())
            .bind(entity.original_title.clone())
            .bind(entity.sort_title.clone())
            .bind(entity.year)
            .bind(entity.plot.clone())
            .bind(entity.outline.clone())
            .bind(entity.tagline.clone())
            .bind(entity.runtime)
            .bind(entity.content_rating.clone())
            .bind(entity.premiered.clone())
            .bind(json_text(&entity.genres)?)
            .bind(json_text(&entity.directors)?)
            .bind(json_text(&entity.writers)?)
            .bind(json_text(&entity.studios)?)
            .bind(json_text(&entity.countries)?)
            .bind(json_text(&entity.tags)?)
            .bind(json_text(&entity.ratings)?)
            .bind(collection)
            .bind(entity.tmdb_id)
            .bind(entity.imdb_id.clone())
            .bind(entity.monitored)
            .bind(entity.identification_status.to_string())
            .bind(entity.enriched_at.map(|dt| dt.to_rfc3339()))
            .bind(entity.directory.clone())
            .bind(entity.video_file.clone())
            .bind(entity.video_hash.clone())
            .bind(json_text(&entity.locked_fields)?)
            .bind(Utc::now().to_rfc3339())
            .bind(entity.id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("movie not found: {}", entity.id));
        }
        Ok(entity)
    }

    async fn list_monitored_ids(&self) -> Result<Vec<MovieId>> {
        let rows = sqlx::query("SELECT id FROM movies WHERE monitored = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Ok(MovieId(r.try_get("id")?)))
            .collect::<Result<Vec<_>>>()?)
    }

    async fn set_identification_status(
        &self,
        id: MovieId,
        status: IdentificationStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE movies SET identification_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stamp_enriched(&self, id: MovieId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE movies SET enriched_at = ?, identification_status = 'enriched', updated_at = ? WHERE id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_video(
        &self,
        id: MovieId,
        file: Option<&str>,
        hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE movies SET video_file = ?, video_hash = ?, updated_at = ? WHERE id = ?")
            .bind(file)
            .bind(hash)
            .bind(Utc::now().to_rfc3339())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_cast(
        &self,
        id: MovieId,
        cast: &[(ActorId, Option<String>, i32)],
    ) -> Result<()> {
        debug!(target: "repository", movie_id = %id, members = cast.len(), "replacing cast");
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM movie_actors WHERE movie_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        for (actor_id, role, sort_order) in cast {
            sqlx::query(
                "INSERT INTO movie_actors (movie_id, actor_id, role, sort_order) VALUES (?, ?, ?, ?)",
            )
            .bind(id.0)
            .bind(actor_id.0)
            .bind(role.clone())
            .bind(sort_order)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_cast(&self, id: MovieId) -> Result<Vec<CastMember>> {
        let q = r#"
            SELECT ma.actor_id, ma.role, ma.sort_order, a.name, a.thumb_url
            FROM movie_actors ma
            JOIN actors a ON a.id = ma.actor_id
            WHERE ma.movie_id = ?
            ORDER BY ma.sort_order ASC
        "#;
        let rows = sqlx::query(q).bind(id.0).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                Ok(CastMember {
                    actor_id: ActorId(r.try_get("actor_id")?),
                    name: r.try_get("name")?,
                    role: r.try_get("role")?,
                    sort_order: r.try_get("sort_order")?,
                    thumb_url: r.try_get("thumb_url")?,
                })
            })
            .collect()
    }

    async fn replace_streams(&self, id: MovieId, streams: &[MediaStream]) -> Result<()> {
        debug!(target: "repository", movie_id = %id, streams = streams.len(), "replacing streams");
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM media_streams WHERE movie_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        for stream in streams {
            sqlx::query(
                r#"
                INSERT INTO media_streams (
                    movie_id, kind, stream_index, codec, language, channels,
                    width, height, bit_rate, is_default, is_forced, is_hdr
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.0)
            .bind(stream.kind.to_string())
            .bind(stream.stream_index)
            .bind(stream.codec.clone())
            .bind(stream.language.clone())
            .bind(stream.channels)
            .bind(stream.width)
            .bind(stream.height)
            .bind(stream.bit_rate)
            .bind(stream.is_default)
            .bind(stream.is_forced)
            .bind(stream.is_hdr)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_streams(&self, id: MovieId) -> Result<Vec<MediaStream>> {
        let rows = sqlx::query(
            "SELECT * FROM media_streams WHERE movie_id = ? ORDER BY kind, stream_index",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let kind: String = r.try_get("kind")?;
                Ok(MediaStream {
                    kind: kind.parse::<StreamKind>().map_err(|e| anyhow!(e))?,
                    stream_index: r.try_get("stream_index")?,
                    codec: r.try_get("codec")?,
                    language: r.try_get("language")?,
                    channels: r.try_get("channels")?,
                    width: r.try_get("width")?,
                    height: r.try_get("height")?,
                    bit_rate: r.try_get("bit_rate")?,
                    is_default: r.try_get("is_default")?,
                    is_forced: r.try_get("is_forced")?,
                    is_hdr: r.try_get("is_hdr")?,
                })
            })
            .collect()
    }
}

fn row_to_movie(row: &sqlx::sqlite::SqliteRow) -> Result<Movie> {
    let status_str: String = row.try_get("identification_status")?;
    let collection: Option<String> = row.try_get("collection")?;
    let collection = collection
        .map(|raw| serde_json::from_str::<MovieCollection>(&raw))
        .transpose()?;
    Ok(Movie {
        id: MovieId(row.try_get("id")?),
        library_id: LibraryId(row.try_get("library_id")?),
        title: row.try_get("title")?,
        original_title: row.try_get("original_title")?,
        sort_title: row.try_get("sort_title")?,
        year: row.try_get("year")?,
        plot: row.try_get("plot")?,
        outline: row.try_get("outline")?,
        tagline: row.try_get("tagline")?,
        runtime: row.try_get("runtime")?,
        content_rating: row.try_get("content_rating")?,
        premiered: row.try_get("premiered")?,
        genres: json_list(row.try_get("genres")?)?,
        directors: json_list(row.try_get("directors")?)?,
        writers: json_list(row.try_get("writers")?)?,
        studios: json_list(row.try_get("studios")?)?,
        countries: json_list(row.try_get("countries")?)?,
        tags: json_list(row.try_get("tags")?)?,
        ratings: json_list(row.try_get("ratings")?)?,
        collection,
        tmdb_id: row.try_get("tmdb_id")?,
        imdb_id: row.try_get("imdb_id")?,
        monitored: row.try_get("monitored")?,
        identification_status: status_str
            .parse::<IdentificationStatus>()
            .map_err(|e| anyhow!(e))?,
        enriched_at: parse_dt_opt(row.try_get("enriched_at")?)?,
        directory: row.try_get("directory")?,
        video_file: row.try_get("video_file")?,
        video_hash: row.try_get("video_hash")?,
        locked_fields: json_list(row.try_get("locked_fields")?)?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
    })
}

// ----------------------------------------------------------------------------
// Actors
// ----------------------------------------------------------------------------

pub struct SqliteActorRepository {
    pool: SqlitePool,
}

impl SqliteActorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActorRepository for SqliteActorRepository {
    async fn upsert_by_person_id(
        &self,
        person_id: i64,
        name: &str,
        thumb_url: Option<&str>,
    ) -> Result<Actor> {
        let existing = sqlx::query("SELECT * FROM actors WHERE tmdb_person_id = ? LIMIT 1")
            .bind(person_id)
            .fetch_optional(&self.pool)
            .await?;

        let id = match existing {
            Some(row) => {
                let actor = row_to_actor(&row)?;
                // A locked name survives provider refreshes.
                let keep_name = if actor.name_locked { actor.name.clone() } else { name.to_string() };
                sqlx::query("UPDATE actors SET name = ?, thumb_url = ?, updated_at = ? WHERE id = ?")
                    .bind(keep_name)
                    .bind(thumb_url)
                    .bind(Utc::now().to_rfc3339())
                    .bind(actor.id.0)
                    .execute(&self.pool)
                    .await?;
                actor.id
            }
            None => {
                let now = Utc::now().to_rfc3339();
                let result = sqlx::query(
                    "INSERT INTO actors (name, tmdb_person_id, thumb_url, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(name)
                .bind(person_id)
                .bind(thumb_url)
                .bind(now.clone())
                .bind(now)
                .execute(&self.pool)
                .await?;
                ActorId(result.last_insert_rowid())
            }
        };

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("actor vanished after upsert: {}", id))
    }

    async fn get_by_id(&self, id: ActorId) -> Result<Option<Actor>> {
        let row = sqlx::query("SELECT * FROM actors WHERE id = ? LIMIT 1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_actor(&r)).transpose()
    }

    async fn update_image(
        &self,
        id: ActorId,
        image_hash: &str,
        image_cache_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE actors SET image_hash = ?, image_cache_path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(image_hash)
        .bind(image_cache_path)
        .bind(Utc::now().to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_actor(row: &sqlx::sqlite::SqliteRow) -> Result<Actor> {
    Ok(Actor {
        id: ActorId(row.try_get("id")?),
        name: row.try_get("name")?,
        name_locked: row.try_get("name_locked")?,
        tmdb_person_id: row.try_get("tmdb_person_id")?,
        thumb_url: row.try_get("thumb_url")?,
        image_hash: row.try_get("image_hash")?,
        image_cache_path: row.try_get("image_cache_path")?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    async fn seeded_library(pool: &SqlitePool) -> Library {
        let repo = SqliteLibraryRepository::new(pool.clone());
        repo.create(Library {
            id: LibraryId(0),
            name: "Movies".to_string(),
            root_path: "/media/movies".to_string(),
            kind: LibraryKind::Movie,
            enabled: true,
            automation: AutomationMode::Yolo,
            auto_scan: true,
            auto_identify: true,
            auto_enrich: true,
            auto_publish: true,
            notifiers: vec![NotifierKind::Kodi],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap()
    }

    fn new_movie(library_id: LibraryId) -> NewMovie {
        NewMovie {
            library_id,
            title: "Inception".to_string(),
            year: Some(2010),
            tmdb_id: Some(27205),
            imdb_id: Some("tt1375666".to_string()),
            directory: "/media/movies/Inception (2010)".to_string(),
            video_file: Some("/media/movies/Inception (2010)/Inception (2010).mkv".to_string()),
            video_hash: None,
            identification_status: IdentificationStatus::Identified,
        }
    }

    #[tokio::test]
    async fn library_notifiers_round_trip() {
        let pool = test_pool().await;
        let library = seeded_library(&pool).await;
        let repo = SqliteLibraryRepository::new(pool);

        let mut loaded = repo.get_by_id(library.id).await.unwrap().unwrap();
        assert_eq!(loaded.notifiers, vec![NotifierKind::Kodi]);

        loaded.notifiers = vec![NotifierKind::Kodi, NotifierKind::Discord];
        repo.update(loaded).await.unwrap();
        let reloaded = repo.get_by_id(library.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.notifiers,
            vec![NotifierKind::Kodi, NotifierKind::Discord]
        );
    }

    #[tokio::test]
    async fn movie_insert_and_lookup_round_trip() {
        let pool = test_pool().await;
        let library = seeded_library(&pool).await;
        let repo = SqliteMovieRepository::new(pool.clone());

        let movie = repo.insert(new_movie(library.id)).await.unwrap();
        assert_eq!(movie.title, "Inception");
        assert_eq!(movie.identification_status, IdentificationStatus::Identified);

        let by_tmdb = repo.get_by_tmdb_id(27205).await.unwrap().unwrap();
        assert_eq!(by_tmdb.id, movie.id);

        let by_dir = repo
            .get_by_directory("/media/movies/Inception (2010)")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_dir.id, movie.id);
    }

    #[tokio::test]
    async fn movie_update_preserves_json_columns() {
        let pool = test_pool().await;
        let library = seeded_library(&pool).await;
        let repo = SqliteMovieRepository::new(pool.clone());

        let mut movie = repo.insert(new_movie(library.id)).await.unwrap();
        movie.genres = vec!["Science Fiction".to_string(), "Thriller".to_string()];
        movie.locked_fields = vec![curarr_domain::ScalarField::Title];
        movie.collection = Some(MovieCollection {
            tmdb_id: Some(10),
            name: "Inception Collection".to_string(),
            overview: Some("One film.".to_string()),
        });
        repo.update(movie.clone()).await.unwrap();

        let loaded = repo.get_by_id(movie.id).await.unwrap().unwrap();
        assert_eq!(loaded.genres, movie.genres);
        assert!(loaded.is_locked(curarr_domain::ScalarField::Title));
        assert_eq!(
            loaded.collection.unwrap().name,
            "Inception Collection"
        );
    }

    #[tokio::test]
    async fn cast_replacement_is_ordered() {
        let pool = test_pool().await;
        let library = seeded_library(&pool).await;
        let movies = SqliteMovieRepository::new(pool.clone());
        let actors = SqliteActorRepository::new(pool.clone());

        let movie = movies.insert(new_movie(library.id)).await.unwrap();
        let leo = actors
            .upsert_by_person_id(6193, "Leonardo DiCaprio", None)
            .await
            .unwrap();
        let ellen = actors
            .upsert_by_person_id(27578, "Elliot Page", None)
            .await
            .unwrap();

        movies
            .replace_cast(
                movie.id,
                &[
                    (ellen.id, Some("Ariadne".to_string()), 1),
                    (leo.id, Some("Cobb".to_string()), 0),
                ],
            )
            .await
            .unwrap();

        let cast = movies.get_cast(movie.id).await.unwrap();
        assert_eq!(cast.len(), 2);
        assert_eq!(cast[0].name, "Leonardo DiCaprio");
        assert_eq!(cast[1].role.as_deref(), Some("Ariadne"));
    }

    #[tokio::test]
    async fn actor_locked_name_survives_upsert() {
        let pool = test_pool().await;
        let actors = SqliteActorRepository::new(pool.clone());

        let actor = actors
            .upsert_by_person_id(500, "Tom Cruise", None)
            .await
            .unwrap();
        sqlx::query("UPDATE actors SET name = 'Thomas Cruise', name_locked = 1 WHERE id = ?")
            .bind(actor.id.0)
            .execute(&pool)
            .await
            .unwrap();

        let refreshed = actors
            .upsert_by_person_id(500, "Tom Cruise", Some("https://img/tc.jpg"))
            .await
            .unwrap();
        assert_eq!(refreshed.name, "Thomas Cruise");
        assert_eq!(refreshed.thumb_url.as_deref(), Some("https://img/tc.jpg"));
    }

    #[tokio::test]
    async fn stream_replacement_swaps_rows() {
        let pool = test_pool().await;
        let library = seeded_library(&pool).await;
        let movies = SqliteMovieRepository::new(pool.clone());
        let movie = movies.insert(new_movie(library.id)).await.unwrap();

        let first = vec![MediaStream {
            kind: StreamKind::Video,
            stream_index: 0,
            codec: Some("h264".to_string()),
            language: None,
            channels: None,
            width: Some(1920),
            height: Some(1080),
            bit_rate: Some(12_000_000),
            is_default: true,
            is_forced: false,
            is_hdr: false,
        }];
        movies.replace_streams(movie.id, &first).await.unwrap();

        let second = vec![
            MediaStream {
                kind: StreamKind::Video,
                stream_index: 0,
                codec: Some("hevc".to_string()),
                language: None,
                channels: None,
                width: Some(3840),
                height: Some(2160),
                bit_rate: Some(40_000_000),
                is_default: true,
                is_forced: false,
                is_hdr: true,
            },
            MediaStream {
                kind: StreamKind::Audio,
                stream_index: 1,
                codec: Some("eac3".to_string()),
                language: Some("eng".to_string()),
                channels: Some(6),
                width: None,
                height: None,
                bit_rate: None,
                is_default: true,
                is_forced: false,
                is_hdr: false,
            },
        ];
        movies.replace_streams(movie.id, &second).await.unwrap();

        let loaded = movies.get_streams(movie.id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|s| s.codec.as_deref() == Some("hevc") && s.is_hdr));
    }
}
