// SPDX-License-Identifier: GPL-3.0-or-later
//! Library scanning and single-directory ingest: NFO identification, video
//! hashing, entity upsert, and local artwork discovery.

use chrono::Utc;
use curarr_domain::{
    AssetKind, AssetSource, CacheFile, CacheFileId, EntityRef, IdentificationStatus, LibraryId,
    MovieId, ScalarField,
};
use curarr_imaging::analyze_image;
use curarr_infrastructure::repositories::NewMovie;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::deps::Deps;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::events;
use crate::naming::{is_video_file, VIDEO_EXTENSIONS};
use crate::nfo::parser::{collect_nfo_files, parse_nfo_files, NfoDocument, NfoParseOutcome};
use crate::verify::hash_file;

pub struct ScanService<'a> {
    deps: &'a Deps,
}

#[derive(Debug)]
pub struct IngestResult {
    pub movie_id: MovieId,
    pub created: bool,
    pub identified: bool,
}

impl<'a> ScanService<'a> {
    pub fn new(deps: &'a Deps) -> Self {
        Self { deps }
    }

    /// Enumerate candidate movie directories under a library root. The
    /// caller fans out one directory-scan job per entry.
    pub async fn list_movie_directories(
        &self,
        library_id: LibraryId,
    ) -> WorkflowResult<Vec<PathBuf>> {
        let library = self
            .deps
            .libraries
            .get_by_id(library_id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("library not found: {library_id}")))?;

        let root = PathBuf::from(&library.root_path);
        if !root.is_dir() {
            return Err(WorkflowError::not_found(format!(
                "library root missing: {}",
                root.display()
            )));
        }

        let mut directories = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.metadata()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "trash" || name.starts_with('.') {
                continue;
            }
            directories.push(entry.path());
        }
        directories.sort();

        info!(
            target: "scan",
            library_id = %library_id,
            directories = directories.len(),
            "library scan enumerated"
        );
        self.deps.hub.publish(events::scan_status(
            library_id,
            "enumerated",
            directories.len(),
        ));
        Ok(directories)
    }

    /// Ingest one movie directory: identify via NFO files, hash the main
    /// video, upsert the entity row.
    pub async fn ingest_directory(
        &self,
        library_id: LibraryId,
        directory: &str,
    ) -> WorkflowResult<IngestResult> {
        let dir_path = Path::new(directory);
        if !dir_path.is_dir() {
            return Err(WorkflowError::not_found(format!(
                "directory missing: {directory}"
            )));
        }

        let video_file = find_main_video(dir_path)?;
        let video_basename = video_file
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string());

        let nfo_files = collect_nfo_files(dir_path)?;
        let outcome = parse_nfo_files(nfo_files, video_basename.as_deref());
        let document = match outcome {
            NfoParseOutcome::Valid { document, warnings } => {
                for warning in warnings {
                    warn!(target: "scan", directory, %warning, "NFO warning");
                }
                Some(document)
            }
            NfoParseOutcome::Ambiguous { message } => {
                return Err(WorkflowError::validation(format!(
                    "ambiguous NFO identifiers in {directory}: {message}"
                )));
            }
            NfoParseOutcome::Invalid { message } => {
                debug!(target: "scan", directory, message, "no usable NFO identification");
                None
            }
        };

        let video_hash = match &video_file {
            Some(path) => Some(hash_file(path)?),
            None => None,
        };

        let existing = self.deps.movies.get_by_directory(directory).await?;
        let (movie_id, created) = match existing {
            Some(mut movie) => {
                if let Some(document) = &document {
                    apply_document(&mut movie, document);
                }
                movie.video_file = video_file
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string());
                movie.video_hash = video_hash.clone();
                if movie.tmdb_id.is_some() || movie.imdb_id.is_some() {
                    if movie.identification_status == IdentificationStatus::Discovered {
                        movie.identification_status = IdentificationStatus::Identified;
                    }
                } else {
                    movie.identification_status = IdentificationStatus::Discovered;
                }
                let movie = self.deps.movies.update(movie).await?;
                self.deps
                    .hub
                    .publish(events::movies_changed(movie.id, "updated"));
                (movie.id, false)
            }
            None => {
                let title = document
                    .as_ref()
                    .and_then(|d| d.title.clone())
                    .unwrap_or_else(|| directory_title(dir_path));
                let status = if document.as_ref().map(NfoDocument::has_any_id).unwrap_or(false)
                {
                    IdentificationStatus::Identified
                } else {
                    IdentificationStatus::Discovered
                };
                let mut movie = self
                    .deps
                    .movies
                    .insert(NewMovie {
                        library_id,
                        title,
                        year: document.as_ref().and_then(|d| d.year),
                        tmdb_id: document.as_ref().and_then(|d| d.tmdb_id),
                        imdb_id: document.as_ref().and_then(|d| d.imdb_id.clone()),
                        directory: directory.to_string(),
                        video_file: video_file
                            .as_ref()
                            .map(|p| p.to_string_lossy().to_string()),
                        video_hash: video_hash.clone(),
                        identification_status: status,
                    })
                    .await?;
                if let Some(document) = &document {
                    apply_document(&mut movie, document);
                    movie = self.deps.movies.update(movie).await?;
                }
                self.deps
                    .hub
                    .publish(events::movies_changed(movie.id, "added"));
                (movie.id, true)
            }
        };

        let identified = self
            .deps
            .movies
            .get_by_id(movie_id)
            .await?
            .map(|m| m.identification_status == IdentificationStatus::Identified
                || m.identification_status == IdentificationStatus::Enriched)
            .unwrap_or(false);

        info!(
            target: "scan",
            movie_id = %movie_id,
            directory,
            created,
            identified,
            "directory ingested"
        );
        Ok(IngestResult {
            movie_id,
            created,
            identified,
        })
    }

    /// Register existing artwork sidecars as local cache files so phase 2 can
    /// match them against provider candidates and phase 5 can supersede them.
    pub async fn discover_local_assets(&self, movie_id: MovieId) -> WorkflowResult<usize> {
        let movie = self
            .deps
            .movies
            .get_by_id(movie_id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;
        let directory = PathBuf::from(&movie.directory);
        let entity = EntityRef::movie(movie_id);
        let mut discovered = 0usize;

        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            if !entry.metadata()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(kind) = sidecar_kind(&name) else {
                continue;
            };
            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(target: "scan", file = %name, error = %err, "unreadable sidecar");
                    continue;
                }
            };
            let analysis = match analyze_image(&bytes) {
                Ok(analysis) => analysis,
                Err(err) => {
                    debug!(target: "scan", file = %name, error = %err, "undecodable sidecar");
                    continue;
                }
            };
            if self
                .deps
                .cache_files
                .get_by_hash(entity, &analysis.content_hash)
                .await?
                .is_some()
            {
                continue;
            }
            self.deps
                .cache_files
                .insert(CacheFile {
                    id: CacheFileId(0),
                    entity,
                    kind,
                    file_path: entry.path().to_string_lossy().to_string(),
                    file_size: bytes.len() as i64,
                    content_hash: analysis.content_hash,
                    perceptual_hash: Some(analysis.perceptual_hash),
                    width: Some(analysis.width as i32),
                    height: Some(analysis.height as i32),
                    source: AssetSource::Local,
                    source_url: None,
                    provider: None,
                    created_at: Utc::now(),
                })
                .await?;
            discovered += 1;
        }

        debug!(target: "scan", movie_id = %movie_id, discovered, "local assets registered");
        Ok(discovered)
    }
}

/// The largest file with a known video extension is the main feature.
fn find_main_video(directory: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_video_file(&name) || name.contains("-trailer") {
            continue;
        }
        if best.as_ref().map(|(size, _)| meta.len() > *size).unwrap_or(true) {
            best = Some((meta.len(), entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

fn directory_title(directory: &Path) -> String {
    let name = directory
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    // Strip a trailing "(Year)" marker.
    match name.rfind(" (") {
        Some(pos) if name.ends_with(')') => name[..pos].to_string(),
        _ => name,
    }
}

/// Map a sidecar filename onto an asset kind by its Kodi suffix.
fn sidecar_kind(name: &str) -> Option<AssetKind> {
    let lower = name.to_lowercase();
    let stem = lower.rsplit_once('.').map(|(stem, ext)| {
        if VIDEO_EXTENSIONS.contains(&ext) || ext == "srt" || ext == "nfo" || ext == "txt" {
            None
        } else {
            Some(stem)
        }
    })??;
    for kind in AssetKind::IMAGE_KINDS {
        if stem.ends_with(&format!("-{}", kind.kodi_suffix())) {
            return Some(kind);
        }
    }
    // Bare `poster.jpg` / `fanart.jpg` without the title prefix.
    for kind in AssetKind::IMAGE_KINDS {
        if stem == kind.kodi_suffix() {
            return Some(kind);
        }
    }
    None
}

/// Copy parsed NFO metadata onto the entity, honoring per-field locks.
fn apply_document(movie: &mut curarr_domain::Movie, document: &NfoDocument) {
    if movie.tmdb_id.is_none() {
        movie.tmdb_id = document.tmdb_id;
    }
    if movie.imdb_id.is_none() {
        movie.imdb_id = document.imdb_id.clone();
    }
    if !movie.is_locked(ScalarField::Title) {
        if let Some(title) = &document.title {
            movie.title = title.clone();
        }
    }
    if !movie.is_locked(ScalarField::OriginalTitle) && document.original_title.is_some() {
        movie.original_title = document.original_title.clone();
    }
    if !movie.is_locked(ScalarField::SortTitle) && document.sort_title.is_some() {
        movie.sort_title = document.sort_title.clone();
    }
    if !movie.is_locked(ScalarField::Year) && document.year.is_some() {
        movie.year = document.year;
    }
    if !movie.is_locked(ScalarField::Plot) && document.plot.is_some() {
        movie.plot = document.plot.clone();
    }
    if !movie.is_locked(ScalarField::Outline) && document.outline.is_some() {
        movie.outline = document.outline.clone();
    }
    if !movie.is_locked(ScalarField::Tagline) && document.tagline.is_some() {
        movie.tagline = document.tagline.clone();
    }
    if !movie.is_locked(ScalarField::Runtime) && document.runtime.is_some() {
        movie.runtime = document.runtime;
    }
    if !movie.is_locked(ScalarField::ContentRating) && document.content_rating.is_some() {
        movie.content_rating = document.content_rating.clone();
    }
    if !movie.is_locked(ScalarField::Premiered) && document.premiered.is_some() {
        movie.premiered = document.premiered.clone();
    }
    if !document.genres.is_empty() {
        movie.genres = document.genres.clone();
    }
    if !document.directors.is_empty() {
        movie.directors = document.directors.clone();
    }
    if !document.writers.is_empty() {
        movie.writers = document.writers.clone();
    }
    if !document.studios.is_empty() {
        movie.studios = document.studios.clone();
    }
    if !document.countries.is_empty() {
        movie.countries = document.countries.clone();
    }
    if !document.tags.is_empty() {
        movie.tags = document.tags.clone();
    }
    if !document.ratings.is_empty() {
        movie.ratings = document.ratings.clone();
    }
    if let Some(collection) = &document.collection {
        movie.collection = Some(curarr_domain::MovieCollection {
            tmdb_id: collection.tmdb_id,
            name: collection.name.clone(),
            overview: collection.overview.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_kinds_match_kodi_suffixes() {
        assert_eq!(
            sidecar_kind("Inception (2010)-poster.jpg"),
            Some(AssetKind::Poster)
        );
        assert_eq!(
            sidecar_kind("Inception (2010)-fanart.jpg"),
            Some(AssetKind::Backdrop)
        );
        assert_eq!(sidecar_kind("poster.jpg"), Some(AssetKind::Poster));
        assert_eq!(sidecar_kind("Inception (2010).mkv"), None);
        assert_eq!(sidecar_kind("Inception (2010).nfo"), None);
        assert_eq!(sidecar_kind("random.jpg"), None);
    }

    #[test]
    fn directory_title_strips_year_suffix() {
        assert_eq!(
            directory_title(Path::new("/media/Inception (2010)")),
            "Inception"
        );
        assert_eq!(directory_title(Path::new("/media/Moana")), "Moana");
    }

    #[test]
    fn main_video_is_largest_non_trailer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Movie (2020).mkv"), vec![0u8; 4096]).unwrap();
        std::fs::write(dir.path().join("Movie (2020)-trailer.mp4"), vec![0u8; 9999]).unwrap();
        std::fs::write(dir.path().join("sample.mp4"), vec![0u8; 100]).unwrap();

        let main = find_main_video(dir.path()).unwrap().unwrap();
        assert!(main.to_string_lossy().ends_with("Movie (2020).mkv"));
    }
}
