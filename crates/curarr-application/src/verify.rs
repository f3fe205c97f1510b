// SPDX-License-Identifier: GPL-3.0-or-later
//! Library-vs-cache reconciliation for one movie directory: restore missing
//! sidecars from the cache, recycle tampered or unauthorized files, and
//! re-extract stream metadata when the video itself changed.

use curarr_domain::{AssetKind, EntityRef, Movie, MovieId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::deps::Deps;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::naming::{image_name, is_ignored_file, nfo_name, recycle};
use crate::nfo::writer::render_movie_nfo;

/// What the caller should chain next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFollowUp {
    /// Video content changed; re-publish regenerates the NFO.
    Republish,
    /// Asset files moved; players should rescan.
    NotifyPlayers,
    None,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOutcome {
    pub video_changed: bool,
    pub restored: usize,
    pub recycled: usize,
}

impl VerifyOutcome {
    pub fn follow_up(&self) -> VerifyFollowUp {
        if self.video_changed {
            VerifyFollowUp::Republish
        } else if self.restored > 0 || self.recycled > 0 {
            VerifyFollowUp::NotifyPlayers
        } else {
            VerifyFollowUp::None
        }
    }
}

/// Streaming SHA-256 of a file; media files are too large to slurp.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1 << 20];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}

pub struct Verifier<'a> {
    deps: &'a Deps,
}

impl<'a> Verifier<'a> {
    pub fn new(deps: &'a Deps) -> Self {
        Self { deps }
    }

    pub async fn verify_movie(&self, movie_id: MovieId) -> WorkflowResult<VerifyOutcome> {
        let mut movie = self
            .deps
            .movies
            .get_by_id(movie_id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;

        let directory = PathBuf::from(&movie.directory);
        if !directory.is_dir() {
            return Err(WorkflowError::not_found(format!(
                "movie directory missing: {}",
                directory.display()
            )));
        }

        let mut outcome = VerifyOutcome::default();
        self.check_video(&mut movie, &mut outcome).await?;

        // In-memory directory snapshot, main video excluded.
        let mut snapshot: HashMap<String, PathBuf> = HashMap::new();
        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            if !entry.metadata()?.is_file() {
                continue;
            }
            snapshot.insert(
                entry.file_name().to_string_lossy().to_string(),
                entry.path(),
            );
        }
        if let Some(video_file) = &movie.video_file {
            if let Some(name) = Path::new(video_file).file_name() {
                snapshot.remove(&name.to_string_lossy().to_string());
            }
        }

        self.reconcile_nfo(&movie, &directory, &mut snapshot, &mut outcome)
            .await?;
        self.reconcile_assets(&movie, &directory, &mut snapshot, &mut outcome)
            .await?;
        self.sweep_residuals(&movie, &mut snapshot, &mut outcome);

        info!(
            target: "verify",
            movie_id = %movie_id,
            video_changed = outcome.video_changed,
            restored = outcome.restored,
            recycled = outcome.recycled,
            "verification finished"
        );
        Ok(outcome)
    }

    /// Step 1: hash the main media file and rebuild stream rows on change.
    async fn check_video(&self, movie: &mut Movie, outcome: &mut VerifyOutcome) -> WorkflowResult<()> {
        let Some(video_file) = movie.video_file.clone() else {
            return Ok(());
        };
        let video_path = Path::new(&video_file);
        if !video_path.is_file() {
            warn!(target: "verify", movie_id = %movie.id, path = %video_file, "main video missing");
            return Ok(());
        }

        let current = hash_file(video_path)?;
        if movie.video_hash.as_deref() == Some(current.as_str()) {
            return Ok(());
        }

        debug!(target: "verify", movie_id = %movie.id, "video hash changed, re-probing streams");
        match self.deps.prober.probe(video_path).await {
            Ok(streams) => {
                self.deps.movies.replace_streams(movie.id, &streams).await?;
            }
            Err(err) => {
                // Stream metadata is best effort; the hash update still
                // records the new content.
                warn!(target: "verify", movie_id = %movie.id, error = %err, "stream probe failed");
            }
        }
        self.deps
            .movies
            .update_video(movie.id, Some(&video_file), Some(&current))
            .await?;
        movie.video_hash = Some(current);
        outcome.video_changed = true;
        Ok(())
    }

    async fn reconcile_nfo(
        &self,
        movie: &Movie,
        directory: &Path,
        snapshot: &mut HashMap<String, PathBuf>,
        outcome: &mut VerifyOutcome,
    ) -> WorkflowResult<()> {
        let cast = self.deps.movies.get_cast(movie.id).await?;
        let expected = render_movie_nfo(movie, &cast)?;
        let name = nfo_name(&movie.file_base());
        let path = directory.join(&name);

        match snapshot.remove(&name) {
            Some(existing) => {
                let on_disk = std::fs::read_to_string(&existing).unwrap_or_default();
                if on_disk != expected {
                    self.recycle_file(&existing, outcome);
                    std::fs::write(&path, expected.as_bytes())?;
                    outcome.restored += 1;
                }
            }
            None => {
                std::fs::write(&path, expected.as_bytes())?;
                outcome.restored += 1;
            }
        }
        Ok(())
    }

    /// Steps 3–4: expected files from the cache registry, restore or replace.
    async fn reconcile_assets(
        &self,
        movie: &Movie,
        directory: &Path,
        snapshot: &mut HashMap<String, PathBuf>,
        outcome: &mut VerifyOutcome,
    ) -> WorkflowResult<()> {
        let entity = EntityRef::movie(movie.id);
        let base = movie.file_base();

        for kind in AssetKind::IMAGE_KINDS {
            let files = self.deps.cache_files.list_for_entity(entity, Some(kind)).await?;
            for (index, cache_file) in files.iter().enumerate() {
                let ext = Path::new(&cache_file.file_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("jpg");
                let name = image_name(&base, kind, index, ext);
                let target = directory.join(&name);

                match snapshot.remove(&name) {
                    Some(existing) => {
                        let matches = hash_file(&existing)
                            .map(|h| h == cache_file.content_hash)
                            .unwrap_or(false);
                        if !matches {
                            debug!(target: "verify", file = %name, "hash mismatch, replacing from cache");
                            self.recycle_file(&existing, outcome);
                            self.restore_from_cache(cache_file.file_path.as_ref(), &target, outcome);
                        }
                    }
                    None => {
                        self.restore_from_cache(cache_file.file_path.as_ref(), &target, outcome);
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 5: anything left in the snapshot that is neither a system file
    /// nor a conventionally-named companion gets recycled.
    fn sweep_residuals(
        &self,
        movie: &Movie,
        snapshot: &mut HashMap<String, PathBuf>,
        outcome: &mut VerifyOutcome,
    ) {
        let base = movie.file_base();
        for (name, path) in snapshot.drain() {
            if is_ignored_file(&name) {
                continue;
            }
            // Subtitles and trailers have no cache registry; leave files that
            // follow the naming convention alone.
            let is_subtitle = name.starts_with(&base) && name.ends_with(".srt");
            let is_trailer = name.starts_with(&format!("{base}-trailer"));
            if is_subtitle || is_trailer {
                continue;
            }
            debug!(target: "verify", file = %name, "recycling unauthorized file");
            self.recycle_file(&path, outcome);
        }
    }

    fn restore_from_cache(&self, cache_path: &Path, target: &Path, outcome: &mut VerifyOutcome) {
        match std::fs::copy(cache_path, target) {
            Ok(_) => outcome.restored += 1,
            Err(err) => {
                // Best effort: an unreadable cache file is logged, not fatal.
                warn!(
                    target: "verify",
                    cache = %cache_path.display(),
                    error = %err,
                    "restore from cache failed"
                );
            }
        }
    }

    fn recycle_file(&self, path: &Path, outcome: &mut VerifyOutcome) {
        match recycle(path, &self.deps.trash_root()) {
            Ok(target) => {
                debug!(target: "verify", from = %path.display(), to = %target.display(), "recycled");
                outcome.recycled += 1;
            }
            Err(err) => {
                warn!(target: "verify", path = %path.display(), error = %err, "recycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_up_priorities() {
        let mut outcome = VerifyOutcome::default();
        assert_eq!(outcome.follow_up(), VerifyFollowUp::None);
        outcome.restored = 1;
        assert_eq!(outcome.follow_up(), VerifyFollowUp::NotifyPlayers);
        outcome.video_changed = true;
        assert_eq!(outcome.follow_up(), VerifyFollowUp::Republish);
    }

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
