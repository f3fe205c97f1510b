// SPDX-License-Identifier: GPL-3.0-or-later
//! Publishing: project the accepted cache set into the library directory
//! under Kodi naming, regenerate the NFO, and tell the world.

use curarr_domain::{AssetKind, EntityRef, MovieId};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::deps::Deps;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::events;
use crate::naming::{image_name, nfo_name};
use crate::nfo::writer::write_movie_nfo;

pub struct Publisher<'a> {
    deps: &'a Deps,
}

#[derive(Debug, Default)]
pub struct PublishOutcome {
    pub files_written: usize,
}

impl<'a> Publisher<'a> {
    pub fn new(deps: &'a Deps) -> Self {
        Self { deps }
    }

    pub async fn publish_movie(&self, movie_id: MovieId) -> WorkflowResult<PublishOutcome> {
        let movie = self
            .deps
            .movies
            .get_by_id(movie_id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;
        let directory = PathBuf::from(&movie.directory);
        std::fs::create_dir_all(&directory)?;

        let mut outcome = PublishOutcome::default();
        let entity = EntityRef::movie(movie_id);
        let base = movie.file_base();

        // The cache registry for the entity is exactly the accepted set after
        // phase 5; iterating it in row order keeps names aligned with what
        // the verifier expects.
        for kind in AssetKind::IMAGE_KINDS {
            let files = self.deps.cache_files.list_for_entity(entity, Some(kind)).await?;
            for (index, cache_file) in files.iter().enumerate() {
                if !Path::new(&cache_file.file_path).is_file() {
                    debug!(target: "publish", path = %cache_file.file_path, "cache copy missing, skipping");
                    continue;
                }
                let ext = Path::new(&cache_file.file_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("jpg");
                let target = directory.join(image_name(&base, kind, index, ext));
                std::fs::copy(&cache_file.file_path, &target)?;
                outcome.files_written += 1;
            }
        }

        let cast = self.deps.movies.get_cast(movie_id).await?;
        write_movie_nfo(&directory.join(nfo_name(&base)), &movie, &cast)?;
        outcome.files_written += 1;

        self.deps
            .hub
            .publish(events::entity_published(movie_id, outcome.files_written));
        self.deps
            .hub
            .publish(events::movies_changed(movie_id, "updated"));
        info!(
            target: "publish",
            movie_id = %movie_id,
            files = outcome.files_written,
            "movie published"
        );
        Ok(outcome)
    }
}
