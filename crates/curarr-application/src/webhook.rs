// SPDX-License-Identifier: GPL-3.0-or-later
//! Webhook intake: provider-agnostic payloads from radarr/sonarr/lidarr.
//! Only `Download` events start a chain; paths are mapped before library
//! resolution.

use curarr_config::AppConfig;
use curarr_domain::{
    resolve_library, Library, LibraryId, WebhookEventType, WebhookPayload,
};
use tracing::{debug, info};

use crate::deps::Deps;
use crate::errors::{WorkflowError, WorkflowResult};

/// Rewrite a remote path using the configured prefix mappings. The longest
/// matching prefix wins; unmapped paths pass through.
pub fn map_path(config: &AppConfig, path: &str) -> String {
    let mut best: Option<(&str, &str)> = None;
    for mapping in &config.webhook.path_mappings {
        if path.starts_with(&mapping.from)
            && best.map(|(from, _)| mapping.from.len() > from.len()).unwrap_or(true)
        {
            best = Some((&mapping.from, &mapping.to));
        }
    }
    match best {
        Some((from, to)) => format!("{to}{}", &path[from.len()..]),
        None => path.to_string(),
    }
}

/// What the webhook handler decided to do with a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookDecision {
    /// Start the scan chain for this directory in this library.
    ScanMovie {
        library_id: LibraryId,
        directory: String,
    },
    /// Event type carries no work (Grab/Rename/Test).
    Ignored,
}

pub async fn decide(deps: &Deps, payload: &WebhookPayload) -> WorkflowResult<WebhookDecision> {
    if payload.event_type != WebhookEventType::Download {
        debug!(target: "webhook", source = %payload.source, event = ?payload.event_type, "ignoring non-download event");
        return Ok(WebhookDecision::Ignored);
    }

    let Some(movie) = payload.movie.as_ref() else {
        if payload.series.is_some() {
            // No series chain exists yet; acknowledge without failing so the
            // sender does not retry forever.
            debug!(target: "webhook", source = %payload.source, "series download ignored");
            return Ok(WebhookDecision::Ignored);
        }
        return Err(WorkflowError::validation(
            "download webhook without a movie body",
        ));
    };

    let raw_path = movie
        .folder_path
        .clone()
        .or_else(|| movie.path.clone())
        .ok_or_else(|| WorkflowError::validation("movie webhook without a path"))?;
    let directory = map_path(&deps.config, &raw_path);

    let libraries = deps.libraries.list_enabled().await?;
    let library = resolve_movie_library(&libraries, &directory).ok_or_else(|| {
        WorkflowError::validation(format!("no library owns path: {directory}"))
    })?;

    info!(
        target: "webhook",
        source = %payload.source,
        movie = %movie.title,
        library_id = %library.id,
        directory = %directory,
        "download accepted"
    );
    Ok(WebhookDecision::ScanMovie {
        library_id: library.id,
        directory,
    })
}

fn resolve_movie_library<'a>(libraries: &'a [Library], path: &str) -> Option<&'a Library> {
    resolve_library(libraries, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use curarr_config::PathMapping;

    #[test]
    fn longest_mapping_prefix_wins() {
        let mut config = AppConfig::default();
        config.webhook.path_mappings = vec![
            PathMapping {
                from: "/downloads".to_string(),
                to: "/mnt/downloads".to_string(),
            },
            PathMapping {
                from: "/downloads/movies".to_string(),
                to: "/media/movies".to_string(),
            },
        ];

        assert_eq!(
            map_path(&config, "/downloads/movies/Inception (2010)"),
            "/media/movies/Inception (2010)"
        );
        assert_eq!(
            map_path(&config, "/downloads/other/file"),
            "/mnt/downloads/other/file"
        );
        assert_eq!(map_path(&config, "/unrelated"), "/unrelated");
    }
}
