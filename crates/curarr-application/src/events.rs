// SPDX-License-Identifier: GPL-3.0-or-later
//! Typed constructors for every event the engine publishes. Each produces an
//! envelope carrying `type` and an ISO-8601 timestamp.

use curarr_domain::{DomainEvent, JobId, JobQueueStats, JobState, LibraryId, MovieId};
use serde_json::json;

pub fn enrichment_started(movie_id: MovieId) -> DomainEvent {
    DomainEvent::new("enrichment.started", json!({ "movieId": movie_id }))
}

pub fn enrichment_phase_complete(movie_id: MovieId, phase: u8, counts: serde_json::Value) -> DomainEvent {
    DomainEvent::new(
        "enrichment.phase.complete",
        json!({ "movieId": movie_id, "phase": phase, "counts": counts }),
    )
}

pub fn enrichment_complete(movie_id: MovieId, selected: usize) -> DomainEvent {
    DomainEvent::new(
        "enrichment.complete",
        json!({ "movieId": movie_id, "selected": selected }),
    )
}

pub fn enrichment_failed(movie_id: MovieId, error: &str) -> DomainEvent {
    DomainEvent::new(
        "enrichment.failed",
        json!({ "movieId": movie_id, "error": error }),
    )
}

pub fn bulk_progress(processed: u64, total: u64) -> DomainEvent {
    DomainEvent::new(
        "bulk.progress",
        json!({ "processed": processed, "total": total }),
    )
}

pub fn bulk_rate_limit(processed: u64, stop_reason: &str) -> DomainEvent {
    DomainEvent::new(
        "bulk.rate_limit",
        json!({ "processed": processed, "stopReason": stop_reason }),
    )
}

pub fn bulk_complete(stats: &crate::bulk::BulkRunStats) -> DomainEvent {
    DomainEvent::new(
        "bulk.complete",
        json!({
            "total": stats.total,
            "processed": stats.processed,
            "updated": stats.updated,
            "failed": stats.failed,
            "skipped": stats.skipped,
            "stopped": stats.stopped,
            "stopReason": stats.stop_reason,
        }),
    )
}

pub fn scan_status(library_id: LibraryId, state: &str, found: usize) -> DomainEvent {
    DomainEvent::new(
        "scanStatus",
        json!({ "libraryId": library_id, "state": state, "found": found }),
    )
}

/// `action` is one of added/updated/deleted.
pub fn movies_changed(movie_id: MovieId, action: &str) -> DomainEvent {
    DomainEvent::new(
        "moviesChanged",
        json!({ "movieId": movie_id, "action": action }),
    )
}

pub fn library_changed(library_id: LibraryId) -> DomainEvent {
    DomainEvent::new("libraryChanged", json!({ "libraryId": library_id }))
}

pub fn entity_published(movie_id: MovieId, files: usize) -> DomainEvent {
    DomainEvent::new(
        "entity.published",
        json!({ "movieId": movie_id, "files": files }),
    )
}

pub fn job_status(job_id: JobId, state: JobState, error: Option<&str>) -> DomainEvent {
    DomainEvent::new(
        "jobStatus",
        json!({ "jobId": job_id, "status": state, "error": error }),
    )
}

pub fn job_queue_stats(stats: &JobQueueStats) -> DomainEvent {
    DomainEvent::new("jobQueueStats", serde_json::to_value(stats).unwrap_or_default())
}

pub fn player_status(player: &str, library_id: LibraryId, status: &str) -> DomainEvent {
    DomainEvent::new(
        "playerStatus",
        json!({ "player": player, "libraryId": library_id, "status": status }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_envelope_shape() {
        let evt = job_status(JobId(9), JobState::Failed, Some("boom"));
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["type"], "jobStatus");
        assert_eq!(value["jobId"], 9);
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "boom");
    }

    #[test]
    fn movies_changed_carries_action() {
        let evt = movies_changed(MovieId(3), "added");
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["action"], "added");
    }
}
