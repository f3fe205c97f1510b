// SPDX-License-Identifier: GPL-3.0-or-later
pub mod bulk;
pub mod deps;
pub mod enrichment;
pub mod errors;
pub mod events;
pub mod naming;
pub mod nfo;
pub mod orchestrator;
pub mod publish;
pub mod scan;
pub mod verify;
pub mod webhook;

pub use bulk::{BulkController, BulkRunStats};
pub use deps::{Deps, FfprobeProber, LoggingNotifier, PlayerNotifier, StreamProber};
pub use enrichment::{EnrichmentOptions, EnrichmentPipeline};
pub use errors::{ErrorKind, WorkflowError, WorkflowResult};
pub use nfo::{parse_nfo_files, render_movie_nfo, write_movie_nfo, NfoParseOutcome};
pub use orchestrator::{fetch_movie_metadata, FetchOptions, FetchOutcome, FetchSource};
pub use publish::Publisher;
pub use scan::ScanService;
pub use verify::{Verifier, VerifyFollowUp, VerifyOutcome};
pub use webhook::{decide as decide_webhook, map_path, WebhookDecision};
