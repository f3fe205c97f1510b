// SPDX-License-Identifier: GPL-3.0-or-later
pub mod pipeline;
pub mod score;

pub use pipeline::{EnrichmentOptions, EnrichmentPipeline, PhaseCounts};
pub use score::score_candidate;
