// SPDX-License-Identifier: GPL-3.0-or-later
//! Candidate scoring. A pure function of the candidate's analyzed properties
//! and the user's preferred language, so re-scoring is always reproducible.

use curarr_domain::{AssetCandidate, AssetKind, Provider};

const POSTER_IDEAL_PIXELS: f64 = 6.0e6;
const BACKDROP_IDEAL_PIXELS: f64 = 2.07e6;
const DEFAULT_IDEAL_PIXELS: f64 = 1.0e6;

pub fn score_candidate(candidate: &AssetCandidate, preferred_language: &str) -> i32 {
    let resolution = resolution_score(candidate);
    let aspect = aspect_score(candidate);
    let language = language_score(candidate.language.as_deref(), preferred_language);
    let votes = vote_score(candidate.vote_average, candidate.vote_count);
    let provider = provider_score(candidate.provider);

    let total = resolution + aspect + language + votes + provider;
    total.round().clamp(0.0, 100.0) as i32
}

fn ideal_pixels(kind: AssetKind) -> f64 {
    match kind {
        AssetKind::Poster => POSTER_IDEAL_PIXELS,
        AssetKind::Backdrop => BACKDROP_IDEAL_PIXELS,
        _ => DEFAULT_IDEAL_PIXELS,
    }
}

fn resolution_score(candidate: &AssetCandidate) -> f64 {
    let (Some(width), Some(height)) = (candidate.width, candidate.height) else {
        return 0.0;
    };
    let pixels = width as f64 * height as f64;
    (pixels / ideal_pixels(candidate.kind)).min(1.5) * 30.0
}

fn ideal_ratio(kind: AssetKind, observed: f64) -> f64 {
    match kind {
        AssetKind::Poster => 2.0 / 3.0,
        AssetKind::Backdrop => 16.0 / 9.0,
        AssetKind::Logo => 4.0,
        _ => observed,
    }
}

fn aspect_score(candidate: &AssetCandidate) -> f64 {
    let (Some(width), Some(height)) = (candidate.width, candidate.height) else {
        return 0.0;
    };
    if height == 0 {
        return 0.0;
    }
    let ratio = width as f64 / height as f64;
    let ideal = ideal_ratio(candidate.kind, ratio);
    (20.0 - 100.0 * (ratio - ideal).abs()).max(0.0)
}

fn language_score(language: Option<&str>, preferred: &str) -> f64 {
    match language {
        Some(lang) if lang.eq_ignore_ascii_case(preferred) => 20.0,
        Some(lang) if lang.eq_ignore_ascii_case("en") => 15.0,
        // Language-neutral art fits every locale.
        None => 18.0,
        Some(_) => 5.0,
    }
}

fn vote_score(vote_average: Option<f64>, vote_count: Option<i64>) -> f64 {
    let average = vote_average.unwrap_or(0.0);
    let count = vote_count.unwrap_or(0) as f64;
    (average / 10.0) * (count / 50.0).min(1.0) * 20.0
}

fn provider_score(provider: Provider) -> f64 {
    match provider {
        Provider::Tmdb => 10.0,
        Provider::FanartTv => 9.0,
        Provider::Tvdb => 8.0,
    }
}
