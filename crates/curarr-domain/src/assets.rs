// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityKind, EntityRef, Provider};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CandidateId(pub i64);

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CacheFileId(pub i64);

impl std::fmt::Display for CacheFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internal asset taxonomy. Provider image types map onto this; unmapped
/// provider types are skipped during enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Poster,
    Backdrop,
    Logo,
    Banner,
    Landscape,
    Trailer,
    /// Actor profile images; cached but never part of entity selection.
    Thumb,
}

impl AssetKind {
    pub const IMAGE_KINDS: [AssetKind; 5] = [
        AssetKind::Poster,
        AssetKind::Backdrop,
        AssetKind::Logo,
        AssetKind::Banner,
        AssetKind::Landscape,
    ];

    pub const ALL: [AssetKind; 6] = [
        AssetKind::Poster,
        AssetKind::Backdrop,
        AssetKind::Logo,
        AssetKind::Banner,
        AssetKind::Landscape,
        AssetKind::Trailer,
    ];

    /// Suffix used in Kodi sidecar filenames, e.g. `<base>-fanart.jpg`.
    pub fn kodi_suffix(self) -> &'static str {
        match self {
            Self::Poster => "poster",
            Self::Backdrop => "fanart",
            Self::Logo => "clearlogo",
            Self::Banner => "banner",
            Self::Landscape => "landscape",
            Self::Trailer => "trailer",
            Self::Thumb => "thumb",
        }
    }

    /// Map a provider-side image type string onto the internal taxonomy.
    pub fn from_provider_type(raw: &str) -> Option<Self> {
        match raw {
            "poster" | "movieposter" => Some(Self::Poster),
            "backdrop" | "moviebackground" | "fanart" => Some(Self::Backdrop),
            "logo" | "movielogo" | "hdmovielogo" | "clearlogo" => Some(Self::Logo),
            "banner" | "moviebanner" => Some(Self::Banner),
            "landscape" | "moviethumb" => Some(Self::Landscape),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poster => write!(f, "poster"),
            Self::Backdrop => write!(f, "backdrop"),
            Self::Logo => write!(f, "logo"),
            Self::Banner => write!(f, "banner"),
            Self::Landscape => write!(f, "landscape"),
            Self::Trailer => write!(f, "trailer"),
            Self::Thumb => write!(f, "thumb"),
        }
    }
}

impl std::str::FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poster" => Ok(Self::Poster),
            "backdrop" => Ok(Self::Backdrop),
            "logo" => Ok(Self::Logo),
            "banner" => Ok(Self::Banner),
            "landscape" => Ok(Self::Landscape),
            "trailer" => Ok(Self::Trailer),
            "thumb" => Ok(Self::Thumb),
            other => Err(format!("unknown asset kind: {other}")),
        }
    }
}

/// Where a cache file came from: scanned in from the library, or downloaded
/// from a provider. `local` rows are placeholders and get recycled once a
/// selection supersedes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSource {
    Local,
    Provider,
}

impl std::fmt::Display for AssetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

impl std::str::FromStr for AssetSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "provider" => Ok(Self::Provider),
            other => Err(format!("unknown asset source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectedBy {
    Auto,
    User,
}

impl std::fmt::Display for SelectedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for SelectedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "user" => Ok(Self::User),
            other => Err(format!("unknown selector: {other}")),
        }
    }
}

// ============================================================================
// Provider cache payload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEntry {
    pub source: String,
    pub value: f64,
    pub votes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderImage {
    pub provider: Provider,
    pub image_type: String,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
    pub language: Option<String>,
    pub is_hd: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderVideo {
    pub provider: Provider,
    pub url: String,
    pub name: Option<String>,
    pub site: Option<String>,
    pub video_type: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastCredit {
    pub provider: Provider,
    pub person_id: i64,
    pub name: String,
    pub role: Option<String>,
    pub sort_order: i32,
    pub profile_url: Option<String>,
}

/// Fully-merged provider response, cached with a 7-day TTL. Scalars carry
/// the winning provider in `origins`; arrays are unions tagged per item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub outline: Option<String>,
    pub tagline: Option<String>,
    pub runtime: Option<i32>,
    pub content_rating: Option<String>,
    pub premiered: Option<String>,
    pub genres: Vec<String>,
    pub studios: Vec<String>,
    pub countries: Vec<String>,
    pub ratings: Vec<RatingEntry>,
    pub collection_tmdb_id: Option<i64>,
    pub collection_name: Option<String>,
    pub collection_overview: Option<String>,
    pub cast: Vec<CastCredit>,
    pub images: Vec<ProviderImage>,
    pub videos: Vec<ProviderVideo>,
    /// Scalar field name -> provider that supplied the value.
    pub origins: std::collections::BTreeMap<String, Provider>,
}

// ============================================================================
// Candidates & cache files
// ============================================================================

/// One possible asset for an entity, keyed by (entity, kind, url).
/// Rebuilt on every enrichment run; rejected rows persist to suppress
/// re-selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCandidate {
    pub id: CandidateId,
    pub entity: EntityRef,
    pub kind: AssetKind,
    pub provider: Provider,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub content_hash: Option<String>,
    pub perceptual_hash: Option<u64>,
    pub difference_hash: Option<u64>,
    pub alpha_ratio: Option<f64>,
    pub format: Option<String>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
    pub language: Option<String>,
    pub analyzed: bool,
    pub is_downloaded: bool,
    pub is_selected: bool,
    pub is_rejected: bool,
    pub score: Option<i32>,
    pub selected_at: Option<DateTime<Utc>>,
    pub selected_by: Option<SelectedBy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A materialized copy of an accepted asset on local disk, keyed by content
/// hash within its entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub id: CacheFileId,
    pub entity: EntityRef,
    pub kind: AssetKind,
    pub file_path: String,
    pub file_size: i64,
    pub content_hash: String,
    pub perceptual_hash: Option<u64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub source: AssetSource,
    pub source_url: Option<String>,
    pub provider: Option<Provider>,
    pub created_at: DateTime<Utc>,
}

/// Per-(entity, provider) freshness bookkeeping driven by the provider's
/// "changes since" endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshLogEntry {
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub provider: Provider,
    pub last_checked: DateTime<Utc>,
    pub last_modified: Option<DateTime<Utc>>,
    pub needs_refresh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_mapping_covers_both_providers() {
        assert_eq!(
            AssetKind::from_provider_type("movieposter"),
            Some(AssetKind::Poster)
        );
        assert_eq!(
            AssetKind::from_provider_type("backdrop"),
            Some(AssetKind::Backdrop)
        );
        assert_eq!(
            AssetKind::from_provider_type("hdmovielogo"),
            Some(AssetKind::Logo)
        );
        assert_eq!(AssetKind::from_provider_type("characterart"), None);
    }

    #[test]
    fn asset_kind_round_trips_through_str() {
        for kind in AssetKind::ALL {
            let parsed: AssetKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn kodi_suffix_uses_fanart_for_backdrops() {
        assert_eq!(AssetKind::Backdrop.kodi_suffix(), "fanart");
        assert_eq!(AssetKind::Logo.kodi_suffix(), "clearlogo");
    }
}
