// SPDX-License-Identifier: GPL-3.0-or-later
//! Hardened NFO ingestion: multiple heterogeneous sidecar files go in, one
//! merged identifier-plus-metadata document comes out. XML carrying DTD or
//! entity declarations is rejected outright; malformed XML degrades to regex
//! id extraction; bare URL files are scanned line by line.

use chrono::{DateTime, Utc};
use curarr_domain::RatingEntry;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// One candidate sidecar handed to the parser. Content is read up front so
/// parsing itself is pure.
#[derive(Debug, Clone)]
pub struct NfoFile {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NfoActor {
    pub name: String,
    pub role: Option<String>,
    pub order: Option<i32>,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NfoCollection {
    pub name: String,
    pub overview: Option<String>,
    pub tmdb_id: Option<i64>,
}

/// Structured, language-agnostic result of one file (and of the final merge).
#[derive(Debug, Clone, Default)]
pub struct NfoDocument {
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub sort_title: Option<String>,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub outline: Option<String>,
    pub tagline: Option<String>,
    pub runtime: Option<i32>,
    pub content_rating: Option<String>,
    pub premiered: Option<String>,
    pub genres: Vec<String>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub studios: Vec<String>,
    pub countries: Vec<String>,
    pub tags: Vec<String>,
    pub actors: Vec<NfoActor>,
    pub ratings: Vec<RatingEntry>,
    pub collection: Option<NfoCollection>,
}

impl NfoDocument {
    pub fn has_any_id(&self) -> bool {
        self.tmdb_id.is_some() || self.imdb_id.is_some() || self.tvdb_id.is_some()
    }
}

#[derive(Debug)]
pub enum NfoParseOutcome {
    Valid {
        document: NfoDocument,
        warnings: Vec<String>,
    },
    Ambiguous {
        message: String,
    },
    Invalid {
        message: String,
    },
}

/// Priority: exact `<videoBasename>.nfo` = 30, `movie.nfo`/`movie.txt` = 20,
/// any other `.nfo`/`.txt` = 10.
fn file_priority(name: &str, video_basename: Option<&str>) -> u8 {
    let lower = name.to_lowercase();
    if let Some(base) = video_basename {
        if lower == format!("{}.nfo", base.to_lowercase()) {
            return 30;
        }
    }
    if lower == "movie.nfo" || lower == "movie.txt" {
        return 20;
    }
    10
}

/// Read every `.nfo`/`.txt` in a directory, newest metadata included.
pub fn collect_nfo_files(directory: &Path) -> std::io::Result<Vec<NfoFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let lower = name.to_lowercase();
        if !(lower.ends_with(".nfo") || lower.ends_with(".txt")) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let content = std::fs::read_to_string(entry.path()).unwrap_or_default();
        files.push(NfoFile {
            name,
            modified,
            content,
        });
    }
    Ok(files)
}

/// Parse and merge a set of NFO files for one movie directory.
pub fn parse_nfo_files(files: Vec<NfoFile>, video_basename: Option<&str>) -> NfoParseOutcome {
    if files.is_empty() {
        return NfoParseOutcome::Invalid {
            message: "no NFO files found".to_string(),
        };
    }

    let mut parsed: Vec<(u8, NfoFile, NfoDocument)> = Vec::new();
    let mut warnings = Vec::new();
    for file in files {
        let priority = file_priority(&file.name, video_basename);
        match parse_single(&file) {
            Ok(document) => parsed.push((priority, file, document)),
            Err(reason) => {
                warnings.push(format!("skipped {}: {}", file.name, reason));
            }
        }
    }

    if parsed.is_empty() {
        return NfoParseOutcome::Invalid {
            message: format!("no parsable NFO files ({})", warnings.join("; ")),
        };
    }

    // Priority descending, then modification time descending.
    parsed.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.modified.cmp(&a.1.modified)));

    // Conflicting provider ids: the highest-priority file wins, the others
    // are discarded with a warning. Irreconcilable ids at the same top
    // priority make the whole directory ambiguous.
    let top_priority = parsed[0].0;
    let winner_ids = (
        parsed[0].2.tmdb_id,
        parsed[0].2.imdb_id.clone(),
        parsed[0].2.tvdb_id,
    );
    let mut kept: Vec<(u8, NfoFile, NfoDocument)> = Vec::new();
    for entry in parsed {
        let conflicting = ids_conflict(&winner_ids, &entry.2);
        if conflicting && entry.0 == top_priority && !kept.is_empty() {
            return NfoParseOutcome::Ambiguous {
                message: format!(
                    "conflicting identifiers at equal priority: {} disagrees with {}",
                    entry.1.name, kept[0].1.name
                ),
            };
        }
        if conflicting {
            warn!(
                target: "nfo",
                file = %entry.1.name,
                "discarding NFO with conflicting identifiers"
            );
            warnings.push(format!(
                "discarded {} (conflicting identifiers)",
                entry.1.name
            ));
            continue;
        }
        kept.push(entry);
    }

    let documents: Vec<NfoDocument> = kept.into_iter().map(|(_, _, d)| d).collect();
    let merged = merge_documents(documents);

    if !merged.has_any_id() {
        return NfoParseOutcome::Invalid {
            message: "no provider identifier in any NFO file".to_string(),
        };
    }

    debug!(
        target: "nfo",
        tmdb_id = ?merged.tmdb_id,
        imdb_id = ?merged.imdb_id,
        warnings = warnings.len(),
        "NFO files merged"
    );
    NfoParseOutcome::Valid {
        document: merged,
        warnings,
    }
}

fn ids_conflict(
    winner: &(Option<i64>, Option<String>, Option<i64>),
    other: &NfoDocument,
) -> bool {
    let tmdb = matches!((winner.0, other.tmdb_id), (Some(a), Some(b)) if a != b);
    let imdb = matches!(
        (winner.1.as_deref(), other.imdb_id.as_deref()),
        (Some(a), Some(b)) if a != b
    );
    let tvdb = matches!((winner.2, other.tvdb_id), (Some(a), Some(b)) if a != b);
    tmdb || imdb || tvdb
}

// ----------------------------------------------------------------------------
// Single-file parsing
// ----------------------------------------------------------------------------

fn parse_single(file: &NfoFile) -> Result<NfoDocument, String> {
    let trimmed = file.content.trim_start();
    if trimmed.is_empty() {
        return Err("empty file".to_string());
    }

    if looks_like_xml(trimmed) {
        // External-entity and doctype declarations are an attack surface,
        // not a metadata source.
        let upper = file.content.to_uppercase();
        if upper.contains("<!ENTITY") || upper.contains("<!DOCTYPE") {
            return Err("XML contains entity or doctype declaration".to_string());
        }
        match parse_xml(&file.content) {
            Ok(document) => Ok(document),
            Err(err) => {
                debug!(target: "nfo", file = %file.name, error = %err, "malformed XML, falling back to regex ids");
                let document = extract_ids_regex(&file.content);
                if document.has_any_id() {
                    Ok(document)
                } else {
                    Err(format!("malformed XML without extractable ids: {err}"))
                }
            }
        }
    } else {
        let document = scan_url_lines(&file.content);
        if document.has_any_id() {
            Ok(document)
        } else {
            Err("no recognizable provider URL".to_string())
        }
    }
}

fn looks_like_xml(trimmed: &str) -> bool {
    trimmed.starts_with('<')
}

fn url_regexes() -> &'static [Regex; 4] {
    static REGEXES: OnceLock<[Regex; 4]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        [
            Regex::new(r"themoviedb\.org/(?:movie|tv)/(\d+)").expect("tmdb url regex"),
            Regex::new(r"imdb\.com/title/(tt\d+)").expect("imdb url regex"),
            Regex::new(r"thetvdb\.com/series/(\d+)").expect("tvdb url regex"),
            Regex::new(r"thetvdb\.com/[^\s]*\?id=(\d+)").expect("tvdb query regex"),
        ]
    })
}

/// URL-text NFO: one provider link per line, scanned in order.
fn scan_url_lines(content: &str) -> NfoDocument {
    let [tmdb_re, imdb_re, tvdb_re, tvdb_query_re] = url_regexes();
    let mut document = NfoDocument::default();
    for line in content.lines() {
        if document.tmdb_id.is_none() {
            if let Some(cap) = tmdb_re.captures(line) {
                document.tmdb_id = cap[1].parse().ok();
            }
        }
        if document.imdb_id.is_none() {
            if let Some(cap) = imdb_re.captures(line) {
                document.imdb_id = Some(cap[1].to_string());
            }
        }
        if document.tvdb_id.is_none() {
            if let Some(cap) = tvdb_re.captures(line) {
                document.tvdb_id = cap[1].parse().ok();
            } else if let Some(cap) = tvdb_query_re.captures(line) {
                document.tvdb_id = cap[1].parse().ok();
            }
        }
    }
    document
}

/// Last-resort extraction from XML too broken to parse.
fn extract_ids_regex(content: &str) -> NfoDocument {
    static TMDB: OnceLock<Regex> = OnceLock::new();
    static IMDB: OnceLock<Regex> = OnceLock::new();
    static UNIQUE: OnceLock<Regex> = OnceLock::new();
    let tmdb = TMDB.get_or_init(|| Regex::new(r"<tmdbid>\s*(\d+)\s*</tmdbid>").expect("tmdbid regex"));
    let imdb =
        IMDB.get_or_init(|| Regex::new(r"<imdbid>\s*(tt\d+)\s*</imdbid>").expect("imdbid regex"));
    let unique = UNIQUE.get_or_init(|| {
        Regex::new(r#"<uniqueid[^>]*type="(\w+)"[^>]*>\s*([^<\s]+)\s*</uniqueid>"#)
            .expect("uniqueid regex")
    });

    let mut document = NfoDocument::default();
    if let Some(cap) = tmdb.captures(content) {
        document.tmdb_id = cap[1].parse().ok();
    }
    if let Some(cap) = imdb.captures(content) {
        document.imdb_id = Some(cap[1].to_string());
    }
    for cap in unique.captures_iter(content) {
        match &cap[1] {
            "tmdb" => document.tmdb_id = document.tmdb_id.or_else(|| cap[2].parse().ok()),
            "imdb" => {
                if document.imdb_id.is_none() {
                    document.imdb_id = Some(cap[2].to_string());
                }
            }
            "tvdb" => document.tvdb_id = document.tvdb_id.or_else(|| cap[2].parse().ok()),
            _ => {}
        }
    }
    document
}

/// Pull-parse a Kodi movie/tvshow document.
fn parse_xml(content: &str) -> Result<NfoDocument, String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut document = NfoDocument::default();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current_actor: Option<NfoActor> = None;
    let mut current_collection: Option<NfoCollection> = None;
    let mut current_rating: Option<(String, Option<f64>, Option<i64>)> = None;
    let mut uniqueid_type: Option<String> = None;
    let mut uniqueid_default = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_lowercase();
                match name.as_str() {
                    "actor" => current_actor = Some(NfoActor::default()),
                    "set" => current_collection = Some(NfoCollection::default()),
                    "rating" => {
                        let mut source = "default".to_string();
                        for attr in start.attributes().flatten() {
                            if attr.key.as_ref() == b"name" {
                                source = String::from_utf8_lossy(&attr.value).to_string();
                            }
                        }
                        current_rating = Some((source, None, None));
                    }
                    "uniqueid" => {
                        uniqueid_type = None;
                        uniqueid_default = false;
                        for attr in start.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"type" => {
                                    uniqueid_type =
                                        Some(String::from_utf8_lossy(&attr.value).to_string())
                                }
                                b"default" => {
                                    uniqueid_default = &*attr.value == b"true";
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Text(t)) => {
                text = t
                    .unescape()
                    .map_err(|e| e.to_string())?
                    .trim()
                    .to_string();
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).to_lowercase();
                apply_element(
                    &mut document,
                    &path,
                    &name,
                    &text,
                    &mut current_actor,
                    &mut current_collection,
                    &mut current_rating,
                    &uniqueid_type,
                    uniqueid_default,
                );
                path.pop();
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(err.to_string()),
        }
    }

    if path.is_empty() {
        Ok(document)
    } else {
        Err("unbalanced document".to_string())
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_element(
    document: &mut NfoDocument,
    path: &[String],
    name: &str,
    text: &str,
    current_actor: &mut Option<NfoActor>,
    current_collection: &mut Option<NfoCollection>,
    current_rating: &mut Option<(String, Option<f64>, Option<i64>)>,
    uniqueid_type: &Option<String>,
    _uniqueid_default: bool,
) {
    let depth = path.len();
    let in_actor = path.iter().any(|p| p == "actor");
    let in_set = path.iter().any(|p| p == "set");
    let in_rating = path.iter().any(|p| p == "rating");

    match name {
        // Actor children first; several element names collide with movie
        // scalars (`name`, `order`).
        "name" if in_actor => {
            if let Some(actor) = current_actor.as_mut() {
                actor.name = text.to_string();
            }
        }
        "role" if in_actor => {
            if let Some(actor) = current_actor.as_mut() {
                actor.role = non_empty(text);
            }
        }
        "order" if in_actor => {
            if let Some(actor) = current_actor.as_mut() {
                actor.order = text.parse().ok();
            }
        }
        "thumb" if in_actor => {
            if let Some(actor) = current_actor.as_mut() {
                actor.thumb = non_empty(text);
            }
        }
        "actor" => {
            if let Some(actor) = current_actor.take() {
                if !actor.name.is_empty() {
                    document.actors.push(actor);
                }
            }
        }

        "name" if in_set => {
            if let Some(set) = current_collection.as_mut() {
                set.name = text.to_string();
            }
        }
        "overview" if in_set => {
            if let Some(set) = current_collection.as_mut() {
                set.overview = non_empty(text);
            }
        }
        "tmdbcolid" if in_set => {
            if let Some(set) = current_collection.as_mut() {
                set.tmdb_id = text.parse().ok();
            }
        }
        "set" => {
            if let Some(set) = current_collection.take() {
                if !set.name.is_empty() {
                    document.collection = Some(set);
                }
            }
        }

        "value" if in_rating => {
            if let Some(rating) = current_rating.as_mut() {
                rating.1 = text.parse().ok();
            }
        }
        "votes" if in_rating => {
            if let Some(rating) = current_rating.as_mut() {
                rating.2 = text.parse().ok();
            }
        }
        "rating" if depth >= 2 => {
            if let Some((source, value, votes)) = current_rating.take() {
                if let Some(value) = value {
                    document.ratings.push(RatingEntry {
                        source,
                        value,
                        votes: votes.unwrap_or(0),
                    });
                }
            }
        }

        "title" if depth == 2 => document.title = non_empty(text),
        "originaltitle" => document.original_title = non_empty(text),
        "sorttitle" => document.sort_title = non_empty(text),
        "year" => document.year = text.parse().ok(),
        "plot" => document.plot = non_empty(text),
        "outline" => document.outline = non_empty(text),
        "tagline" => document.tagline = non_empty(text),
        "runtime" => document.runtime = text.parse().ok(),
        "mpaa" => document.content_rating = non_empty(text),
        "premiered" => document.premiered = non_empty(text),
        "genre" => push_unique(&mut document.genres, text),
        "director" => push_unique(&mut document.directors, text),
        "credits" => push_unique(&mut document.writers, text),
        "studio" => push_unique(&mut document.studios, text),
        "country" => push_unique(&mut document.countries, text),
        "tag" => push_unique(&mut document.tags, text),
        "tmdbid" => document.tmdb_id = document.tmdb_id.or_else(|| text.parse().ok()),
        "imdbid" => {
            if document.imdb_id.is_none() {
                document.imdb_id = non_empty(text);
            }
        }
        "uniqueid" => match uniqueid_type.as_deref() {
            Some("tmdb") => document.tmdb_id = document.tmdb_id.or_else(|| text.parse().ok()),
            Some("imdb") => {
                if document.imdb_id.is_none() {
                    document.imdb_id = non_empty(text);
                }
            }
            Some("tvdb") => document.tvdb_id = document.tvdb_id.or_else(|| text.parse().ok()),
            _ => {}
        },
        _ => {}
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn push_unique(list: &mut Vec<String>, text: &str) {
    if !text.is_empty() && !list.iter().any(|existing| existing == text) {
        list.push(text.to_string());
    }
}

// ----------------------------------------------------------------------------
// Cross-file merge
// ----------------------------------------------------------------------------

/// Documents arrive ordered winner-first. Scalars come from the winner,
/// plot/outline take the longest across files, arrays union, actors key by
/// name, ratings key by source keeping the entry with the most votes.
fn merge_documents(documents: Vec<NfoDocument>) -> NfoDocument {
    let mut iter = documents.into_iter();
    let mut merged = match iter.next() {
        Some(first) => first,
        None => return NfoDocument::default(),
    };

    for other in iter {
        merged.tmdb_id = merged.tmdb_id.or(other.tmdb_id);
        merged.imdb_id = merged.imdb_id.or(other.imdb_id);
        merged.tvdb_id = merged.tvdb_id.or(other.tvdb_id);
        merged.title = merged.title.or(other.title);
        merged.original_title = merged.original_title.or(other.original_title);
        merged.sort_title = merged.sort_title.or(other.sort_title);
        merged.year = merged.year.or(other.year);
        merged.plot = longest(merged.plot.take(), other.plot);
        merged.outline = longest(merged.outline.take(), other.outline);
        merged.tagline = merged.tagline.or(other.tagline);
        merged.runtime = merged.runtime.or(other.runtime);
        merged.content_rating = merged.content_rating.or(other.content_rating);
        merged.premiered = merged.premiered.or(other.premiered);

        for value in other.genres {
            push_unique(&mut merged.genres, &value);
        }
        for value in other.directors {
            push_unique(&mut merged.directors, &value);
        }
        for value in other.writers {
            push_unique(&mut merged.writers, &value);
        }
        for value in other.studios {
            push_unique(&mut merged.studios, &value);
        }
        for value in other.countries {
            push_unique(&mut merged.countries, &value);
        }
        for value in other.tags {
            push_unique(&mut merged.tags, &value);
        }

        for actor in other.actors {
            if !merged.actors.iter().any(|a| a.name == actor.name) {
                merged.actors.push(actor);
            }
        }

        for rating in other.ratings {
            match merged.ratings.iter_mut().find(|r| r.source == rating.source) {
                Some(existing) => {
                    if rating.votes > existing.votes {
                        *existing = rating;
                    }
                }
                None => merged.ratings.push(rating),
            }
        }

        merged.collection = match (merged.collection.take(), other.collection) {
            (Some(a), Some(b)) => {
                // Prefer the entry that carries an overview.
                if a.overview.is_none() && b.overview.is_some() {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (a, b) => a.or(b),
        };
    }

    merged
        .actors
        .sort_by_key(|actor| actor.order.unwrap_or(i32::MAX));
    merged
}

fn longest(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.len() > a.len() { b } else { a }),
        (a, b) => a.or(b),
    }
}
