// SPDX-License-Identifier: GPL-3.0-or-later
//! Deterministic Kodi NFO serialization. Element order is fixed so repeated
//! writes of the same entity are byte-identical, and the file lands via
//! write-to-temp plus rename.

use curarr_domain::{CastMember, Movie};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::errors::{WorkflowError, WorkflowResult};

/// Render the canonical movie NFO document.
///
/// `uniqueid` elements come first with the primary provider marked
/// `default="true"` (TMDB over IMDB for movies), then scalars in fixed
/// order, then arrays in database order (actors by sort order).
pub fn render_movie_nfo(movie: &Movie, cast: &[CastMember]) -> WorkflowResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("movie")))
        .map_err(xml_err)?;

    if let Some(tmdb_id) = movie.tmdb_id {
        write_uniqueid(&mut writer, "tmdb", &tmdb_id.to_string(), true)?;
    }
    if let Some(imdb_id) = &movie.imdb_id {
        write_uniqueid(&mut writer, "imdb", imdb_id, movie.tmdb_id.is_none())?;
    }

    write_text(&mut writer, "title", &movie.title)?;
    write_opt(&mut writer, "originaltitle", movie.original_title.as_deref())?;
    write_opt(&mut writer, "sorttitle", movie.sort_title.as_deref())?;
    write_opt_num(&mut writer, "year", movie.year)?;
    write_opt(&mut writer, "plot", movie.plot.as_deref())?;
    write_opt(&mut writer, "outline", movie.outline.as_deref())?;
    write_opt(&mut writer, "tagline", movie.tagline.as_deref())?;
    write_opt_num(&mut writer, "runtime", movie.runtime)?;
    write_opt(&mut writer, "mpaa", movie.content_rating.as_deref())?;
    write_opt(&mut writer, "premiered", movie.premiered.as_deref())?;

    if !movie.ratings.is_empty() {
        writer
            .write_event(Event::Start(BytesStart::new("ratings")))
            .map_err(xml_err)?;
        for rating in &movie.ratings {
            let mut start = BytesStart::new("rating");
            start.push_attribute(("name", rating.source.as_str()));
            start.push_attribute(("max", "10"));
            writer.write_event(Event::Start(start)).map_err(xml_err)?;
            write_text(&mut writer, "value", &format!("{:.1}", rating.value))?;
            write_text(&mut writer, "votes", &rating.votes.to_string())?;
            writer
                .write_event(Event::End(BytesEnd::new("rating")))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("ratings")))
            .map_err(xml_err)?;
    }

    for genre in &movie.genres {
        write_text(&mut writer, "genre", genre)?;
    }
    for director in &movie.directors {
        write_text(&mut writer, "director", director)?;
    }
    for writer_name in &movie.writers {
        write_text(&mut writer, "credits", writer_name)?;
    }
    for studio in &movie.studios {
        write_text(&mut writer, "studio", studio)?;
    }
    for country in &movie.countries {
        write_text(&mut writer, "country", country)?;
    }
    for tag in &movie.tags {
        write_text(&mut writer, "tag", tag)?;
    }

    if let Some(collection) = &movie.collection {
        writer
            .write_event(Event::Start(BytesStart::new("set")))
            .map_err(xml_err)?;
        write_text(&mut writer, "name", &collection.name)?;
        write_opt(&mut writer, "overview", collection.overview.as_deref())?;
        writer
            .write_event(Event::End(BytesEnd::new("set")))
            .map_err(xml_err)?;
    }

    for member in cast {
        writer
            .write_event(Event::Start(BytesStart::new("actor")))
            .map_err(xml_err)?;
        write_text(&mut writer, "name", &member.name)?;
        write_opt(&mut writer, "role", member.role.as_deref())?;
        write_text(&mut writer, "order", &member.sort_order.to_string())?;
        write_opt(&mut writer, "thumb", member.thumb_url.as_deref())?;
        writer
            .write_event(Event::End(BytesEnd::new("actor")))
            .map_err(xml_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("movie")))
        .map_err(xml_err)?;

    let bytes = writer.into_inner().into_inner();
    let mut rendered = String::from_utf8(bytes)
        .map_err(|e| WorkflowError::fatal(format!("non-UTF8 NFO output: {e}")))?;
    rendered.push('\n');
    Ok(rendered)
}

/// Atomic write: temp file in the target directory, then rename over.
pub fn write_movie_nfo(path: &Path, movie: &Movie, cast: &[CastMember]) -> WorkflowResult<()> {
    let rendered = render_movie_nfo(movie, cast)?;
    let parent = path
        .parent()
        .ok_or_else(|| WorkflowError::validation("NFO path has no parent directory"))?;
    std::fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "movie.nfo".to_string())
    ));
    std::fs::write(&tmp, rendered.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    debug!(target: "nfo", path = %path.display(), "NFO written");
    Ok(())
}

fn xml_err(err: std::io::Error) -> WorkflowError {
    WorkflowError::fatal(format!("XML serialization failed: {err}"))
}

fn write_uniqueid(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    id_type: &str,
    value: &str,
    default: bool,
) -> WorkflowResult<()> {
    let mut start = BytesStart::new("uniqueid");
    start.push_attribute(("type", id_type));
    if default {
        start.push_attribute(("default", "true"));
    }
    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("uniqueid")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_text(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &str,
    value: &str,
) -> WorkflowResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new(element)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(element)))
        .map_err(xml_err)?;
    Ok(())
}

fn write_opt(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &str,
    value: Option<&str>,
) -> WorkflowResult<()> {
    if let Some(value) = value {
        write_text(writer, element, value)?;
    }
    Ok(())
}

fn write_opt_num<T: std::fmt::Display>(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    element: &str,
    value: Option<T>,
) -> WorkflowResult<()> {
    if let Some(value) = value {
        write_text(writer, element, &value.to_string())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfo::parser::{parse_nfo_files, NfoFile, NfoParseOutcome};
    use chrono::Utc;
    use curarr_domain::{
        ActorId, IdentificationStatus, LibraryId, MovieCollection, MovieId, RatingEntry,
    };

    fn sample_movie() -> Movie {
        Movie {
            id: MovieId(1),
            library_id: LibraryId(1),
            title: "Inception".to_string(),
            original_title: Some("Inception".to_string()),
            sort_title: None,
            year: Some(2010),
            plot: Some("A thief who steals corporate secrets.".to_string()),
            outline: Some("Dream heist.".to_string()),
            tagline: Some("Your mind is the scene of the crime.".to_string()),
            runtime: Some(148),
            content_rating: Some("PG-13".to_string()),
            premiered: Some("2010-07-16".to_string()),
            genres: vec!["Science Fiction".to_string(), "Thriller".to_string()],
            directors: vec!["Christopher Nolan".to_string()],
            writers: vec!["Christopher Nolan".to_string()],
            studios: vec!["Legendary Pictures".to_string()],
            countries: vec!["United States of America".to_string()],
            tags: vec!["dream".to_string()],
            ratings: vec![RatingEntry {
                source: "themoviedb".to_string(),
                value: 8.4,
                votes: 34000,
            }],
            collection: Some(MovieCollection {
                tmdb_id: Some(10),
                name: "Inception Collection".to_string(),
                overview: Some("One film, many dreams.".to_string()),
            }),
            tmdb_id: Some(27205),
            imdb_id: Some("tt1375666".to_string()),
            monitored: true,
            identification_status: IdentificationStatus::Enriched,
            enriched_at: None,
            directory: "/media/Inception (2010)".to_string(),
            video_file: None,
            video_hash: None,
            locked_fields: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_cast() -> Vec<CastMember> {
        vec![
            CastMember {
                actor_id: ActorId(1),
                name: "Leonardo DiCaprio".to_string(),
                role: Some("Cobb".to_string()),
                sort_order: 0,
                thumb_url: Some("https://img/leo.jpg".to_string()),
            },
            CastMember {
                actor_id: ActorId(2),
                name: "Elliot Page".to_string(),
                role: Some("Ariadne".to_string()),
                sort_order: 1,
                thumb_url: None,
            },
        ]
    }

    #[test]
    fn output_is_deterministic() {
        let movie = sample_movie();
        let cast = sample_cast();
        let a = render_movie_nfo(&movie, &cast).unwrap();
        let b = render_movie_nfo(&movie, &cast).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn uniqueids_come_first_with_tmdb_default() {
        let rendered = render_movie_nfo(&sample_movie(), &[]).unwrap();
        let tmdb_pos = rendered
            .find(r#"<uniqueid type="tmdb" default="true">27205</uniqueid>"#)
            .expect("tmdb uniqueid present");
        let title_pos = rendered.find("<title>").unwrap();
        assert!(tmdb_pos < title_pos);
    }

    #[test]
    fn imdb_becomes_default_without_tmdb() {
        let mut movie = sample_movie();
        movie.tmdb_id = None;
        let rendered = render_movie_nfo(&movie, &[]).unwrap();
        assert!(rendered.contains(r#"<uniqueid type="imdb" default="true">tt1375666</uniqueid>"#));
    }

    #[test]
    fn round_trips_through_the_parser() {
        let movie = sample_movie();
        let cast = sample_cast();
        let rendered = render_movie_nfo(&movie, &cast).unwrap();

        let outcome = parse_nfo_files(
            vec![NfoFile {
                name: "movie.nfo".to_string(),
                modified: Utc::now(),
                content: rendered,
            }],
            None,
        );
        let NfoParseOutcome::Valid { document, .. } = outcome else {
            panic!("writer output must parse");
        };

        assert_eq!(document.tmdb_id, movie.tmdb_id);
        assert_eq!(document.imdb_id, movie.imdb_id);
        assert_eq!(document.title.as_deref(), Some("Inception"));
        assert_eq!(document.year, movie.year);
        assert_eq!(document.plot, movie.plot);
        assert_eq!(document.outline, movie.outline);
        assert_eq!(document.runtime, movie.runtime);
        assert_eq!(document.content_rating, movie.content_rating);
        assert_eq!(document.genres, movie.genres);
        assert_eq!(document.directors, movie.directors);
        assert_eq!(document.writers, movie.writers);
        assert_eq!(document.studios, movie.studios);
        assert_eq!(document.countries, movie.countries);
        assert_eq!(document.tags, movie.tags);
        assert_eq!(document.actors.len(), 2);
        assert_eq!(document.actors[0].name, "Leonardo DiCaprio");
        assert_eq!(document.ratings.len(), 1);
        assert_eq!(document.ratings[0].votes, 34000);
        assert_eq!(
            document.collection.unwrap().name,
            movie.collection.unwrap().name
        );
    }

    #[test]
    fn atomic_write_lands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Inception (2010).nfo");
        write_movie_nfo(&path, &sample_movie(), &sample_cast()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<?xml"));
        // No temp file left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
