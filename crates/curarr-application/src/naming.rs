// SPDX-License-Identifier: GPL-3.0-or-later
//! Kodi sidecar naming and cache path layout, shared by the publisher and the
//! verifier so the two always agree on expected filenames.

use chrono::Utc;
use curarr_domain::AssetKind;
use std::path::{Path, PathBuf};

pub const VIDEO_EXTENSIONS: [&str; 6] = ["mkv", "mp4", "avi", "m4v", "ts", "webm"];

/// System files the verifier never touches.
pub fn is_ignored_file(name: &str) -> bool {
    name.starts_with('.') || name.eq_ignore_ascii_case("Thumbs.db") || name.eq_ignore_ascii_case("desktop.ini")
}

pub fn is_video_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)))
        .unwrap_or(false)
}

/// `<base>.nfo`
pub fn nfo_name(base: &str) -> String {
    format!("{base}.nfo")
}

/// `<base>-poster.jpg`, `<base>-fanart.jpg`, `<base>-clearlogo.png`, …
/// Index 0 is unnumbered; further selections get `-poster1`, `-poster2`.
pub fn image_name(base: &str, kind: AssetKind, index: usize, ext: &str) -> String {
    if index == 0 {
        format!("{base}-{}.{ext}", kind.kodi_suffix())
    } else {
        format!("{base}-{}{index}.{ext}", kind.kodi_suffix())
    }
}

/// `<base>-trailer.<ext>` or `<base>-trailer<N>.<ext>`.
pub fn trailer_name(base: &str, index: usize, ext: &str) -> String {
    if index == 0 {
        format!("{base}-trailer.{ext}")
    } else {
        format!("{base}-trailer{index}.{ext}")
    }
}

/// `<base>.<lang>.srt`
pub fn subtitle_name(base: &str, language: &str) -> String {
    format!("{base}.{language}.srt")
}

/// `<root>/<kind>/<hash[0:2]>/<hash>.<ext>`
pub fn asset_cache_path(cache_root: &Path, kind: AssetKind, content_hash: &str, ext: &str) -> PathBuf {
    cache_root
        .join(kind.to_string())
        .join(&content_hash[..2.min(content_hash.len())])
        .join(format!("{content_hash}.{ext}"))
}

/// `<root>/actors/<hash[0:2]>/<hash[2:4]>/<hash>.<ext>`
pub fn actor_cache_path(cache_root: &Path, content_hash: &str, ext: &str) -> PathBuf {
    let first = &content_hash[..2.min(content_hash.len())];
    let second = if content_hash.len() >= 4 {
        &content_hash[2..4]
    } else {
        "00"
    };
    cache_root
        .join("actors")
        .join(first)
        .join(second)
        .join(format!("{content_hash}.{ext}"))
}

/// Process-private temp file for analysis downloads.
pub fn analyze_temp_path(cache_root: &Path, discriminator: &str) -> PathBuf {
    cache_root
        .join("temp")
        .join(format!("curarr-analyze-{discriminator}.tmp"))
}

/// Move a file into `<trash_root>/<timestamp>/<filename>` instead of
/// unlinking it. Creates the dated directory on demand.
pub fn recycle(path: &Path, trash_root: &Path) -> std::io::Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let dir = trash_root.join(stamp);
    std::fs::create_dir_all(&dir)?;
    let name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    let mut target = dir.join(name);
    // A same-second recycle of an equally-named file must not clobber it.
    let mut attempt = 1;
    while target.exists() {
        target = dir.join(format!("{}.{attempt}", name.to_string_lossy()));
        attempt += 1;
    }
    std::fs::rename(path, &target)?;
    Ok(target)
}

/// Extension of a URL's path component, defaulting to jpg for the image CDNs
/// that omit one.
pub fn url_extension(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.split(['?', '#']).next().unwrap_or(ext).to_lowercase())
        .filter(|ext| ext.len() <= 4 && !ext.is_empty())
        .unwrap_or_else(|| "jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kodi_names_follow_convention() {
        assert_eq!(nfo_name("Inception (2010)"), "Inception (2010).nfo");
        assert_eq!(
            image_name("Inception (2010)", AssetKind::Poster, 0, "jpg"),
            "Inception (2010)-poster.jpg"
        );
        assert_eq!(
            image_name("Inception (2010)", AssetKind::Backdrop, 1, "jpg"),
            "Inception (2010)-fanart1.jpg"
        );
        assert_eq!(
            trailer_name("Inception (2010)", 0, "mp4"),
            "Inception (2010)-trailer.mp4"
        );
        assert_eq!(
            subtitle_name("Inception (2010)", "en"),
            "Inception (2010).en.srt"
        );
    }

    #[test]
    fn cache_paths_shard_by_hash_prefix() {
        let root = Path::new("/cache");
        assert_eq!(
            asset_cache_path(root, AssetKind::Poster, "abcdef123456", "jpg"),
            Path::new("/cache/poster/ab/abcdef123456.jpg")
        );
        assert_eq!(
            actor_cache_path(root, "abcdef123456", "jpg"),
            Path::new("/cache/actors/ab/cd/abcdef123456.jpg")
        );
    }

    #[test]
    fn recycle_moves_instead_of_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("poster.jpg");
        std::fs::write(&victim, b"image").unwrap();
        let trash = dir.path().join("trash");

        let target = recycle(&victim, &trash).unwrap();
        assert!(!victim.exists());
        assert!(target.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"image");
        assert!(target.starts_with(&trash));
    }

    #[test]
    fn url_extension_handles_cdn_urls() {
        assert_eq!(url_extension("https://img.tmdb.org/t/p/original/x.jpg"), "jpg");
        assert_eq!(url_extension("https://assets.fanart.tv/logo.png?v=2"), "png");
        assert_eq!(url_extension("https://cdn.example.com/no-extension"), "jpg");
    }

    #[test]
    fn ignored_files_cover_the_usual_suspects() {
        assert!(is_ignored_file(".DS_Store"));
        assert!(is_ignored_file("Thumbs.db"));
        assert!(is_ignored_file("desktop.ini"));
        assert!(!is_ignored_file("Inception (2010)-poster.jpg"));
    }

    #[test]
    fn video_detection_is_extension_based() {
        assert!(is_video_file("Inception (2010).mkv"));
        assert!(!is_video_file("Inception (2010).nfo"));
    }
}
