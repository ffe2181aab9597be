//! Bundle independently retrieved artifacts into one zip archive.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use chrono::NaiveDate;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use reel_core::clip::{Clip, ClipRole, MediaRef};
use reel_core::naming::archive_filename;
use reel_core::types::JobId;

use crate::error::PipelineError;
use crate::fetch::{fetch_media, media_mime};

/// One artifact to archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub job_id: JobId,
    /// Extension without the dot, e.g. `mp4`.
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Zip the entries, naming each `{date}_{job_id}.{ext}`.
///
/// Entries that would collide get a numeric suffix (`_2`, `_3`, ...).
pub fn build_archive(entries: &[ArchiveEntry], date: NaiveDate) -> Result<Vec<u8>, PipelineError> {
    if entries.is_empty() {
        return Err(PipelineError::EmptyInput("no artifacts to archive".into()));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut used = HashSet::new();

    for entry in entries {
        let mut name = archive_filename(date, entry.job_id.as_str(), &entry.extension);
        let mut n = 2;
        while !used.insert(name.clone()) {
            name = archive_filename(
                date,
                &format!("{}_{n}", entry.job_id.as_str()),
                &entry.extension,
            );
            n += 1;
        }

        writer
            .start_file(name, options)
            .map_err(|e| PipelineError::Archive(e.to_string()))?;
        writer
            .write_all(&entry.bytes)
            .map_err(|e| PipelineError::Archive(e.to_string()))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| PipelineError::Archive(e.to_string()))?;
    tracing::debug!(entries = entries.len(), "Artifact archive built");
    Ok(cursor.into_inner())
}

/// Entries for a run's clips in stitched order, named `scene_01`,
/// `transition_02`, ... by role and position. URL clips are downloaded.
pub async fn clip_entries(
    http: &reqwest::Client,
    clips: &[Clip],
) -> Result<Vec<ArchiveEntry>, PipelineError> {
    let mut entries = Vec::with_capacity(clips.len());
    for (i, clip) in clips.iter().enumerate() {
        let role = match clip.role {
            ClipRole::Scene => "scene",
            ClipRole::Transition => "transition",
        };
        entries.push(ArchiveEntry {
            job_id: JobId(format!("{role}_{:02}", i + 1)),
            extension: media_extension(&clip.media).to_string(),
            bytes: fetch_media(http, &clip.media).await?,
        });
    }
    Ok(entries)
}

fn media_extension(media: &MediaRef) -> &'static str {
    match media_mime(media).as_deref() {
        Some("video/webm") => "webm",
        Some("video/quicktime") => "mov",
        Some("video/x-matroska") => "mkv",
        Some("image/gif") => "gif",
        _ => "mp4",
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use assert_matches::assert_matches;
    use zip::ZipArchive;

    use super::*;

    fn entry(id: &str, ext: &str, bytes: &[u8]) -> ArchiveEntry {
        ArchiveEntry {
            job_id: JobId(id.to_string()),
            extension: ext.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn entries_are_named_by_date_and_job() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let bytes = build_archive(
            &[entry("abc-1", "mp4", b"video"), entry("abc-1", "mp4", b"again"), entry("x/y", "png", b"img")],
            date,
        )
        .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"2024-03-09_abc-1.mp4".to_string()));
        assert!(names.contains(&"2024-03-09_abc-1_2.mp4".to_string()));
        assert!(names.contains(&"2024-03-09_x_y.png".to_string()));

        let mut content = String::new();
        archive
            .by_name("2024-03-09_abc-1_2.mp4")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "again");
    }

    #[test]
    fn empty_archive_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_matches!(build_archive(&[], date), Err(PipelineError::EmptyInput(_)));
    }

    #[tokio::test]
    async fn clips_are_named_by_role_and_position() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bridge.webm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bridge".to_vec()))
            .mount(&server)
            .await;
        let clips = vec![
            Clip::scene(MediaRef::data("video/mp4", b"first".to_vec()), 0),
            Clip::transition(MediaRef::url(format!("{}/bridge.webm", server.uri())), 0),
            Clip::scene(MediaRef::data("video/mp4", b"second".to_vec()), 1),
        ];

        let entries = clip_entries(&reqwest::Client::new(), &clips).await.unwrap();

        let names: Vec<String> = entries
            .iter()
            .map(|e| format!("{}.{}", e.job_id.as_str(), e.extension))
            .collect();
        assert_eq!(names, vec!["scene_01.mp4", "transition_02.webm", "scene_03.mp4"]);
        assert_eq!(entries[1].bytes, b"bridge".to_vec());
    }
}
