//! Files a worker run leaves in the output directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;

use reel_pipeline::archive::{build_archive, clip_entries};
use reel_pipeline::batch::BatchOutcome;

/// Paths written for one run.
#[derive(Debug)]
pub struct WrittenOutputs {
    pub video: PathBuf,
    pub archive: Option<PathBuf>,
}

/// `lyric_video.mp4` -> `lyric_video_clips.zip`.
fn archive_name(output_name: &str) -> String {
    let stem = output_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(output_name);
    format!("{stem}_clips.zip")
}

/// Write the stitched video and, when asked, a zip of the individual clips.
pub async fn write_outputs(
    dir: &Path,
    outcome: &BatchOutcome,
    archive: bool,
    date: NaiveDate,
) -> anyhow::Result<WrittenOutputs> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let video = dir.join(&outcome.stitched.filename);
    tokio::fs::write(&video, &outcome.stitched.bytes)
        .await
        .with_context(|| format!("writing {}", video.display()))?;

    let archive = if archive {
        let entries = clip_entries(&reqwest::Client::new(), &outcome.clips)
            .await
            .context("collecting clips to archive")?;
        let bytes = build_archive(&entries, date)?;
        let path = dir.join(archive_name(&outcome.stitched.filename));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), clips = entries.len(), "Clip archive written");
        Some(path)
    } else {
        None
    };

    Ok(WrittenOutputs { video, archive })
}
