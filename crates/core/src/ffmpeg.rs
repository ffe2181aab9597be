//! FFmpeg/FFprobe shared command utilities.
//!
//! Thin `tokio::process` wrappers used by the clip stitcher and the
//! last-frame extractor, plus pure parsers for ffprobe's JSON output.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Seek offset back from the end of a clip when grabbing its last frame.
pub const LAST_FRAME_EPSILON_SECS: f64 = 0.05;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub pix_fmt: Option<String>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

/// The stream parameters that must match for stream-copy concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSignature {
    pub codec: String,
    pub width: i32,
    pub height: i32,
    pub pix_fmt: String,
}

impl std::fmt::Display for StreamSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} {}",
            self.codec, self.width, self.height, self.pix_fmt
        )
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Confirm the ffmpeg binary can be executed and return its version line.
pub async fn ffmpeg_version() -> Result<String, FfmpegError> {
    let output = run("ffmpeg", ["-hide_banner", "-version"]).await?;
    let stdout = String::from_utf8_lossy(&output);
    Ok(stdout.lines().next().unwrap_or_default().to_string())
}

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    ensure_exists(path)?;

    let mut args: Vec<&OsStr> = [
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .iter()
    .map(OsStr::new)
    .collect();
    args.push(path.as_os_str());

    let stdout = run("ffprobe", args).await?;
    let stdout = String::from_utf8_lossy(&stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Extract the last decodable frame of a video as a PNG.
///
/// Seeks to `duration - LAST_FRAME_EPSILON_SECS` and writes one frame.
pub async fn extract_last_frame(video_path: &Path, output_path: &Path) -> Result<(), FfmpegError> {
    let probe = probe_video(video_path).await?;
    let duration = parse_duration(&probe);
    let timestamp = (duration - LAST_FRAME_EPSILON_SECS).max(0.0);

    let timestamp = format!("{timestamp:.3}");
    let args: Vec<&OsStr> = vec![
        OsStr::new("-y"),
        OsStr::new("-ss"),
        OsStr::new(&timestamp),
        OsStr::new("-i"),
        video_path.as_os_str(),
        OsStr::new("-frames:v"),
        OsStr::new("1"),
        OsStr::new("-update"),
        OsStr::new("1"),
        output_path.as_os_str(),
    ];
    run("ffmpeg", args).await?;

    if !output_path.exists() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: Some(0),
            stderr: format!("no frame decoded at {timestamp}s"),
        });
    }
    Ok(())
}

/// Build the contents of a concat-demuxer manifest.
///
/// Each line is `file '<path>'`; single quotes inside paths are escaped.
pub fn concat_manifest(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

/// Concatenate the files listed in `manifest_path` without re-encoding.
///
/// The output has its metadata moved to the front (`+faststart`) so it can
/// start playing before it is fully downloaded.
pub async fn concat_stream_copy(manifest_path: &Path, output_path: &Path) -> Result<(), FfmpegError> {
    ensure_exists(manifest_path)?;
    let args: Vec<&OsStr> = vec![
        OsStr::new("-y"),
        OsStr::new("-f"),
        OsStr::new("concat"),
        OsStr::new("-safe"),
        OsStr::new("0"),
        OsStr::new("-i"),
        manifest_path.as_os_str(),
        OsStr::new("-c"),
        OsStr::new("copy"),
        OsStr::new("-movflags"),
        OsStr::new("+faststart"),
        output_path.as_os_str(),
    ];
    run("ffmpeg", args).await?;
    Ok(())
}

/// Mux an audio track under a video, copying the video stream.
///
/// Audio is encoded to AAC and the output ends with the shorter input.
pub async fn mux_audio(
    video_path: &Path,
    audio_path: &Path,
    output_path: &Path,
) -> Result<(), FfmpegError> {
    ensure_exists(video_path)?;
    ensure_exists(audio_path)?;
    let args: Vec<&OsStr> = vec![
        OsStr::new("-y"),
        OsStr::new("-i"),
        video_path.as_os_str(),
        OsStr::new("-i"),
        audio_path.as_os_str(),
        OsStr::new("-map"),
        OsStr::new("0:v:0"),
        OsStr::new("-map"),
        OsStr::new("1:a:0"),
        OsStr::new("-c:v"),
        OsStr::new("copy"),
        OsStr::new("-c:a"),
        OsStr::new("aac"),
        OsStr::new("-shortest"),
        OsStr::new("-movflags"),
        OsStr::new("+faststart"),
        output_path.as_os_str(),
    ];
    run("ffmpeg", args).await?;
    Ok(())
}

/// File name pattern expected by [`encode_frame_sequence`].
pub const FRAME_PATTERN: &str = "frame_%05d.png";

/// Name of frame `index` (0-based) under [`FRAME_PATTERN`].
pub fn frame_filename(index: usize) -> String {
    format!("frame_{:05}.png", index + 1)
}

/// Encode numbered PNG frames in `frames_dir` into an H.264 MP4.
pub async fn encode_frame_sequence(
    frames_dir: &Path,
    frame_rate: u32,
    output_path: &Path,
) -> Result<(), FfmpegError> {
    let pattern = frames_dir.join(FRAME_PATTERN);
    let rate = frame_rate.max(1).to_string();
    let args: Vec<&OsStr> = vec![
        OsStr::new("-y"),
        OsStr::new("-framerate"),
        OsStr::new(&rate),
        OsStr::new("-start_number"),
        OsStr::new("1"),
        OsStr::new("-i"),
        pattern.as_os_str(),
        OsStr::new("-c:v"),
        OsStr::new("libx264"),
        OsStr::new("-pix_fmt"),
        OsStr::new("yuv420p"),
        OsStr::new("-movflags"),
        OsStr::new("+faststart"),
        output_path.as_os_str(),
    ];
    run("ffmpeg", args).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    if let Some(secs) = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
    {
        return secs;
    }
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.parse::<f64>().unwrap_or(0.0);
        let den = den.parse::<f64>().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
        return 0.0;
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Signature of the first video stream, if the file has one.
pub fn stream_signature(probe: &FfprobeOutput) -> Option<StreamSignature> {
    first_video_stream(probe).map(|s| StreamSignature {
        codec: s.codec_name.clone().unwrap_or_default(),
        width: s.width.unwrap_or(0),
        height: s.height.unwrap_or(0),
        pix_fmt: s.pix_fmt.clone().unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if path.exists() {
        Ok(())
    } else {
        Err(FfmpegError::VideoNotFound(path.to_string_lossy().to_string()))
    }
}

/// Run a binary to completion and return its stdout.
async fn run<I, S>(program: &str, args: I) -> Result<Vec<u8>, FfmpegError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(codec: &str, width: i32, height: i32) -> FfprobeStream {
        FfprobeStream {
            index: 0,
            codec_name: Some(codec.into()),
            codec_type: Some("video".into()),
            width: Some(width),
            height: Some(height),
            pix_fmt: Some("yuv420p".into()),
            r_frame_rate: Some("8/1".into()),
            duration: Some("2.0".into()),
        }
    }

    fn probe(streams: Vec<FfprobeStream>, duration: Option<&str>) -> FfprobeOutput {
        FfprobeOutput {
            streams,
            format: FfprobeFormat {
                duration: duration.map(str::to_string),
                format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".into()),
            },
        }
    }

    #[test]
    fn test_parse_fraction_standard() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fraction_ntsc() {
        assert!((parse_fraction("24000/1001") - 23.976).abs() < 0.01);
    }

    #[test]
    fn test_parse_fraction_zero_denominator() {
        assert_eq!(parse_fraction("30/0"), 0.0);
    }

    #[test]
    fn test_parse_duration_prefers_format() {
        let p = probe(vec![video_stream("h264", 512, 512)], Some("4.25"));
        assert!((parse_duration(&p) - 4.25).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_falls_back_to_stream() {
        let p = probe(vec![video_stream("h264", 512, 512)], None);
        assert!((parse_duration(&p) - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_framerate() {
        let p = probe(vec![video_stream("h264", 512, 512)], None);
        assert!((parse_framerate(&p) - 8.0).abs() < 0.001);
    }

    #[test]
    fn test_stream_signature() {
        let p = probe(vec![video_stream("hevc", 768, 432)], None);
        let sig = stream_signature(&p).unwrap();
        assert_eq!(sig.codec, "hevc");
        assert_eq!((sig.width, sig.height), (768, 432));
        assert_eq!(sig.to_string(), "hevc 768x432 yuv420p");
    }

    #[test]
    fn test_stream_signature_without_video() {
        let p = probe(vec![], Some("1.0"));
        assert!(stream_signature(&p).is_none());
    }

    #[test]
    fn test_concat_manifest_lines() {
        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/work/clip_000.mp4"),
            PathBuf::from("/tmp/work/it's.mp4"),
        ]);
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "file '/tmp/work/clip_000.mp4'");
        assert_eq!(lines[1], r"file '/tmp/work/it'\''s.mp4'");
    }

    #[test]
    fn test_frame_filename_matches_pattern() {
        assert_eq!(frame_filename(0), "frame_00001.png");
        assert_eq!(frame_filename(41), "frame_00042.png");
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_video(Path::new("/definitely/not/here.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfmpegError::VideoNotFound(_)));
    }
}
