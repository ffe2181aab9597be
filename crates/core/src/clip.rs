//! Produced clips, media references, and stitch jobs.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Media references
// ---------------------------------------------------------------------------

/// A dereferenceable piece of media: either a remote URL or embedded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    Url { url: String },
    Data { mime_type: String, bytes: Vec<u8> },
}

impl MediaRef {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn data(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Data {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Embedded bytes, if the media is already local.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Data { bytes, .. } => Some(bytes),
            Self::Url { .. } => None,
        }
    }
}

/// Guess a MIME type from a file name's extension.
pub fn mime_for_filename(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Clips
// ---------------------------------------------------------------------------

/// Whether a clip depicts a scene or bridges two scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipRole {
    Scene,
    Transition,
}

/// A produced media artifact positioned in the final sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub media: MediaRef,
    /// Position in the final stitched sequence.
    pub ordinal: usize,
    pub role: ClipRole,
    /// Scene this clip shows, or for a transition the scene it follows.
    pub scene_index: usize,
}

impl Clip {
    pub fn scene(media: MediaRef, scene_index: usize) -> Self {
        Self {
            media,
            ordinal: scene_index,
            role: ClipRole::Scene,
            scene_index,
        }
    }

    pub fn transition(media: MediaRef, after_scene: usize) -> Self {
        Self {
            media,
            ordinal: after_scene,
            role: ClipRole::Transition,
            scene_index: after_scene,
        }
    }
}

/// Interleave scene clips with the transitions that bridge them.
///
/// `transitions[i]` bridges `scenes[i]` and `scenes[i + 1]`; a `None`
/// entry (failed transition) leaves the two scenes adjacent. Ordinals are
/// reassigned to match the output order.
pub fn interleave(scenes: Vec<Clip>, transitions: Vec<Option<Clip>>) -> Vec<Clip> {
    interleave_groups(scenes.into_iter().map(|c| vec![c]).collect(), transitions)
}

/// [`interleave`] for scenes made of several consecutive sub-clips.
pub fn interleave_groups(groups: Vec<Vec<Clip>>, transitions: Vec<Option<Clip>>) -> Vec<Clip> {
    let mut transitions = transitions.into_iter();
    let last = groups.len().saturating_sub(1);
    let mut sequence = Vec::with_capacity(groups.len() * 2);

    for (i, group) in groups.into_iter().enumerate() {
        sequence.extend(group);
        if i < last {
            if let Some(Some(transition)) = transitions.next() {
                sequence.push(transition);
            }
        }
    }

    for (ordinal, clip) in sequence.iter_mut().enumerate() {
        clip.ordinal = ordinal;
    }
    sequence
}

// ---------------------------------------------------------------------------
// Stitch jobs
// ---------------------------------------------------------------------------

/// An ordered, non-empty list of clips to concatenate into one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchJob {
    clips: Vec<Clip>,
    pub output_name: String,
    /// Optional soundtrack muxed into the stitched video.
    pub audio: Option<MediaRef>,
}

impl StitchJob {
    /// Build a stitch job; an empty clip list is a caller bug.
    pub fn new(clips: Vec<Clip>, output_name: impl Into<String>) -> Result<Self, CoreError> {
        if clips.is_empty() {
            return Err(CoreError::EmptyInput(
                "stitch job requires at least one clip".to_string(),
            ));
        }
        Ok(Self {
            clips,
            output_name: output_name.into(),
            audio: None,
        })
    }

    pub fn with_audio(mut self, audio: MediaRef) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    /// Exactly one clip and no soundtrack: stitching is a plain fetch.
    pub fn is_passthrough(&self) -> bool {
        self.clips.len() == 1 && self.audio.is_none()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn scene(i: usize) -> Clip {
        Clip::scene(MediaRef::url(format!("https://cdn/scene{i}.mp4")), i)
    }

    fn transition(after: usize) -> Clip {
        Clip::transition(MediaRef::url(format!("https://cdn/t{after}.mp4")), after)
    }

    #[test]
    fn interleave_all_transitions() {
        let scenes: Vec<_> = (0..4).map(scene).collect();
        let transitions = (0..3).map(|i| Some(transition(i))).collect();
        let seq = interleave(scenes, transitions);

        assert_eq!(seq.len(), 7);
        for (i, clip) in seq.iter().enumerate() {
            let expected = if i % 2 == 0 {
                ClipRole::Scene
            } else {
                ClipRole::Transition
            };
            assert_eq!(clip.role, expected);
            assert_eq!(clip.ordinal, i);
        }
        assert_eq!(seq[3].scene_index, 1);
    }

    #[test]
    fn interleave_skips_failed_transitions() {
        let scenes: Vec<_> = (0..4).map(scene).collect();
        let transitions = vec![Some(transition(0)), None, Some(transition(2))];
        let seq = interleave(scenes, transitions);

        assert_eq!(seq.len(), 4 + 2);
        let scene_order: Vec<_> = seq
            .iter()
            .filter(|c| c.role == ClipRole::Scene)
            .map(|c| c.scene_index)
            .collect();
        assert_eq!(scene_order, vec![0, 1, 2, 3]);
        assert_eq!(seq[2].role, ClipRole::Scene);
        assert_eq!(seq[3].role, ClipRole::Scene);
    }

    #[test]
    fn interleave_groups_keeps_sub_clips_together() {
        let groups = vec![vec![scene(0), scene(0)], vec![scene(1)]];
        let seq = interleave_groups(groups, vec![Some(transition(0))]);
        let roles: Vec<_> = seq.iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![ClipRole::Scene, ClipRole::Scene, ClipRole::Transition, ClipRole::Scene]
        );
        assert_eq!(seq[3].ordinal, 3);
    }

    #[test]
    fn interleave_single_scene() {
        let seq = interleave(vec![scene(0)], vec![]);
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn stitch_job_rejects_empty() {
        assert_matches!(StitchJob::new(vec![], "out.mp4"), Err(CoreError::EmptyInput(_)));
    }

    #[test]
    fn passthrough_only_for_single_silent_clip() {
        let job = StitchJob::new(vec![scene(0)], "out.mp4").unwrap();
        assert!(job.is_passthrough());
        let with_audio = job.with_audio(MediaRef::url("https://cdn/song.mp3"));
        assert!(!with_audio.is_passthrough());
        let two = StitchJob::new(vec![scene(0), scene(1)], "out.mp4").unwrap();
        assert!(!two.is_passthrough());
    }

    #[test]
    fn mime_guess_by_extension() {
        assert_eq!(mime_for_filename("clip_0001.MP4"), "video/mp4");
        assert_eq!(mime_for_filename("frame.png"), "image/png");
        assert_eq!(mime_for_filename("noext"), "application/octet-stream");
    }
}
