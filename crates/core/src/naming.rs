//! File naming for downloaded and archived artifacts.

use chrono::NaiveDate;

/// Archive entry name: `{date}_{job_id}.{ext}`.
///
/// Characters outside `[A-Za-z0-9_-]` in the job id are replaced with `_`
/// so backend ids cannot escape the archive root.
pub fn archive_filename(date: NaiveDate, job_id: &str, extension: &str) -> String {
    let safe_id: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let ext = extension.trim_start_matches('.');
    format!("{}_{safe_id}.{ext}", date.format("%Y-%m-%d"))
}

/// Working file name for the clip at `index` inside a stitch directory.
pub fn clip_work_filename(index: usize, extension: &str) -> String {
    format!("clip_{index:04}.{}", extension.trim_start_matches('.'))
}

/// Extension of a file name, lowercased, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && !ext.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn archive_name_format() {
        assert_eq!(
            archive_filename(date(), "4f1c-77aa", "mp4"),
            "2024-03-09_4f1c-77aa.mp4"
        );
    }

    #[test]
    fn archive_name_sanitises_id() {
        assert_eq!(
            archive_filename(date(), "../etc/passwd", ".png"),
            "2024-03-09____etc_passwd.png"
        );
    }

    #[test]
    fn clip_work_names_sort_lexically() {
        assert_eq!(clip_work_filename(3, "mp4"), "clip_0003.mp4");
        assert!(clip_work_filename(9, "mp4") < clip_work_filename(10, "mp4"));
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(extension_of("AnimateDiff_0001.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("dir.v2/file"), None);
    }
}
