//! Attachment classification.
//!
//! Runner attachments are sorted by content type into videos, generic
//! files and screenshots. Videos are converted to MP4 before upload;
//! everything else passes through unchanged. Unrecognised content types
//! are dropped.

use crate::error::{AgentError, AgentResult};
use crate::protocol::ArtifactSource;
use crate::runner::Attachment;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Content types uploaded as generic test artifacts.
pub const FILE_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/octet-stream",
    "application/json",
    "text/plain",
    "text/html",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Video,
    File,
    Screenshot,
}

pub fn classify(content_type: &str) -> Option<AttachmentKind> {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if content_type.starts_with("video/") {
        Some(AttachmentKind::Video)
    } else if content_type.starts_with("image/") {
        Some(AttachmentKind::Screenshot)
    } else if FILE_CONTENT_TYPES.contains(&content_type.as_str()) {
        Some(AttachmentKind::File)
    } else {
        None
    }
}

/// An attachment ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedFile {
    pub name: String,
    pub source: ArtifactSource,
}

/// A video that could not be converted, by attachment name.
#[derive(Debug)]
pub struct TranscodeFailure {
    pub name: String,
    pub error: AgentError,
}

#[derive(Debug, Default)]
pub struct ProcessedAttachments {
    pub videos: Vec<PreparedFile>,
    pub files: Vec<PreparedFile>,
    pub screenshots: Vec<PreparedFile>,
    /// Videos dropped because conversion failed; the other buckets are unaffected.
    pub failures: Vec<TranscodeFailure>,
}

impl ProcessedAttachments {
    pub fn is_empty(&self) -> bool {
        self.videos.is_empty() && self.files.is_empty() && self.screenshots.is_empty()
    }
}

/// Converts a recorded video into an upload-friendly container.
pub trait VideoTranscoder: Send + Sync {
    /// Returns the path of the converted file.
    fn transcode(&self, input: &Path) -> AgentResult<PathBuf>;
}

/// Uploads videos as recorded.
pub struct Passthrough;

impl VideoTranscoder for Passthrough {
    fn transcode(&self, input: &Path) -> AgentResult<PathBuf> {
        Ok(input.to_path_buf())
    }
}

/// Converts with the `ffmpeg` binary found on `PATH`.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegTranscoder {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl VideoTranscoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path) -> AgentResult<PathBuf> {
        let output = input.with_extension("mp4");
        if output == input {
            return Ok(output);
        }
        debug!(input = %input.display(), output = %output.display(), "transcoding video");
        let status = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| AgentError::Transcode {
                message: format!("failed to run {}: {}", self.binary.display(), e),
            })?;
        if !status.status.success() {
            return Err(AgentError::Transcode {
                message: String::from_utf8_lossy(&status.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn source_of(attachment: &Attachment) -> Option<ArtifactSource> {
    match (&attachment.path, &attachment.body) {
        (Some(path), _) => Some(ArtifactSource::Path(path.clone())),
        (None, Some(body)) => Some(ArtifactSource::Buffer(body.clone())),
        (None, None) => None,
    }
}

fn file_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Sort attachments into upload buckets.
///
/// `None` in, `None` out: an absent list is distinct from an empty one,
/// which yields three empty buckets. A video that fails to convert is
/// recorded in `failures` and skipped.
pub fn process(
    attachments: Option<&[Attachment]>,
    transcoder: &dyn VideoTranscoder,
) -> Option<ProcessedAttachments> {
    let attachments = attachments?;

    let mut processed = ProcessedAttachments::default();
    for attachment in attachments {
        let Some(kind) = classify(&attachment.content_type) else {
            debug!(name = %attachment.name, content_type = %attachment.content_type, "dropping attachment");
            continue;
        };
        let Some(source) = source_of(attachment) else {
            continue;
        };
        match kind {
            AttachmentKind::Video => {
                // Conversion needs a file on disk.
                let ArtifactSource::Path(path) = source else {
                    debug!(name = %attachment.name, "dropping in-memory video");
                    continue;
                };
                let converted = match transcoder.transcode(&path) {
                    Ok(converted) => converted,
                    Err(error) => {
                        processed.failures.push(TranscodeFailure {
                            name: attachment.name.clone(),
                            error,
                        });
                        continue;
                    }
                };
                processed.videos.push(PreparedFile {
                    name: file_name(&converted, &attachment.name),
                    source: ArtifactSource::Path(converted),
                });
            }
            AttachmentKind::File => {
                let name = match &source {
                    ArtifactSource::Path(p) => file_name(p, &attachment.name),
                    ArtifactSource::Buffer(_) => attachment.name.clone(),
                };
                processed.files.push(PreparedFile { name, source });
            }
            AttachmentKind::Screenshot => processed.screenshots.push(PreparedFile {
                name: attachment.name.clone(),
                source,
            }),
        }
    }
    Some(processed)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn attachment(name: &str, content_type: &str, path: Option<&str>) -> Attachment {
        Attachment {
            name: name.to_string(),
            content_type: content_type.to_string(),
            path: path.map(PathBuf::from),
            body: None,
        }
    }

    /// Records inputs and "converts" by renaming.
    struct Recording(Mutex<Vec<PathBuf>>);

    impl VideoTranscoder for Recording {
        fn transcode(&self, input: &Path) -> AgentResult<PathBuf> {
            self.0.lock().unwrap().push(input.to_path_buf());
            Ok(input.with_extension("mp4"))
        }
    }

    struct Failing;

    impl VideoTranscoder for Failing {
        fn transcode(&self, _input: &Path) -> AgentResult<PathBuf> {
            Err(AgentError::Transcode {
                message: "codec missing".to_string(),
            })
        }
    }

    #[test]
    fn test_absent_list_is_none() {
        assert!(process(None, &Passthrough).is_none());
    }

    #[test]
    fn test_empty_list_is_empty_buckets() {
        let processed = process(Some(&[]), &Passthrough).unwrap();
        assert!(processed.is_empty());
    }

    #[test]
    fn test_classification_buckets() {
        let attachments = vec![
            attachment("video", "video/webm", Some("/out/video.webm")),
            attachment("trace", "application/zip", Some("/out/trace.zip")),
            attachment("screenshot", "image/png", Some("/out/shot.png")),
            attachment("weird", "application/x-unknown", Some("/out/x.bin")),
        ];
        let transcoder = Recording(Mutex::new(Vec::new()));
        let processed = process(Some(&attachments), &transcoder).unwrap();

        assert_eq!(processed.videos.len(), 1);
        assert_eq!(processed.videos[0].name, "video.mp4");
        assert_eq!(
            processed.videos[0].source,
            ArtifactSource::Path(PathBuf::from("/out/video.mp4"))
        );
        assert_eq!(processed.files[0].name, "trace.zip");
        assert_eq!(processed.screenshots[0].name, "screenshot");
        assert_eq!(
            transcoder.0.lock().unwrap().as_slice(),
            &[PathBuf::from("/out/video.webm")]
        );
    }

    #[test]
    fn test_screenshot_from_buffer() {
        let mut shot = attachment("inline", "image/png", None);
        shot.body = Some(vec![1, 2, 3]);
        let processed = process(Some(&[shot]), &Passthrough).unwrap();
        assert_eq!(
            processed.screenshots[0].source,
            ArtifactSource::Buffer(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_content_type_parameters_ignored() {
        assert_eq!(
            classify("text/plain; charset=utf-8"),
            Some(AttachmentKind::File)
        );
        assert_eq!(classify("IMAGE/JPEG"), Some(AttachmentKind::Screenshot));
        assert_eq!(classify("application/pdf"), None);
    }

    #[test]
    fn test_transcode_failure_keeps_other_attachments() {
        let attachments = vec![
            attachment("video", "video/webm", Some("/out/v.webm")),
            attachment("screenshot", "image/png", Some("/out/shot.png")),
            attachment("trace", "application/zip", Some("/out/trace.zip")),
        ];
        let processed = process(Some(&attachments), &Failing).unwrap();

        assert!(processed.videos.is_empty());
        assert_eq!(processed.screenshots.len(), 1);
        assert_eq!(processed.files.len(), 1);
        assert_eq!(processed.failures.len(), 1);
        assert_eq!(processed.failures[0].name, "video");
        assert!(matches!(
            processed.failures[0].error,
            AgentError::Transcode { .. }
        ));
    }

    #[test]
    fn test_missing_ffmpeg_binary_is_transcode_error() {
        let transcoder = FfmpegTranscoder::with_binary("/nonexistent/bin/ffmpeg");
        let result = transcoder.transcode(Path::new("/out/video.webm"));
        match result {
            Err(AgentError::Transcode { message }) => {
                assert!(message.contains("/nonexistent/bin/ffmpeg"))
            }
            other => panic!("expected transcode error, got {:?}", other),
        }
    }
}
