use crate::container::{self, TrackInfo};
use crate::encoding;
use crate::error::Result;
use crate::subtitle::{self, fallback, Cue, DecodeOptions, Decoded, SubtitleFormat};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Stable identity of a searchable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKey {
    Standalone(PathBuf),
    ContainerTrack { container: PathBuf, track: usize },
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKey::Standalone(path) => write!(f, "{}", path.display()),
            DocumentKey::ContainerTrack { container, track } => {
                write!(f, "{}#track{}", container.display(), track)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    StandaloneFile,
    ContainerTrack,
}

/// Where a document's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Standalone { path: PathBuf },
    ContainerTrack { container: PathBuf, track: TrackInfo },
}

impl DocumentSource {
    pub fn standalone(path: impl Into<PathBuf>) -> Self {
        DocumentSource::Standalone { path: path.into() }
    }

    pub fn key(&self) -> DocumentKey {
        match self {
            DocumentSource::Standalone { path } => DocumentKey::Standalone(path.clone()),
            DocumentSource::ContainerTrack { container, track } => DocumentKey::ContainerTrack {
                container: container.clone(),
                track: track.index,
            },
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            DocumentSource::Standalone { .. } => SourceKind::StandaloneFile,
            DocumentSource::ContainerTrack { .. } => SourceKind::ContainerTrack,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            DocumentSource::Standalone { path } => path.display().to_string(),
            DocumentSource::ContainerTrack { container, track } => {
                container::display_name(container, track)
            }
        }
    }

    /// The file whose fingerprint decides whether a cached parse is current.
    /// Tracks are checked against their container, since the extracted file
    /// does not outlive the parse.
    pub fn validity_path(&self) -> &Path {
        match self {
            DocumentSource::Standalone { path } => path,
            DocumentSource::ContainerTrack { container, .. } => container,
        }
    }

    pub fn identity(&self) -> DocumentIdentity {
        DocumentIdentity {
            key: self.key(),
            display_name: self.display_name(),
            source_kind: self.kind(),
        }
    }
}

/// Path, size and modification time of a file at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Fingerprint {
    pub async fn capture(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// What a scan reports for each registered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdentity {
    pub key: DocumentKey,
    pub display_name: String,
    pub source_kind: SourceKind,
}

/// A parsed subtitle source, immutable once built.
#[derive(Debug, Clone)]
pub struct Document {
    pub key: DocumentKey,
    pub source_kind: SourceKind,
    pub display_name: String,
    /// The file search hits point back to: the subtitle file or the container.
    pub backing_path: PathBuf,
    pub fingerprint: Fingerprint,
    pub format: Option<SubtitleFormat>,
    pub encoding: &'static str,
    pub encoding_uncertain: bool,
    pub parse_degraded: bool,
    pub skipped_blocks: usize,
    /// Ordered by start, then sequence index.
    pub cues: Vec<Cue>,
    /// Only kept when nothing timed could be recovered from non-empty text.
    pub raw_text: Option<String>,
}

impl Document {
    pub fn new(source: &DocumentSource, fingerprint: Fingerprint, parsed: ParsedContent) -> Self {
        Self {
            key: source.key(),
            source_kind: source.kind(),
            display_name: source.display_name(),
            backing_path: source.validity_path().to_path_buf(),
            fingerprint,
            format: parsed.format,
            encoding: parsed.encoding,
            encoding_uncertain: parsed.encoding_uncertain,
            parse_degraded: parsed.parse_degraded,
            skipped_blocks: parsed.skipped,
            cues: parsed.cues,
            raw_text: parsed.raw_text,
        }
    }

    pub fn identity(&self) -> DocumentIdentity {
        DocumentIdentity {
            key: self.key.clone(),
            display_name: self.display_name.clone(),
            source_kind: self.source_kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub decode: DecodeOptions,
    pub encoding_threshold: f32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            decode: DecodeOptions::default(),
            encoding_threshold: 0.8,
        }
    }
}

impl From<&crate::config::Config> for ParseOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            decode: DecodeOptions {
                microdvd_fps: config.microdvd_fps,
            },
            encoding_threshold: config.encoding_confidence_threshold,
        }
    }
}

/// Result of decoding one file's bytes.
#[derive(Debug, Clone)]
pub struct ParsedContent {
    pub format: Option<SubtitleFormat>,
    pub encoding: &'static str,
    pub encoding_uncertain: bool,
    pub parse_degraded: bool,
    pub skipped: usize,
    pub cues: Vec<Cue>,
    pub raw_text: Option<String>,
}

/// Decode raw file bytes into cues. `path` is used for format selection
/// and messages only. CPU-bound; never touches the filesystem.
pub fn parse_content(bytes: &[u8], path: &Path, options: &ParseOptions) -> ParsedContent {
    let text = encoding::decode(bytes, options.encoding_threshold);
    if text.uncertain {
        warn!(
            "Could not determine encoding of {}; using lossy UTF-8",
            path.display()
        );
    }

    let format = SubtitleFormat::detect(path, &text.text);
    let (decoded, parse_degraded) = match format {
        Some(format) => match subtitle::decode_text(format, &text.text, path, &options.decode) {
            Ok(decoded) => (decoded, false),
            Err(e) => {
                warn!("{}; scanning for timing lines instead", e);
                (fallback::scan(&text.text), true)
            }
        },
        None if subtitle::is_non_trivial(&text.text) => {
            debug!("Unrecognized subtitle format: {}", path.display());
            (fallback::scan(&text.text), true)
        }
        None => (Decoded::default(), false),
    };

    let raw_text = (parse_degraded && decoded.cues.is_empty()).then(|| text.text.clone());

    debug!(
        "Decoded {} cues from {} ({}, {}, {} skipped)",
        decoded.cues.len(),
        path.display(),
        format.map_or_else(|| "unknown format".to_string(), |f| f.to_string()),
        text.encoding.name(),
        decoded.skipped
    );

    ParsedContent {
        format,
        encoding: text.encoding.name(),
        encoding_uncertain: text.uncertain,
        parse_degraded,
        skipped: decoded.skipped,
        cues: decoded.cues,
        raw_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(text: &str, name: &str) -> ParsedContent {
        parse_content(text.as_bytes(), Path::new(name), &ParseOptions::default())
    }

    #[test]
    fn test_parse_srt() {
        let parsed = parse(
            "1\n00:00:01,000 --> 00:00:03,000\nthis is a tool for testing\n",
            "sample.srt",
        );
        assert_eq!(parsed.format, Some(SubtitleFormat::Srt));
        assert_eq!(parsed.encoding, "UTF-8");
        assert!(!parsed.parse_degraded);
        assert_eq!(parsed.cues.len(), 1);
        assert_eq!(parsed.cues[0].start, Duration::from_secs(1));
        assert!(parsed.raw_text.is_none());
    }

    #[test]
    fn test_wrong_extension_falls_back_to_line_scan() {
        let parsed = parse("1\n00:00:01,000 --> 00:00:02,000\nhello\n", "mislabeled.ass");
        assert!(parsed.parse_degraded);
        assert_eq!(parsed.cues.len(), 1);
        assert_eq!(parsed.cues[0].text, "hello");
        assert!(parsed.raw_text.is_none());
    }

    #[test]
    fn test_untimed_text_keeps_raw_text() {
        let parsed = parse("Dialogue without any timing\nsecond line\n", "notes.srt");
        assert!(parsed.parse_degraded);
        assert!(parsed.cues.is_empty());
        assert_eq!(
            parsed.raw_text.as_deref(),
            Some("Dialogue without any timing\nsecond line\n")
        );
    }

    #[test]
    fn test_empty_file_is_not_degraded() {
        let parsed = parse("", "empty.srt");
        assert!(!parsed.parse_degraded);
        assert!(parsed.cues.is_empty());
        assert!(parsed.raw_text.is_none());
    }

    #[test]
    fn test_unknown_extension_is_sniffed() {
        let parsed = parse("WEBVTT\n\n00:01.000 --> 00:02.000\nhi\n", "captions.txt");
        assert_eq!(parsed.format, Some(SubtitleFormat::Vtt));
        assert_eq!(parsed.cues.len(), 1);
    }

    #[test]
    fn test_source_identity() {
        let track = TrackInfo::new(1, 3, Some("fr"), "subrip");
        let source = DocumentSource::ContainerTrack {
            container: PathBuf::from("/m/video.mkv"),
            track,
        };
        assert_eq!(
            source.key(),
            DocumentKey::ContainerTrack {
                container: PathBuf::from("/m/video.mkv"),
                track: 1
            }
        );
        assert_eq!(source.display_name(), "video.mkv [Track 1: fr - French]");
        assert_eq!(source.validity_path(), Path::new("/m/video.mkv"));
        assert_eq!(source.kind(), SourceKind::ContainerTrack);
        assert_eq!(source.key().to_string(), "/m/video.mkv#track1");

        let standalone = DocumentSource::standalone("subs/a.srt");
        assert_eq!(standalone.display_name(), "subs/a.srt");
        assert_eq!(standalone.identity().source_kind, SourceKind::StandaloneFile);
    }

    #[tokio::test]
    async fn test_fingerprint_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.srt");
        std::fs::write(&path, "short").unwrap();
        let before = Fingerprint::capture(&path).await.unwrap();

        std::fs::write(&path, "a longer body").unwrap();
        let after = Fingerprint::capture(&path).await.unwrap();

        assert_ne!(before, after);
        assert_eq!(after.size, 13);
        assert!(Fingerprint::capture(&dir.path().join("missing.srt")).await.is_err());
    }
}
