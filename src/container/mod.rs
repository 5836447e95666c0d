pub mod ffmpeg;

use crate::error::{Result, SubsearchError};
use async_trait::async_trait;
use isolang::Language;
use std::path::Path;
use std::sync::Arc;
use tempfile::{TempDir, TempPath};
use tracing::{debug, info};

pub use ffmpeg::FfmpegExtractor;

/// Metadata of one subtitle track inside a container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// Position among the container's subtitle tracks (`0:s:<index>`).
    pub index: usize,
    /// Absolute stream index inside the container.
    pub stream_index: usize,
    pub language_code: String,
    pub language_name: String,
    pub codec: String,
    pub title: Option<String>,
}

impl TrackInfo {
    pub fn new(index: usize, stream_index: usize, language: Option<&str>, codec: &str) -> Self {
        let language_code = match language.map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => "und".to_string(),
        };
        Self {
            index,
            stream_index,
            language_name: language_name(&language_code),
            language_code,
            codec: codec.to_string(),
            title: None,
        }
    }

    /// Image-based tracks carry no searchable text.
    pub fn is_bitmap(&self) -> bool {
        matches!(
            self.codec.as_str(),
            "hdmv_pgs_subtitle" | "dvd_subtitle" | "dvb_subtitle" | "xsub"
        )
    }

    /// File extension the extracted track is written with.
    pub fn output_extension(&self) -> &'static str {
        match self.codec.as_str() {
            "subrip" | "srt" => "srt",
            "ass" | "ssa" => "ass",
            "webvtt" => "vtt",
            "ttml" => "ttml",
            _ => "srt",
        }
    }

    /// Codecs without a matching text container are transcoded to SubRip.
    pub fn needs_conversion(&self) -> bool {
        !matches!(
            self.codec.as_str(),
            "subrip" | "srt" | "ass" | "ssa" | "webvtt" | "ttml"
        )
    }
}

/// `"<container file name> [Track <i>: <code> - <name>]"`
pub fn display_name(container: &Path, track: &TrackInfo) -> String {
    let file_name = container
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| container.display().to_string());
    format!(
        "{} [Track {}: {} - {}]",
        file_name, track.index, track.language_code, track.language_name
    )
}

/// English name for an ISO 639 code as found in container tags.
pub fn language_name(code: &str) -> String {
    let normalized = code.trim().to_lowercase();
    if normalized.is_empty() || normalized == "und" {
        return "Undetermined".to_string();
    }

    let lang = match normalized.len() {
        2 => Language::from_639_1(&normalized),
        3 => Language::from_639_3(bibliographic_to_terminology(&normalized)),
        _ => None,
    };

    match lang {
        Some(lang) => lang.to_name().to_string(),
        None => code.to_string(),
    }
}

/// Matroska tags often use ISO 639-2/B codes, which differ from 639-3 for a
/// handful of languages.
fn bibliographic_to_terminology(code: &str) -> &str {
    match code {
        "alb" => "sqi",
        "arm" => "hye",
        "baq" => "eus",
        "bur" => "mya",
        "chi" => "zho",
        "cze" => "ces",
        "dut" => "nld",
        "fre" => "fra",
        "geo" => "kat",
        "ger" => "deu",
        "gre" => "ell",
        "ice" => "isl",
        "mac" => "mkd",
        "mao" => "mri",
        "may" => "msa",
        "per" => "fas",
        "rum" => "ron",
        "slo" => "slk",
        "tib" => "bod",
        "wel" => "cym",
        other => other,
    }
}

/// Boundary to the external tool that lists and extracts embedded tracks.
#[async_trait]
pub trait TrackExtractor: Send + Sync {
    async fn enumerate_tracks(&self, container: &Path) -> Result<Vec<TrackInfo>>;

    /// Write the track as a standalone timed-text file at `output`.
    async fn extract_track(&self, container: &Path, track: &TrackInfo, output: &Path)
        -> Result<()>;

    fn name(&self) -> &'static str;
}

/// An extracted track on disk; the file is deleted when this is dropped.
#[derive(Debug)]
pub struct MaterializedTrack {
    path: TempPath,
}

impl MaterializedTrack {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Expands containers into tracks and materializes them on demand into a
/// session temp directory that is removed with the resolver.
pub struct ContainerResolver {
    extractor: Arc<dyn TrackExtractor>,
    temp_dir: TempDir,
}

impl ContainerResolver {
    pub fn new(extractor: Arc<dyn TrackExtractor>, temp_root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("subsearch-");
        let temp_dir = match temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        debug!("Track temp directory: {}", temp_dir.path().display());

        Ok(Self {
            extractor,
            temp_dir,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// List the subtitle tracks of a container without extracting anything.
    pub async fn enumerate(&self, container: &Path) -> Result<Vec<TrackInfo>> {
        let tracks = self
            .extractor
            .enumerate_tracks(container)
            .await
            .map_err(|e| match e {
                SubsearchError::ExtractionFailed(_) => e,
                other => SubsearchError::ExtractionFailed(format!(
                    "{}: {}",
                    container.display(),
                    other
                )),
            })?;
        info!(
            "Found {} subtitle tracks in {}",
            tracks.len(),
            container.display()
        );
        Ok(tracks)
    }

    pub async fn materialize(
        &self,
        container: &Path,
        track: &TrackInfo,
    ) -> Result<MaterializedTrack> {
        let stem = container
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "track".to_string());
        let suffix = format!(".{}", track.output_extension());

        let path = tempfile::Builder::new()
            .prefix(&format!("{stem}.track{}.", track.index))
            .suffix(&suffix)
            .tempfile_in(self.temp_dir.path())?
            .into_temp_path();

        debug!(
            "Extracting track {} of {} to {}",
            track.index,
            container.display(),
            path.display()
        );

        // `path` is dropped (and the file removed) if extraction fails.
        self.extractor
            .extract_track(container, track, &path)
            .await
            .map_err(|e| match e {
                SubsearchError::ExtractionFailed(_) => e,
                other => SubsearchError::ExtractionFailed(format!(
                    "track {} of {}: {}",
                    track.index,
                    container.display(),
                    other
                )),
            })?;

        Ok(MaterializedTrack { path })
    }
}

impl std::fmt::Debug for ContainerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerResolver")
            .field("extractor", &self.extractor.name())
            .field("temp_dir", &self.temp_dir.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct StubExtractor {
        fail: bool,
    }

    #[async_trait]
    impl TrackExtractor for StubExtractor {
        async fn enumerate_tracks(&self, _container: &Path) -> Result<Vec<TrackInfo>> {
            Ok(vec![TrackInfo::new(0, 2, Some("eng"), "subrip")])
        }

        async fn extract_track(
            &self,
            _container: &Path,
            _track: &TrackInfo,
            output: &Path,
        ) -> Result<()> {
            if self.fail {
                return Err(SubsearchError::ExtractionFailed("boom".to_string()));
            }
            std::fs::write(output, "1\n00:00:01,000 --> 00:00:02,000\nhi\n")?;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    #[test]
    fn test_language_names() {
        assert_eq!(language_name("en"), "English");
        assert_eq!(language_name("fr"), "French");
        assert_eq!(language_name("eng"), "English");
        assert_eq!(language_name("fre"), "French");
        assert_eq!(language_name("ger"), "German");
        assert_eq!(language_name("und"), "Undetermined");
        assert_eq!(language_name(""), "Undetermined");
        assert_eq!(language_name("xx-custom"), "xx-custom");
    }

    #[test]
    fn test_display_name() {
        let en = TrackInfo::new(0, 2, Some("en"), "subrip");
        let fr = TrackInfo::new(1, 3, Some("fr"), "ass");
        let container = PathBuf::from("/media/video.mkv");

        assert_eq!(display_name(&container, &en), "video.mkv [Track 0: en - English]");
        assert_eq!(display_name(&container, &fr), "video.mkv [Track 1: fr - French]");
    }

    #[test]
    fn test_missing_language_is_und() {
        let track = TrackInfo::new(0, 0, None, "subrip");
        assert_eq!(track.language_code, "und");
        assert_eq!(track.language_name, "Undetermined");
    }

    #[test]
    fn test_codec_mapping() {
        let srt = TrackInfo::new(0, 0, None, "subrip");
        assert_eq!(srt.output_extension(), "srt");
        assert!(!srt.needs_conversion());

        let mov = TrackInfo::new(0, 0, None, "mov_text");
        assert_eq!(mov.output_extension(), "srt");
        assert!(mov.needs_conversion());

        let pgs = TrackInfo::new(0, 0, None, "hdmv_pgs_subtitle");
        assert!(pgs.is_bitmap());
        assert!(!srt.is_bitmap());
    }

    #[tokio::test]
    async fn test_materialized_track_removed_on_drop() {
        let resolver =
            ContainerResolver::new(Arc::new(StubExtractor { fail: false }), None).unwrap();
        let container = PathBuf::from("/media/video.mkv");
        let track = resolver.enumerate(&container).await.unwrap().remove(0);

        let materialized = resolver.materialize(&container, &track).await.unwrap();
        let path = materialized.path().to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(resolver.temp_dir()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("srt"));

        drop(materialized);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_extraction_leaves_no_file() {
        let resolver =
            ContainerResolver::new(Arc::new(StubExtractor { fail: true }), None).unwrap();
        let track = TrackInfo::new(0, 0, Some("en"), "subrip");

        let result = resolver
            .materialize(&PathBuf::from("/media/video.mkv"), &track)
            .await;
        assert!(matches!(result, Err(SubsearchError::ExtractionFailed(_))));

        let leftover = std::fs::read_dir(resolver.temp_dir()).unwrap().count();
        assert_eq!(leftover, 0);
    }
}
