use crate::cache::{CacheStats, DocumentCache, WarmHandle, WarmReport};
use crate::config::Config;
use crate::container::{ContainerResolver, FfmpegExtractor, TrackExtractor, TrackInfo};
use crate::document::{DocumentIdentity, DocumentKey, DocumentSource, ParseOptions, SourceKind};
use crate::error::{Result, SubsearchError};
use crate::pool::WorkerPool;
use crate::search::{CancelFlag, SearchCoordinator, SearchHit, SearchResults};
use crate::status::{StatusCallback, StatusEvent, StatusSink};
use crate::subtitle::SubtitleFormat;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Standalone timed-text extensions.
pub const SUBTITLE_EXTENSIONS: &[&str] = &[
    "srt", "vtt", "webvtt", "ass", "ssa", "sub", "sbv", "ttml", "dfxp",
];

/// Files probed for embedded subtitle tracks.
pub const CONTAINER_EXTENSIONS: &[&str] = &["mkv", "mks", "mp4", "m4v", "mov", "webm"];

/// Files a standalone subtitle may belong to.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "mov", "webm", "avi", "wmv", "flv", "ts", "mpg", "mpeg",
];

const SNIFF_BYTES: u64 = 4096;

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a discovered file is worth handing to `Engine::scan`.
pub fn is_candidate(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| {
        SUBTITLE_EXTENSIONS.contains(&ext.as_str())
            || CONTAINER_EXTENSIONS.contains(&ext.as_str())
            || ext == "xml"
    })
}

pub fn is_container(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| CONTAINER_EXTENSIONS.contains(&ext.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Registered documents, ordered by display name.
    pub documents: Vec<DocumentIdentity>,
    pub failures: Vec<ScanFailure>,
    pub files_scanned: usize,
    pub tracks_skipped: usize,
}

/// Where and when to open a video for a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekTarget {
    pub video_path: PathBuf,
    pub start_time: Duration,
}

enum Classified {
    Standalone(PathBuf),
    Container(PathBuf),
    Ignored,
    Failed(ScanFailure),
}

/// Entry point: scan sources, search them, resolve hits back to videos.
pub struct Engine {
    config: Config,
    cache: Arc<DocumentCache>,
    coordinator: SearchCoordinator,
    status: StatusSink,
    warm: Mutex<Option<WarmHandle>>,
}

impl Engine {
    /// Engine backed by the `ffprobe`/`ffmpeg` binaries from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let extractor = Arc::new(FfmpegExtractor::from_config(&config));
        Self::with_extractor(config, extractor)
    }

    pub fn with_extractor(config: Config, extractor: Arc<dyn TrackExtractor>) -> Result<Self> {
        config.validate()?;

        let workers = config.worker_count();
        let status = StatusSink::default();
        let resolver = ContainerResolver::new(extractor, config.temp_dir.as_deref())?;
        let cache = Arc::new(DocumentCache::new(
            resolver,
            Arc::new(WorkerPool::new(workers)),
            ParseOptions::from(&config),
            status.clone(),
        ));

        info!(
            "Engine ready with {} workers using {}",
            workers,
            cache.resolver().extractor_name()
        );

        Ok(Self {
            coordinator: SearchCoordinator::new(Arc::clone(&cache)),
            config,
            cache,
            status,
            warm: Mutex::new(None),
        })
    }

    /// Install the status callback. Only the first callback is kept.
    pub fn with_status(self, callback: StatusCallback) -> Self {
        if !self.status.set(callback) {
            warn!("Status callback already installed; ignoring");
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    /// Register the subtitle documents found in `paths`, replacing the
    /// previous registration. Per-file failures are reported, not returned.
    pub async fn scan(&self, paths: &[PathBuf]) -> Result<ScanReport> {
        let total = paths.len();
        self.status.emit(StatusEvent::ScanStarted { paths: total });
        info!("Scanning {} paths", total);

        let mut report = ScanReport::default();
        let mut sources: Vec<DocumentSource> = Vec::new();
        let mut containers: Vec<PathBuf> = Vec::new();
        let mut scanned = 0;

        for path in paths {
            match classify(path).await {
                Classified::Standalone(path) => {
                    sources.push(DocumentSource::standalone(path));
                    report.files_scanned += 1;
                    scanned += 1;
                    self.status.emit(StatusEvent::ScanProgress { scanned, total });
                }
                Classified::Container(path) => containers.push(path),
                Classified::Ignored => {
                    scanned += 1;
                    self.status.emit(StatusEvent::ScanProgress { scanned, total });
                }
                Classified::Failed(failure) => {
                    warn!("Cannot scan {}: {}", failure.path.display(), failure.reason);
                    report.failures.push(failure);
                    scanned += 1;
                    self.status.emit(StatusEvent::ScanProgress { scanned, total });
                }
            }
        }

        // Enumerate containers concurrently on the shared worker pool.
        let pool = self.cache.pool();
        let resolver = self.cache.resolver();
        let mut futures = FuturesUnordered::new();
        for container in containers {
            futures.push(async move {
                let _permit = pool.acquire_search().await;
                let tracks = resolver.enumerate(&container).await;
                (container, tracks)
            });
        }

        let mut enumerated: Vec<(PathBuf, Vec<TrackInfo>)> = Vec::new();
        while let Some((container, tracks)) = futures.next().await {
            report.files_scanned += 1;
            scanned += 1;
            match tracks {
                Ok(tracks) => enumerated.push((container, tracks)),
                Err(e) => {
                    warn!("Skipping {}: {}", container.display(), e);
                    self.status.emit(StatusEvent::ExtractionFailed {
                        container: container.clone(),
                        reason: e.to_string(),
                    });
                    report.failures.push(ScanFailure {
                        path: container,
                        reason: e.to_string(),
                    });
                }
            }
            self.status.emit(StatusEvent::ScanProgress { scanned, total });
        }

        // Completion order varies; keep registration deterministic.
        enumerated.sort_by(|a, b| a.0.cmp(&b.0));
        for (container, tracks) in enumerated {
            for track in tracks {
                if track.is_bitmap() {
                    debug!(
                        "Skipping bitmap track {} ({}) in {}",
                        track.index,
                        track.codec,
                        container.display()
                    );
                    report.tracks_skipped += 1;
                    self.status.emit(StatusEvent::TrackSkipped {
                        container: container.clone(),
                        track: track.index,
                        codec: track.codec.clone(),
                    });
                    continue;
                }
                sources.push(DocumentSource::ContainerTrack {
                    container: container.clone(),
                    track,
                });
            }
        }

        report.documents = sources.iter().map(DocumentSource::identity).collect();
        report.documents.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.key.cmp(&b.key))
        });
        report.documents.dedup_by(|a, b| a.key == b.key);

        let keys = self.cache.replace_sources(sources);

        info!(
            "Scan complete: {} files, {} documents, {} failures",
            report.files_scanned,
            report.documents.len(),
            report.failures.len()
        );
        self.status.emit(StatusEvent::ScanComplete {
            files_scanned: report.files_scanned,
            documents: report.documents.len(),
            failures: report.failures.len(),
        });

        if self.config.warm_after_scan && !keys.is_empty() {
            self.start_warm(keys);
        }

        Ok(report)
    }

    pub async fn search(&self, query: &str, case_sensitive: bool) -> Result<SearchResults> {
        self.coordinator.search(query, case_sensitive).await
    }

    pub async fn search_with_cancel(
        &self,
        query: &str,
        case_sensitive: bool,
        cancel: &CancelFlag,
    ) -> Result<SearchResults> {
        self.coordinator
            .search_with_cancel(query, case_sensitive, cancel)
            .await
    }

    /// The video to open for `hit` and the time to seek to.
    pub fn resolve_seek_target(&self, hit: &SearchHit) -> Result<SeekTarget> {
        let video_path = match hit.document.source_kind {
            SourceKind::ContainerTrack => hit.document.backing_path.clone(),
            SourceKind::StandaloneFile => companion_video(&hit.document.backing_path)
                .ok_or_else(|| SubsearchError::NoCompanionVideo(hit.document.backing_path.clone()))?,
        };
        Ok(SeekTarget {
            video_path,
            start_time: hit.cue.start,
        })
    }

    /// Registered documents, ordered by display name.
    pub fn documents(&self) -> Vec<DocumentIdentity> {
        let mut documents: Vec<DocumentIdentity> = self
            .cache
            .keys()
            .iter()
            .filter_map(|key| self.cache.source(key))
            .map(|source| source.identity())
            .collect();
        documents.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        documents
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Wait for the warm started by the last scan, if any.
    pub async fn wait_for_warm(&self) -> Option<Result<WarmReport>> {
        let handle = self.lock_warm().take()?;
        Some(handle.wait().await)
    }

    fn start_warm(&self, keys: Vec<DocumentKey>) {
        let handle = self.cache.warm(keys);
        if let Some(previous) = self.lock_warm().replace(handle) {
            previous.abort();
        }
    }

    fn lock_warm(&self) -> std::sync::MutexGuard<'_, Option<WarmHandle>> {
        self.warm.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_warm().take() {
            handle.abort();
        }
    }
}

async fn classify(path: &Path) -> Classified {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            return Classified::Failed(ScanFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    if !metadata.is_file() {
        debug!("Not a file, ignoring: {}", path.display());
        return Classified::Ignored;
    }

    let ext = extension_of(path).unwrap_or_default();
    if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        return Classified::Standalone(path.to_path_buf());
    }
    if is_container(path) {
        return Classified::Container(path.to_path_buf());
    }

    match sniff_file(path).await {
        Some(format) => {
            debug!("Sniffed {} as {}", path.display(), format);
            Classified::Standalone(path.to_path_buf())
        }
        None => {
            debug!("Not a subtitle file, ignoring: {}", path.display());
            Classified::Ignored
        }
    }
}

async fn sniff_file(path: &Path) -> Option<SubtitleFormat> {
    let file = tokio::fs::File::open(path).await.ok()?;
    let mut head = Vec::new();
    file.take(SNIFF_BYTES).read_to_end(&mut head).await.ok()?;
    SubtitleFormat::sniff(&String::from_utf8_lossy(&head))
}

/// A video next to `subtitle` sharing its stem, also trying the stem with
/// trailing tags such as `.en` or `.en.forced` removed.
pub fn companion_video(subtitle: &Path) -> Option<PathBuf> {
    let dir = subtitle.parent().unwrap_or_else(|| Path::new(""));
    let mut stem = subtitle.file_stem()?.to_str()?.to_string();

    for _ in 0..3 {
        for ext in VIDEO_EXTENSIONS {
            for candidate in [ext.to_string(), ext.to_ascii_uppercase()] {
                let path = dir.join(format!("{stem}.{candidate}"));
                if path.is_file() {
                    return Some(path);
                }
            }
        }
        match stem.rsplit_once('.') {
            Some((base, tag)) if is_tag(tag) && !base.is_empty() => stem = base.to_string(),
            _ => break,
        }
    }
    None
}

fn is_tag(tag: &str) -> bool {
    (2..=8).contains(&tag.len()) && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
