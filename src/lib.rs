pub mod cache;
pub mod config;
pub mod container;
pub mod document;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod pool;
pub mod search;
pub mod status;
pub mod subtitle;

pub use cache::{CacheStats, DocumentCache, WarmHandle, WarmReport};
pub use config::Config;
pub use container::{ContainerResolver, FfmpegExtractor, MaterializedTrack, TrackExtractor, TrackInfo};
pub use document::{Document, DocumentIdentity, DocumentKey, DocumentSource, SourceKind};
pub use engine::{is_candidate, Engine, ScanFailure, ScanReport, SeekTarget};
pub use error::{Result, SubsearchError};
pub use search::{CancelFlag, Query, SearchHit, SearchResults, SearchStats};
pub use status::{StatusCallback, StatusEvent};
pub use subtitle::{Cue, SubtitleFormat};
