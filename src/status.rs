use crate::document::DocumentKey;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Progress and diagnostics reported to the caller while the engine works.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    ScanStarted {
        paths: usize,
    },
    ScanProgress {
        scanned: usize,
        total: usize,
    },
    ExtractionFailed {
        container: PathBuf,
        reason: String,
    },
    TrackSkipped {
        container: PathBuf,
        track: usize,
        codec: String,
    },
    ScanComplete {
        files_scanned: usize,
        documents: usize,
        failures: usize,
    },
    DocumentCached {
        key: DocumentKey,
        display_name: String,
        degraded: bool,
    },
    EncodingUncertain {
        key: DocumentKey,
    },
    ParseDegraded {
        key: DocumentKey,
        skipped: usize,
    },
    WarmComplete {
        cached: usize,
        degraded: usize,
        failed: usize,
    },
}

pub type StatusCallback = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

/// Shared, set-once destination for status events. Clones share the slot.
#[derive(Clone, Default)]
pub struct StatusSink {
    callback: Arc<OnceLock<StatusCallback>>,
}

impl StatusSink {
    /// Install the callback. Returns false if one was already set.
    pub fn set(&self, callback: StatusCallback) -> bool {
        self.callback.set(callback).is_ok()
    }

    pub fn emit(&self, event: StatusEvent) {
        if let Some(callback) = self.callback.get() {
            callback(&event);
        }
    }
}

impl std::fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSink")
            .field("installed", &self.callback.get().is_some())
            .finish()
    }
}
