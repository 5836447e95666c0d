//! Parsed-document cache keyed by document identity.
//!
//! Each key owns a slot guarded by its own async mutex; the map of slots is
//! sharded, so lookups for different keys never contend. A slot's entry is
//! only served while the fingerprint of its validity file still matches the
//! one captured before the parse that produced it.

use crate::container::ContainerResolver;
use crate::document::{
    parse_content, Document, DocumentKey, DocumentSource, Fingerprint, ParseOptions, ParsedContent,
};
use crate::error::{Result, SubsearchError};
use crate::pool::WorkerPool;
use crate::status::{StatusEvent, StatusSink};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    document: Arc<Document>,
    fingerprint: Fingerprint,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Outcome of putting a fresh parse into the cache.
#[derive(Debug)]
enum Install {
    Installed(Arc<Document>),
    /// The slot was evicted meanwhile; the result is returned uncached.
    Detached(Arc<Document>),
    /// A newer, still valid entry won; the late parse is dropped.
    Superseded(Arc<Document>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub parses: usize,
    pub hits: usize,
    pub misses: usize,
    pub races_resolved: usize,
    pub entries: usize,
}

/// Summary of a background warm run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub cached: usize,
    pub degraded: usize,
    pub failed: usize,
}

/// Handle to a running warm; dropping it leaves the warm running.
#[derive(Debug)]
pub struct WarmHandle {
    task: JoinHandle<WarmReport>,
}

impl WarmHandle {
    pub async fn wait(self) -> Result<WarmReport> {
        self.task.await.map_err(|e| {
            if e.is_cancelled() {
                SubsearchError::Cancelled
            } else {
                SubsearchError::Task(e.to_string())
            }
        })
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct DocumentCache {
    sources: DashMap<DocumentKey, DocumentSource>,
    slots: DashMap<DocumentKey, Slot>,
    resolver: ContainerResolver,
    pool: Arc<WorkerPool>,
    options: ParseOptions,
    status: StatusSink,
    parses: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    races: AtomicUsize,
}

impl DocumentCache {
    pub fn new(
        resolver: ContainerResolver,
        pool: Arc<WorkerPool>,
        options: ParseOptions,
        status: StatusSink,
    ) -> Self {
        Self {
            sources: DashMap::new(),
            slots: DashMap::new(),
            resolver,
            pool,
            options,
            status,
            parses: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            races: AtomicUsize::new(0),
        }
    }

    pub fn resolver(&self) -> &ContainerResolver {
        &self.resolver
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Record a document source. A changed source for a known key drops the
    /// cached entry.
    pub fn register(&self, source: DocumentSource) -> DocumentKey {
        let key = source.key();
        let changed = self.sources.get(&key).is_some_and(|s| *s != source);
        self.sources.insert(key.clone(), source);
        if changed {
            self.invalidate(&key);
        }
        key
    }

    /// Make `sources` the registered set, evicting everything else.
    pub fn replace_sources(&self, sources: Vec<DocumentSource>) -> Vec<DocumentKey> {
        let keep: std::collections::HashSet<DocumentKey> =
            sources.iter().map(DocumentSource::key).collect();

        self.sources.retain(|key, _| keep.contains(key));
        self.slots.retain(|key, _| keep.contains(key));

        let mut keys: Vec<DocumentKey> = sources.into_iter().map(|s| self.register(s)).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Registered keys in key order.
    pub fn keys(&self) -> Vec<DocumentKey> {
        let mut keys: Vec<DocumentKey> = self.sources.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn source(&self, key: &DocumentKey) -> Option<DocumentSource> {
        self.sources.get(key).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The cached document, without checking whether it is still current.
    /// `None` while the slot is being filled.
    pub fn cached(&self, key: &DocumentKey) -> Option<Arc<Document>> {
        let slot = self.slots.get(key)?.value().clone();
        let guard = slot.try_lock().ok()?;
        guard.as_ref().map(|entry| entry.document.clone())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .slots
            .iter()
            .filter(|slot| slot.value().try_lock().map(|g| g.is_some()).unwrap_or(false))
            .count();
        CacheStats {
            parses: self.parses.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            races_resolved: self.races.load(Ordering::Relaxed),
            entries,
        }
    }

    pub fn invalidate(&self, key: &DocumentKey) {
        if self.slots.remove(key).is_some() {
            debug!("Invalidated {}", key);
        }
    }

    /// Return the current document for `key`, parsing it if the cached entry
    /// is missing or stale. Standalone paths are registered on first use.
    pub async fn get_or_parse(&self, key: &DocumentKey) -> Result<Arc<Document>> {
        let source = match self.source(key) {
            Some(source) => source,
            None => match key {
                DocumentKey::Standalone(path) => {
                    let source = DocumentSource::standalone(path.clone());
                    self.register(source.clone());
                    source
                }
                DocumentKey::ContainerTrack { .. } => {
                    return Err(SubsearchError::UnknownDocument(key.to_string()))
                }
            },
        };

        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        let live = Fingerprint::capture(source.validity_path()).await?;
        if let Some(entry) = guard.as_ref() {
            if entry.fingerprint == live {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.document.clone());
            }
            debug!("{} changed on disk; reparsing", key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let document = self.load(&source, live).await?;
        let fingerprint = document.fingerprint.clone();
        let entry = CacheEntry {
            document: Arc::new(document),
            fingerprint,
        };

        match self.install(key, &slot, &mut guard, entry) {
            Install::Installed(document) => {
                self.report(&document);
                Ok(document)
            }
            Install::Detached(document) => Ok(document),
            Install::Superseded(document) => {
                self.races.fetch_add(1, Ordering::Relaxed);
                debug!("{}", SubsearchError::CacheRaceResolved(key.to_string()));
                Ok(document)
            }
        }
    }

    /// Populate the given keys in the background on the warm lane.
    pub fn warm(self: &Arc<Self>, keys: Vec<DocumentKey>) -> WarmHandle {
        let cache = Arc::clone(self);
        let task = tokio::spawn(async move {
            let total = keys.len();
            let mut set = JoinSet::new();
            for key in keys {
                let cache = Arc::clone(&cache);
                set.spawn(async move {
                    let _permit = cache.pool.acquire_warm().await;
                    let result = cache.get_or_parse(&key).await;
                    (key, result)
                });
            }

            let mut report = WarmReport::default();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(document))) => {
                        report.cached += 1;
                        if document.parse_degraded {
                            report.degraded += 1;
                        }
                    }
                    Ok((key, Err(e))) => {
                        warn!("Failed to warm {}: {}", key, e);
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!("Warm task failed: {}", e);
                        report.failed += 1;
                    }
                }
            }

            info!(
                "Warmed {}/{} documents ({} degraded, {} failed)",
                report.cached, total, report.degraded, report.failed
            );
            cache.status.emit(StatusEvent::WarmComplete {
                cached: report.cached,
                degraded: report.degraded,
                failed: report.failed,
            });
            report
        });
        WarmHandle { task }
    }

    fn slot(&self, key: &DocumentKey) -> Slot {
        self.slots.entry(key.clone()).or_default().value().clone()
    }

    /// Parse `source`; if its validity file changes during the parse, try
    /// once more. The returned document carries the fingerprint captured
    /// before the parse that produced it.
    async fn load(&self, source: &DocumentSource, fingerprint: Fingerprint) -> Result<Document> {
        let mut fingerprint = fingerprint;
        let mut retried = false;
        loop {
            let parsed = self.parse_source(source).await?;
            self.parses.fetch_add(1, Ordering::Relaxed);

            let after = Fingerprint::capture(source.validity_path()).await?;
            if after == fingerprint || retried {
                return Ok(Document::new(source, fingerprint, parsed));
            }
            debug!("{} changed while parsing; retrying", source.key());
            fingerprint = after;
            retried = true;
        }
    }

    async fn parse_source(&self, source: &DocumentSource) -> Result<ParsedContent> {
        let (bytes, path) = match source {
            DocumentSource::Standalone { path } => (tokio::fs::read(path).await?, path.clone()),
            DocumentSource::ContainerTrack { container, track } => {
                let materialized = self.resolver.materialize(container, track).await?;
                let bytes = tokio::fs::read(materialized.path()).await?;
                (bytes, materialized.path().to_path_buf())
                // `materialized` is dropped here and the temp file removed.
            }
        };

        let options = self.options.clone();
        tokio::task::spawn_blocking(move || parse_content(&bytes, &path, &options))
            .await
            .map_err(|e| SubsearchError::Task(e.to_string()))
    }

    fn install(
        &self,
        key: &DocumentKey,
        slot: &Slot,
        guard: &mut Option<CacheEntry>,
        entry: CacheEntry,
    ) -> Install {
        let current = self.slots.get(key).map(|s| s.value().clone());
        match current {
            Some(current) if Arc::ptr_eq(&current, slot) => {
                let document = entry.document.clone();
                *guard = Some(entry);
                Install::Installed(document)
            }
            Some(current) => {
                let newer = current.try_lock().ok().and_then(|g| g.clone());
                match newer {
                    Some(newer) if newer.fingerprint == entry.fingerprint => {
                        Install::Superseded(newer.document)
                    }
                    _ => Install::Detached(entry.document),
                }
            }
            None => Install::Detached(entry.document),
        }
    }

    fn report(&self, document: &Document) {
        self.status.emit(StatusEvent::DocumentCached {
            key: document.key.clone(),
            display_name: document.display_name.clone(),
            degraded: document.parse_degraded,
        });
        if document.encoding_uncertain {
            warn!("{}", SubsearchError::EncodingUncertain(document.backing_path.clone()));
            self.status.emit(StatusEvent::EncodingUncertain {
                key: document.key.clone(),
            });
        }
        if document.parse_degraded {
            self.status.emit(StatusEvent::ParseDegraded {
                key: document.key.clone(),
                skipped: document.skipped_blocks,
            });
        }
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("sources", &self.sources.len())
            .field("slots", &self.slots.len())
            .field("resolver", &self.resolver)
            .finish()
    }
}
