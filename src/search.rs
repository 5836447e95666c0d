use crate::cache::DocumentCache;
use crate::document::{Document, DocumentKey};
use crate::error::{Result, SubsearchError};
use crate::subtitle::Cue;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One matching cue.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Arc<Document>,
    pub cue: Cue,
    /// Byte range of the first match inside `cue.text`.
    pub matched_span: Range<usize>,
    /// False for matches in text that could not be parsed into cues.
    pub timed: bool,
}

impl SearchHit {
    pub fn matched_text(&self) -> &str {
        &self.cue.text[self.matched_span.clone()]
    }
}

/// Cooperative cancellation shared between a caller and a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A trimmed, non-empty search string with its matching mode.
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    folded: String,
    case_sensitive: bool,
}

impl Query {
    pub fn new(raw: &str, case_sensitive: bool) -> Result<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(SubsearchError::InvalidQuery(
                "query is empty".to_string(),
            ));
        }
        Ok(Self {
            text: text.to_string(),
            folded: text.chars().flat_map(fold_char).collect(),
            case_sensitive,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Byte span of the first match in `haystack`.
    pub fn find(&self, haystack: &str) -> Option<Range<usize>> {
        if self.case_sensitive {
            return haystack
                .find(&self.text)
                .map(|start| start..start + self.text.len());
        }

        if haystack.is_ascii() && self.folded.is_ascii() {
            // ASCII lowering keeps byte offsets.
            let lowered = haystack.to_ascii_lowercase();
            return lowered
                .find(&self.folded)
                .map(|start| start..start + self.folded.len());
        }

        // Lowering can change byte lengths; remember which source character
        // every lowered byte came from.
        let mut lowered = String::with_capacity(haystack.len());
        let mut origin: Vec<Range<usize>> = Vec::with_capacity(haystack.len());
        for (at, c) in haystack.char_indices() {
            let source = at..at + c.len_utf8();
            for lc in fold_char(c) {
                lowered.push(lc);
                origin.extend(std::iter::repeat(source.clone()).take(lc.len_utf8()));
            }
        }

        let start = lowered.find(&self.folded)?;
        let end = start + self.folded.len();
        Some(origin[start].start..origin[end - 1].end)
    }
}

/// Case-fold one character. Query and text are folded the same way, one
/// character at a time, with final sigma treated as sigma.
fn fold_char(c: char) -> impl Iterator<Item = char> {
    c.to_lowercase().map(|l| if l == 'ς' { 'σ' } else { l })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub documents_searched: usize,
    pub documents_failed: usize,
    pub documents_matched: usize,
    pub hits: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchFailure {
    pub document: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub stats: SearchStats,
    pub failures: Vec<SearchFailure>,
}

/// Every cue of `document` containing the query, in document order. Text
/// that could not be parsed is matched line by line as untimed hits.
pub fn match_document(document: &Arc<Document>, query: &Query) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = document
        .cues
        .iter()
        .filter_map(|cue| {
            query.find(&cue.text).map(|span| SearchHit {
                document: Arc::clone(document),
                cue: cue.clone(),
                matched_span: span,
                timed: true,
            })
        })
        .collect();

    if let Some(raw) = document.raw_text.as_deref() {
        for (line_number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if let Some(span) = query.find(line) {
                hits.push(SearchHit {
                    document: Arc::clone(document),
                    cue: Cue {
                        start: Duration::ZERO,
                        end: Duration::ZERO,
                        text: line.to_string(),
                        sequence_index: line_number,
                    },
                    matched_span: span,
                    timed: false,
                });
            }
        }
    }

    hits
}

/// Display name, then start time, then source position, then backing key.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        a.document
            .display_name
            .cmp(&b.document.display_name)
            .then(a.cue.start.cmp(&b.cue.start))
            .then(a.cue.sequence_index.cmp(&b.cue.sequence_index))
            .then_with(|| a.document.key.cmp(&b.document.key))
    });
}

/// Runs a query against every registered document, one task per document.
#[derive(Debug, Clone)]
pub struct SearchCoordinator {
    cache: Arc<DocumentCache>,
}

impl SearchCoordinator {
    pub fn new(cache: Arc<DocumentCache>) -> Self {
        Self { cache }
    }

    pub async fn search(&self, query: &str, case_sensitive: bool) -> Result<SearchResults> {
        self.search_with_cancel(query, case_sensitive, &CancelFlag::new())
            .await
    }

    pub async fn search_with_cancel(
        &self,
        query: &str,
        case_sensitive: bool,
        cancel: &CancelFlag,
    ) -> Result<SearchResults> {
        let query = Arc::new(Query::new(query, case_sensitive)?);
        let started = Instant::now();

        let keys = self.cache.keys();
        if keys.is_empty() {
            debug!("No documents registered; nothing to search");
            return Ok(SearchResults {
                stats: SearchStats {
                    elapsed: started.elapsed(),
                    ..SearchStats::default()
                },
                ..SearchResults::default()
            });
        }

        let pool = Arc::clone(self.cache.pool());
        let _lane = pool.begin_search();

        info!(
            "Searching {} documents for {:?} ({})",
            keys.len(),
            query.as_str(),
            if case_sensitive { "case-sensitive" } else { "case-insensitive" }
        );

        let mut tasks: JoinSet<(DocumentKey, Result<Vec<SearchHit>>)> = JoinSet::new();
        for key in keys {
            if cancel.is_cancelled() {
                tasks.abort_all();
                return Err(SubsearchError::Cancelled);
            }

            let cache = Arc::clone(&self.cache);
            let pool = Arc::clone(&pool);
            let query = Arc::clone(&query);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = pool.acquire_search().await;
                if cancel.is_cancelled() {
                    return (key, Err(SubsearchError::Cancelled));
                }
                let result = cache
                    .get_or_parse(&key)
                    .await
                    .map(|document| match_document(&document, &query));
                (key, result)
            });
        }

        let mut results = SearchResults::default();
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!("Search cancelled");
                    return Err(SubsearchError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((_, Ok(hits))) => {
                    results.stats.documents_searched += 1;
                    if !hits.is_empty() {
                        results.stats.documents_matched += 1;
                    }
                    results.hits.extend(hits);
                }
                Ok((_, Err(SubsearchError::Cancelled))) => {
                    tasks.abort_all();
                    return Err(SubsearchError::Cancelled);
                }
                Ok((key, Err(e))) => {
                    warn!("Skipping {}: {}", key, e);
                    results.stats.documents_failed += 1;
                    results.failures.push(SearchFailure {
                        document: key.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Search task failed: {}", e);
                    results.stats.documents_failed += 1;
                    results.failures.push(SearchFailure {
                        document: "<unknown>".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        sort_hits(&mut results.hits);
        results.stats.hits = results.hits.len();
        results.stats.elapsed = started.elapsed();

        info!(
            "Found {} hits in {} documents ({} failed) in {:.2?}",
            results.stats.hits,
            results.stats.documents_matched,
            results.stats.documents_failed,
            results.stats.elapsed
        );
        Ok(results)
    }
}
