use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// One bounded pool of worker permits shared by two lanes.
///
/// Foreground work (searches and container scans) takes permits directly. Warm (background) work only takes a
/// permit while no search is running, and at most one warm task queues on
/// the semaphore at a time, so a search never waits behind a backlog of warm
/// requests.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    active_searches: AtomicUsize,
    search_idle: Notify,
    warm_turn: Semaphore,
}

/// Marks a search as active for as long as it is held.
#[derive(Debug)]
pub struct SearchLane<'a> {
    pool: &'a WorkerPool,
}

impl Drop for SearchLane<'_> {
    fn drop(&mut self) {
        if self.pool.active_searches.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.pool.search_idle.notify_waiters();
        }
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        debug!("Worker pool with {} permits", size);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            active_searches: AtomicUsize::new(0),
            search_idle: Notify::new(),
            warm_turn: Semaphore::new(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn searches_active(&self) -> usize {
        self.active_searches.load(Ordering::SeqCst)
    }

    pub fn begin_search(&self) -> SearchLane<'_> {
        self.active_searches.fetch_add(1, Ordering::SeqCst);
        SearchLane { pool: self }
    }

    pub async fn acquire_search(&self) -> OwnedSemaphorePermit {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .expect("Semaphore closed")
    }

    pub async fn acquire_warm(&self) -> OwnedSemaphorePermit {
        let _turn = self.warm_turn.acquire().await.expect("Semaphore closed");
        loop {
            self.wait_for_search_idle().await;
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("Semaphore closed");
            if self.searches_active() == 0 {
                return permit;
            }
            // A search started while we were queued; let it go first.
            drop(permit);
        }
    }

    async fn wait_for_search_idle(&self) {
        loop {
            // Registered before the check so a wakeup in between is not lost.
            let notified = self.search_idle.notified();
            if self.searches_active() == 0 {
                return;
            }
            notified.await;
        }
    }
}
