//! Paginated read cache.
//!
//! Pages for one query identity accumulate into a single growing list held by
//! a [`PaginationCache`]. The cache outlives the [`PaginatedQuery`] handles
//! that read through it, so a consumer that is torn down and recreated picks
//! up where it left off instead of refetching.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::capabilities::PageFetcher;
use crate::config::PaginationOptions;
use crate::error::{ConfigError, FetchError};
use crate::model::{Page, PageParams, QueryKey};

type Slot<T> = Arc<Mutex<PaginationState<T>>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadKind {
    Initial,
    More,
    Refresh,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page arrived; carries the number of items it held.
    Loaded(usize),
    /// The first page was already cached; nothing was fetched.
    Cached,
    /// Another load for this query is running.
    Busy,
    /// The server reported no further pages.
    Exhausted,
    /// The query was reset while the page was in flight; it was dropped.
    Discarded,
}

// ============================================================================
// Per-query state
// ============================================================================

#[derive(Debug)]
pub struct PaginationState<T> {
    items: Vec<T>,
    offset: usize,
    total_count: usize,
    has_more: bool,
    initialized: bool,
    loading: Option<LoadKind>,
    page_size: Option<usize>,
    last_error: Option<FetchError>,
    generation: u64,
}

impl<T> Default for PaginationState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            offset: 0,
            total_count: 0,
            has_more: true,
            initialized: false,
            loading: None,
            page_size: None,
            last_error: None,
            generation: 0,
        }
    }
}

impl<T> PaginationState<T> {
    fn apply(&mut self, kind: LoadKind, page: Page<T>, page_size: usize) -> usize {
        let received = page.data.len();
        match kind {
            LoadKind::Initial | LoadKind::Refresh => {
                self.items = page.data;
                self.offset = received;
            }
            LoadKind::More => {
                self.items.extend(page.data);
                self.offset += received;
            }
        }
        self.total_count = page.total_count;
        // An empty page ends the list even if the server claims otherwise.
        self.has_more = page.has_more && received > 0;
        self.initialized = true;
        self.page_size.get_or_insert(page_size);
        self.last_error = None;
        received
    }
}

/// Read-only copy of one query's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationSnapshot<T> {
    pub items: Vec<T>,
    pub offset: usize,
    pub total_count: usize,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub last_error: Option<FetchError>,
}

impl<T: Clone> From<&PaginationState<T>> for PaginationSnapshot<T> {
    fn from(state: &PaginationState<T>) -> Self {
        Self {
            items: state.items.clone(),
            offset: state.offset,
            total_count: state.total_count,
            has_more: state.has_more,
            is_loading: matches!(state.loading, Some(LoadKind::Initial | LoadKind::Refresh)),
            is_loading_more: state.loading == Some(LoadKind::More),
            last_error: state.last_error.clone(),
        }
    }
}

// ============================================================================
// Cache service
// ============================================================================

/// Query states keyed by identity. Share one instance (behind `Arc`) between
/// every query handle that should see the same lists.
#[derive(Debug)]
pub struct PaginationCache<T> {
    slots: RwLock<HashMap<QueryKey, Slot<T>>>,
}

impl<T> Default for PaginationCache<T> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> PaginationCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &QueryKey) -> Option<Slot<T>> {
        self.slots.read().await.get(key).cloned()
    }

    pub async fn get_or_create(&self, key: &QueryKey) -> Slot<T> {
        if let Some(slot) = self.get(key).await {
            return slot;
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Returns `true` if an entry was removed.
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        self.slots.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<QueryKey> {
        self.slots.read().await.keys().cloned().collect()
    }
}

// ============================================================================
// Query handle
// ============================================================================

pub struct PaginatedQuery<T> {
    key: QueryKey,
    fetcher: Arc<dyn PageFetcher<T>>,
    cache: Arc<PaginationCache<T>>,
    options: PaginationOptions,
}

impl<T: Clone + Send + 'static> PaginatedQuery<T> {
    pub fn new(
        key: QueryKey,
        fetcher: Arc<dyn PageFetcher<T>>,
        cache: Arc<PaginationCache<T>>,
        options: PaginationOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            key,
            fetcher,
            cache,
            options,
        })
    }

    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Loads the first page unless this identity already has one cached.
    pub async fn load_initial(&self) -> Result<LoadOutcome, FetchError> {
        self.load(LoadKind::Initial).await
    }

    /// Appends the next page. On an identity with nothing loaded yet this
    /// loads the first page instead.
    pub async fn load_more(&self) -> Result<LoadOutcome, FetchError> {
        self.load(LoadKind::More).await
    }

    /// Re-fetches everything shown so far in one request and replaces the
    /// list. The request size is capped at `max_refresh_limit`.
    pub async fn refresh(&self) -> Result<LoadOutcome, FetchError> {
        self.load(LoadKind::Refresh).await
    }

    /// Clears this identity and drops it from the cache. A load still in
    /// flight is discarded when it lands.
    pub async fn reset(&self) {
        if let Some(slot) = self.cache.get(&self.key).await {
            let mut state = slot.lock().await;
            let generation = state.generation.wrapping_add(1);
            *state = PaginationState {
                generation,
                ..PaginationState::default()
            };
        }
        self.cache.invalidate(&self.key).await;
        debug!(query = %self.key, "pagination reset");
    }

    pub async fn snapshot(&self) -> PaginationSnapshot<T> {
        match self.cache.get(&self.key).await {
            Some(slot) => PaginationSnapshot::from(&*slot.lock().await),
            None => PaginationSnapshot::from(&PaginationState::default()),
        }
    }

    #[instrument(skip_all, fields(query = %self.key, kind = ?requested))]
    async fn load(&self, requested: LoadKind) -> Result<LoadOutcome, FetchError> {
        let slot = self.cache.get_or_create(&self.key).await;
        let page_size = self.options.page_size;

        let (kind, params, generation) = {
            let mut state = slot.lock().await;

            if state.loading.is_some() {
                debug!("load already running");
                return Ok(LoadOutcome::Busy);
            }

            let kind = match requested {
                LoadKind::Initial if state.initialized => return Ok(LoadOutcome::Cached),
                LoadKind::More if !state.initialized => LoadKind::Initial,
                LoadKind::More if !state.has_more => return Ok(LoadOutcome::Exhausted),
                other => other,
            };

            if let Some(recorded) = state.page_size {
                if recorded != page_size {
                    warn!(recorded, page_size, "page size differs from the one this query started with");
                }
            }

            let params = match kind {
                LoadKind::Initial => PageParams {
                    limit: page_size,
                    offset: 0,
                },
                LoadKind::More => PageParams {
                    limit: page_size,
                    offset: state.offset,
                },
                LoadKind::Refresh => {
                    let wanted = state.items.len().max(page_size);
                    let limit = wanted.min(self.options.max_refresh_limit);
                    if limit < wanted {
                        warn!(
                            wanted,
                            limit, "refresh truncated to max_refresh_limit"
                        );
                    }
                    PageParams { limit, offset: 0 }
                }
            };

            state.loading = Some(kind);
            (kind, params, state.generation)
        };

        let result = self.fetcher.fetch_page(params).await;

        let mut state = slot.lock().await;
        if state.generation != generation {
            debug!("query was reset mid-load, dropping page");
            return Ok(LoadOutcome::Discarded);
        }
        state.loading = None;

        match result {
            Ok(page) => {
                let received = state.apply(kind, page, page_size);
                debug!(
                    received,
                    offset = state.offset,
                    has_more = state.has_more,
                    "page loaded"
                );
                Ok(LoadOutcome::Loaded(received))
            }
            Err(err) => {
                warn!(error = %err, offset = params.offset, "page load failed");
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}
