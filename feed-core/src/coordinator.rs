use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::entity::{FeedEntity, FeedParams, PageCursor, RawEntity};
use crate::error::FeedError;
use crate::transport::{FeedTransport, LocalPage, LocalPageStore, PageRequest};

pub const DEFAULT_LIMIT: usize = 12;

/// Configuration a fetch was issued under. Two identities are equal only if
/// no `set_endpoint`/`set_params` call happened in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchIdentity {
    pub endpoint: String,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Local,
    Remote,
}

/// Hydrated result of one coordinator call.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub entities: Vec<FeedEntity>,
    pub source: PageSource,
}

/// Pagination position taken before a refresh rewinds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSnapshot {
    generation: u64,
    offset: Option<PageCursor>,
    next_cursor: Option<PageCursor>,
    has_more: bool,
}

#[derive(Debug)]
struct CoordinatorState {
    endpoint: String,
    params: FeedParams,
    generation: u64,
    limit: usize,
    offset: Option<PageCursor>,
    next_cursor: Option<PageCursor>,
    has_more: bool,
    paginated: bool,
    as_activities: bool,
    inject_boost: bool,
    sync: bool,
    fallback_index: Option<usize>,
    // last raw page returned by a fetch, or preloaded with set_feed
    feed: Vec<RawEntity>,
    prepended: HashSet<String>,
    removed_owners: HashSet<String>,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            params: FeedParams::new(),
            generation: 0,
            limit: DEFAULT_LIMIT,
            offset: None,
            next_cursor: None,
            has_more: true,
            paginated: true,
            as_activities: false,
            inject_boost: false,
            sync: true,
            fallback_index: None,
            feed: Vec::new(),
            prepended: HashSet::new(),
            removed_owners: HashSet::new(),
        }
    }
}

impl CoordinatorState {
    fn identity(&self) -> FetchIdentity {
        FetchIdentity {
            endpoint: self.endpoint.clone(),
            generation: self.generation,
        }
    }

    fn request(&self) -> PageRequest {
        PageRequest {
            endpoint: self.endpoint.clone(),
            params: self.params.clone(),
            limit: self.limit,
            offset: if self.paginated { self.offset.clone() } else { None },
            as_activities: self.as_activities,
            inject_boost: self.inject_boost,
        }
    }

    fn cache_key(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}?{}", self.endpoint, params)
    }

    fn hydrate(&self, raw: &[RawEntity]) -> Vec<FeedEntity> {
        let now = Utc::now();
        raw.iter()
            .filter(|e| !self.prepended.contains(&e.key()))
            .filter(|e| {
                e.owner_guid
                    .as_deref()
                    .map_or(true, |owner| !self.removed_owners.contains(owner))
            })
            .cloned()
            .map(|e| FeedEntity::hydrate(e, now))
            .collect()
    }
}

fn normalize_offset(cursor: Option<PageCursor>) -> Option<PageCursor> {
    cursor.filter(|c| !c.is_empty() && *c != PageCursor::Offset(0))
}

/// Issues remote and local page requests and owns the pagination cursor.
///
/// The coordinator never cancels superseded requests on its own and never
/// decides whether a result is still wanted; callers compare
/// [`FetchIdentity`] values before applying what it returns. It does refuse
/// to move its own cursor for a request issued under an older identity.
pub struct FetchCoordinator {
    transport: Arc<dyn FeedTransport>,
    local: Option<Arc<dyn LocalPageStore>>,
    state: Mutex<CoordinatorState>,
    abort_tx: broadcast::Sender<()>,
}

impl FetchCoordinator {
    pub fn new(transport: Arc<dyn FeedTransport>) -> Self {
        let (abort_tx, _) = broadcast::channel(1);
        Self {
            transport,
            local: None,
            state: Mutex::new(CoordinatorState::default()),
            abort_tx,
        }
    }

    pub fn with_local_store(mut self, local: Arc<dyn LocalPageStore>) -> Self {
        self.local = Some(local);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_endpoint(&self, endpoint: impl Into<String>) -> &Self {
        let mut s = self.lock();
        s.endpoint = endpoint.into();
        s.generation += 1;
        self
    }

    pub fn set_params(&self, params: FeedParams) -> &Self {
        let mut s = self.lock();
        s.params = params;
        s.generation += 1;
        self
    }

    pub fn set_limit(&self, limit: usize) -> &Self {
        self.lock().limit = limit.max(1);
        self
    }

    /// `None`, `Offset(0)` and an empty token all mean the first page.
    pub fn set_offset(&self, cursor: Option<PageCursor>) -> &Self {
        let mut s = self.lock();
        s.offset = normalize_offset(cursor);
        if s.offset.is_none() {
            s.next_cursor = None;
            s.has_more = true;
        }
        self
    }

    pub fn set_paginated(&self, paginated: bool) -> &Self {
        self.lock().paginated = paginated;
        self
    }

    pub fn set_as_activities(&self, as_activities: bool) -> &Self {
        self.lock().as_activities = as_activities;
        self
    }

    pub fn set_inject_boost(&self, inject_boost: bool) -> &Self {
        self.lock().inject_boost = inject_boost;
        self
    }

    /// Stop mirroring remote first pages into the local store.
    pub fn no_sync(&self) -> &Self {
        self.lock().sync = false;
        self
    }

    pub fn set_fallback_index(&self, index: Option<usize>) -> &Self {
        self.lock().fallback_index = index;
        self
    }

    pub fn set_feed(&self, feed: Vec<RawEntity>) -> &Self {
        self.lock().feed = feed;
        self
    }

    pub fn identity(&self) -> FetchIdentity {
        self.lock().identity()
    }

    pub fn endpoint(&self) -> String {
        self.lock().endpoint.clone()
    }

    pub fn params(&self) -> FeedParams {
        self.lock().params.clone()
    }

    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    pub fn offset(&self) -> Option<PageCursor> {
        self.lock().offset.clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    pub fn fallback_index(&self) -> Option<usize> {
        self.lock().fallback_index
    }

    pub fn cache_key(&self) -> String {
        self.lock().cache_key()
    }

    pub fn cursor_snapshot(&self) -> CursorSnapshot {
        let s = self.lock();
        CursorSnapshot {
            generation: s.generation,
            offset: s.offset.clone(),
            next_cursor: s.next_cursor.clone(),
            has_more: s.has_more,
        }
    }

    /// Put back a cursor taken with [`cursor_snapshot`](Self::cursor_snapshot).
    /// Ignored once the endpoint or params have changed.
    pub fn restore(&self, snapshot: CursorSnapshot) -> bool {
        let mut s = self.lock();
        if s.generation != snapshot.generation {
            return false;
        }
        s.offset = snapshot.offset;
        s.next_cursor = snapshot.next_cursor;
        s.has_more = snapshot.has_more;
        true
    }

    /// Cancel every request currently awaiting the transport or the local
    /// store. Each resolves with [`FeedError::Abort`].
    pub fn abort(&self) {
        // no receivers just means nothing is in flight
        let _ = self.abort_tx.send(());
    }

    async fn abortable<T, F>(&self, fut: F) -> Result<T, FeedError>
    where
        F: Future<Output = Result<T, FeedError>>,
    {
        let mut abort_rx = self.abort_tx.subscribe();
        tokio::select! {
            result = fut => result,
            _ = abort_rx.recv() => Err(FeedError::Abort),
        }
    }

    /// Fetch the page at the current offset from the transport.
    pub async fn fetch(&self) -> Result<FetchedPage, FeedError> {
        let (request, generation, key, sync) = {
            let s = self.lock();
            (s.request(), s.generation, s.cache_key(), s.sync)
        };

        let page = self.abortable(self.transport.get(&request)).await?;

        if sync && request.offset.is_none() {
            if let Some(local) = &self.local {
                if let Err(e) = local.put_local(&key, LocalPage::from_remote(&page)).await {
                    warn!(error = %e, key = %key, "failed to mirror page into local store");
                }
            }
        }

        let mut s = self.lock();
        if s.generation == generation {
            s.next_cursor = page.next_cursor.filter(|c| !c.is_empty());
            s.has_more = s.paginated && s.next_cursor.is_some();
            if page.fallback_at.is_some() {
                s.fallback_index = page.fallback_at;
            }
            s.feed = page.entities;
            Ok(FetchedPage {
                entities: s.hydrate(&s.feed),
                source: PageSource::Remote,
            })
        } else {
            debug!(
                endpoint = %request.endpoint,
                "configuration changed during fetch; cursor left untouched"
            );
            Ok(FetchedPage {
                entities: s.hydrate(&page.entities),
                source: PageSource::Remote,
            })
        }
    }

    /// Read the cached first page for the current configuration.
    /// `Ok(None)` when nothing is stored locally.
    pub async fn fetch_local(&self) -> Result<Option<FetchedPage>, FeedError> {
        let Some(local) = self.local.clone() else {
            return Ok(None);
        };
        let (key, generation) = {
            let s = self.lock();
            (s.cache_key(), s.generation)
        };

        let Some(page) = self.abortable(local.get_local(&key)).await? else {
            debug!(key = %key, "no local page");
            return Ok(None);
        };

        let mut s = self.lock();
        if s.generation == generation {
            s.next_cursor = page.next_cursor.filter(|c| !c.is_empty());
            s.has_more = s.paginated && s.next_cursor.is_some();
            s.feed = page.entities;
            Ok(Some(FetchedPage {
                entities: s.hydrate(&s.feed),
                source: PageSource::Local,
            }))
        } else {
            Ok(Some(FetchedPage {
                entities: s.hydrate(&page.entities),
                source: PageSource::Local,
            }))
        }
    }

    /// Local first; remote when the local store is empty or unreadable.
    pub async fn fetch_local_or_remote(&self) -> Result<FetchedPage, FeedError> {
        match self.fetch_local().await {
            Ok(Some(page)) if !page.entities.is_empty() => Ok(page),
            Ok(_) => self.fetch().await,
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                warn!(error = %e, "local fetch failed, trying remote");
                self.fetch().await
            }
        }
    }

    /// Remote first; the local page when the remote call fails.
    pub async fn fetch_remote_or_local(&self) -> Result<FetchedPage, FeedError> {
        match self.fetch().await {
            Ok(page) => Ok(page),
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                warn!(error = %e, "remote fetch failed, falling back to local");
                match self.fetch_local().await {
                    Ok(Some(page)) => Ok(page),
                    Ok(None) => Err(e),
                    Err(local_err) if local_err.is_abort() => Err(local_err),
                    Err(local_err) => {
                        debug!(error = %local_err, "local fallback failed");
                        Err(e)
                    }
                }
            }
        }
    }

    /// Advance the offset to the last known next cursor and fetch.
    /// Callers check [`has_more`](Self::has_more) first.
    pub async fn next(&self) -> Result<FetchedPage, FeedError> {
        {
            let mut s = self.lock();
            if let Some(cursor) = s.next_cursor.clone() {
                s.offset = Some(cursor);
            }
        }
        self.fetch().await
    }

    /// Hydrate the last raw page held by the coordinator.
    pub fn get_entities(&self) -> Vec<FeedEntity> {
        let s = self.lock();
        s.hydrate(&s.feed)
    }

    /// Remember an entity inserted by hand so later pages skip it.
    pub fn prepend(&self, key: impl Into<String>) {
        self.lock().prepended.insert(key.into());
    }

    pub fn remove_from_owner(&self, owner_guid: &str) {
        let mut s = self.lock();
        s.feed
            .retain(|e| e.owner_guid.as_deref() != Some(owner_guid));
        s.removed_owners.insert(owner_guid.to_owned());
    }

    /// Back to the first page, dropping the held page and exclusions.
    pub fn clear(&self) {
        let mut s = self.lock();
        s.offset = None;
        s.next_cursor = None;
        s.has_more = true;
        s.fallback_index = None;
        s.feed.clear();
        s.prepended.clear();
        s.removed_owners.clear();
    }
}
