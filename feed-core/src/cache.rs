use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::coordinator::{CursorSnapshot, FetchCoordinator, FetchIdentity};
use crate::entity::{FeedEntity, FeedParams, ListId, PageCursor, RawEntity};
use crate::error::FeedError;
use crate::transport::FeedTransport;
use crate::viewed::{Viewed, ViewedEvent};

/// Published on every state change. Cheap to copy; carries the list length,
/// not the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatus {
    pub loading: bool,
    pub refreshing: bool,
    pub loaded: bool,
    pub error_loading: bool,
    pub len: usize,
    pub scheduled_count: usize,
    pub has_more: bool,
    pub revision: u64,
}

/// What a fetch entry point did. Fetches never return errors; failures are
/// reported through `error_loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { count: usize },
    /// Endpoint or params changed while the request was in flight.
    Stale,
    Aborted,
    Failed,
    /// Guard conditions prevented the request from being issued.
    Skipped,
}

#[derive(Debug, Default)]
struct CacheState {
    entities: Vec<FeedEntity>,
    loading: bool,
    refreshing: bool,
    loaded: bool,
    error_loading: bool,
    scheduled_count: usize,
    is_tiled: bool,
    revision: u64,
}

impl CacheState {
    fn status(&self, has_more: bool) -> CacheStatus {
        CacheStatus {
            loading: self.loading,
            refreshing: self.refreshing,
            loaded: self.loaded,
            error_loading: self.error_loading,
            len: self.entities.len(),
            scheduled_count: self.scheduled_count,
            has_more,
            revision: self.revision,
        }
    }

    fn renumber_from(&mut self, start: usize) {
        for (index, entity) in self.entities.iter_mut().enumerate().skip(start) {
            entity.position = index + 1;
        }
    }
}

#[derive(Clone, Copy)]
enum Flag {
    Loading,
    Refreshing,
}

/// Lowers a busy flag when the operation ends, including when its future
/// is dropped before completion.
struct FlagGuard<'a> {
    cache: &'a PagedFeedCache,
    flag: Flag,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        let flag = self.flag;
        self.cache.update(|s| match flag {
            Flag::Loading => s.loading = false,
            Flag::Refreshing => s.refreshing = false,
        });
    }
}

/// Ordered, paginated list of feed entities backed by a [`FetchCoordinator`].
///
/// Every fetch entry point captures the coordinator's [`FetchIdentity`]
/// before awaiting and re-checks it before touching the list, so a response
/// for a feed the caller has since navigated away from is dropped.
pub struct PagedFeedCache {
    id: ListId,
    coordinator: FetchCoordinator,
    state: Mutex<CacheState>,
    status_tx: watch::Sender<CacheStatus>,
    viewed: Viewed,
}

impl PagedFeedCache {
    pub fn new(coordinator: FetchCoordinator) -> Self {
        let id = ListId::next();
        let state = CacheState::default();
        let (status_tx, _) = watch::channel(state.status(coordinator.has_more()));
        Self {
            id,
            coordinator,
            state: Mutex::new(state),
            status_tx,
            viewed: Viewed::new(id),
        }
    }

    pub fn with_transport(transport: Arc<dyn FeedTransport>) -> Self {
        Self::new(FetchCoordinator::new(transport))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let has_more = self.coordinator.has_more();
        let (result, status) = {
            let mut s = self.lock();
            let result = f(&mut s);
            s.revision += 1;
            (result, s.status(has_more))
        };
        self.status_tx.send_replace(status);
        result
    }

    // ---- configuration ----

    pub fn set_endpoint(&self, endpoint: impl Into<String>) -> &Self {
        self.coordinator.set_endpoint(endpoint);
        self
    }

    pub fn set_params(&self, params: FeedParams) -> &Self {
        self.coordinator.set_params(params);
        self
    }

    pub fn set_limit(&self, limit: usize) -> &Self {
        self.coordinator.set_limit(limit);
        self
    }

    pub fn set_offset(&self, cursor: Option<PageCursor>) -> &Self {
        self.coordinator.set_offset(cursor);
        self
    }

    pub fn set_paginated(&self, paginated: bool) -> &Self {
        self.coordinator.set_paginated(paginated);
        self
    }

    pub fn set_as_activities(&self, as_activities: bool) -> &Self {
        self.coordinator.set_as_activities(as_activities);
        self
    }

    pub fn set_inject_boost(&self, inject_boost: bool) -> &Self {
        self.coordinator.set_inject_boost(inject_boost);
        self
    }

    pub fn no_sync(&self) -> &Self {
        self.coordinator.no_sync();
        self
    }

    pub fn set_fallback_index(&self, index: Option<usize>) -> &Self {
        self.coordinator.set_fallback_index(index);
        self
    }

    pub fn set_feed(&self, feed: Vec<RawEntity>) -> &Self {
        self.coordinator.set_feed(feed);
        self
    }

    pub fn set_is_tiled(&self, is_tiled: bool) -> &Self {
        self.update(|s| s.is_tiled = is_tiled);
        self
    }

    // ---- observable state ----

    pub fn id(&self) -> ListId {
        self.id
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    pub fn entities(&self) -> Vec<FeedEntity> {
        self.lock().entities.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entities.is_empty()
    }

    pub fn loading(&self) -> bool {
        self.lock().loading
    }

    pub fn refreshing(&self) -> bool {
        self.lock().refreshing
    }

    pub fn loaded(&self) -> bool {
        self.lock().loaded
    }

    pub fn error_loading(&self) -> bool {
        self.lock().error_loading
    }

    pub fn scheduled_count(&self) -> usize {
        self.lock().scheduled_count
    }

    pub fn is_tiled(&self) -> bool {
        self.lock().is_tiled
    }

    pub fn has_more(&self) -> bool {
        self.coordinator.has_more()
    }

    pub fn fallback_index(&self) -> Option<usize> {
        self.coordinator.fallback_index()
    }

    pub fn status(&self) -> CacheStatus {
        let has_more = self.coordinator.has_more();
        self.lock().status(has_more)
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_viewed(&self) -> broadcast::Receiver<ViewedEvent> {
        self.viewed.subscribe()
    }

    pub fn get_index(&self, key: &str) -> Option<usize> {
        self.lock().entities.iter().position(|e| e.key() == key)
    }

    // ---- fetch guard plumbing ----

    fn begin(&self) -> (FetchIdentity, FlagGuard<'_>) {
        let identity = self.coordinator.identity();
        self.update(|s| {
            s.loading = true;
            s.error_loading = false;
        });
        let guard = FlagGuard {
            cache: self,
            flag: Flag::Loading,
        };
        (identity, guard)
    }

    fn is_current(&self, identity: &FetchIdentity) -> bool {
        self.coordinator.identity() == *identity
    }

    fn apply_if_current(
        &self,
        identity: &FetchIdentity,
        entities: Vec<FeedEntity>,
        replace: bool,
    ) -> FetchOutcome {
        if !self.is_current(identity) {
            debug!(endpoint = %identity.endpoint, "discarding stale page");
            return FetchOutcome::Stale;
        }
        let count = entities.len();
        self.add_entities(entities, replace);
        FetchOutcome::Applied { count }
    }

    fn fail(
        &self,
        op: &'static str,
        identity: &FetchIdentity,
        err: FeedError,
        only_when_empty: bool,
    ) -> FetchOutcome {
        if err.is_abort() {
            debug!(op, endpoint = %identity.endpoint, "fetch aborted");
            return FetchOutcome::Aborted;
        }
        if !self.is_current(identity) {
            debug!(
                op,
                endpoint = %identity.endpoint,
                error = %err,
                "ignoring failure of stale fetch"
            );
            return FetchOutcome::Stale;
        }
        warn!(op, endpoint = %identity.endpoint, error = %err, "feed fetch failed");
        self.update(|s| {
            if !only_when_empty || s.entities.is_empty() {
                s.error_loading = true;
            }
        });
        FetchOutcome::Failed
    }

    /// Rewind to the first page for a refresh, remembering where paging was.
    fn rewind(&self, refresh: bool) -> Option<CursorSnapshot> {
        refresh.then(|| {
            let snapshot = self.coordinator.cursor_snapshot();
            self.coordinator.set_offset(None);
            snapshot
        })
    }

    /// A refresh that replaced the list starts a fresh viewed set. One that
    /// failed or was aborted leaves the old entities, so their cursor comes back.
    fn settle_refresh(
        &self,
        snapshot: Option<CursorSnapshot>,
        outcome: FetchOutcome,
    ) -> FetchOutcome {
        let Some(snapshot) = snapshot else {
            return outcome;
        };
        match outcome {
            FetchOutcome::Applied { .. } => self.viewed.clear_viewed(),
            FetchOutcome::Failed | FetchOutcome::Aborted => {
                if self.coordinator.restore(snapshot) {
                    debug!(outcome = ?outcome, "refresh did not land; cursor restored");
                }
            }
            FetchOutcome::Stale | FetchOutcome::Skipped => {}
        }
        outcome
    }

    // ---- fetch entry points ----

    /// Single-source fetch: the local store when `local`, otherwise remote.
    pub async fn fetch(&self, local: bool, replace: bool) -> FetchOutcome {
        let (identity, _loading) = self.begin();
        let result = if local {
            self.coordinator
                .fetch_local()
                .await
                .map(|page| page.map(|p| p.entities).unwrap_or_default())
        } else {
            self.coordinator.fetch().await.map(|page| page.entities)
        };
        match result {
            Ok(entities) => self.apply_if_current(&identity, entities, replace),
            Err(err) => self.fail("fetch", &identity, err, false),
        }
    }

    pub async fn fetch_local_or_remote(&self, refresh: bool) -> FetchOutcome {
        let (identity, _loading) = self.begin();
        let snapshot = self.rewind(refresh);
        let outcome = match self.coordinator.fetch_local_or_remote().await {
            Ok(page) => self.apply_if_current(&identity, page.entities, refresh),
            Err(err) => self.fail("fetch_local_or_remote", &identity, err, false),
        };
        self.settle_refresh(snapshot, outcome)
    }

    pub async fn fetch_remote_or_local(&self, refresh: bool) -> FetchOutcome {
        let (identity, _loading) = self.begin();
        let snapshot = self.rewind(refresh);
        let outcome = match self.coordinator.fetch_remote_or_local().await {
            Ok(page) => self.apply_if_current(&identity, page.entities, refresh),
            Err(err) => self.fail("fetch_remote_or_local", &identity, err, false),
        };
        self.settle_refresh(snapshot, outcome)
    }

    /// Show the local page right away, then replace it with the remote one.
    pub async fn fetch_local_then_remote(&self, refresh: bool) -> FetchOutcome {
        let (identity, _loading) = self.begin();
        let mut snapshot = self.rewind(refresh);

        match self.coordinator.fetch_local().await {
            Ok(Some(page)) => {
                let outcome = self.apply_if_current(&identity, page.entities, refresh);
                if let FetchOutcome::Stale = outcome {
                    return FetchOutcome::Stale;
                }
                // the cursor now follows the local page
                snapshot = None;
                if refresh {
                    self.viewed.clear_viewed();
                }
            }
            Ok(None) => {}
            Err(err) if err.is_abort() => {
                return self.settle_refresh(snapshot, FetchOutcome::Aborted);
            }
            Err(err) => {
                warn!(
                    endpoint = %identity.endpoint,
                    error = %err,
                    "local page unavailable, waiting for remote"
                );
            }
        }

        let outcome = match self.coordinator.fetch().await {
            Ok(page) => self.apply_if_current(&identity, page.entities, true),
            Err(err) => self.fail("fetch_local_then_remote", &identity, err, true),
        };
        if let FetchOutcome::Applied { .. } = outcome {
            self.viewed.clear_viewed();
        }
        self.settle_refresh(snapshot, outcome)
    }

    /// Append the next page. Skipped while loading, before the first
    /// successful load, or when the server reported no further pages.
    pub async fn load_more(&self) -> FetchOutcome {
        let identity = self.coordinator.identity();
        let has_more = self.coordinator.has_more();
        let started = {
            let mut s = self.lock();
            if s.loading || !s.loaded || !has_more {
                false
            } else {
                s.loading = true;
                s.error_loading = false;
                s.revision += 1;
                true
            }
        };
        if !started {
            return FetchOutcome::Skipped;
        }
        self.status_tx.send_replace(self.status());
        let _loading = FlagGuard {
            cache: self,
            flag: Flag::Loading,
        };

        match self.coordinator.next().await {
            Ok(page) => self.apply_if_current(&identity, page.entities, false),
            Err(err) => self.fail("load_more", &identity, err, false),
        }
    }

    /// Pull-to-refresh: first page from remote, local as fallback.
    pub async fn refresh(&self) -> FetchOutcome {
        self.refresh_with(self.fetch_remote_or_local(true)).await
    }

    /// Run `op` with `refreshing` raised for its whole duration.
    pub async fn refresh_with<F>(&self, op: F) -> FetchOutcome
    where
        F: Future<Output = FetchOutcome>,
    {
        self.update(|s| s.refreshing = true);
        let _refreshing = FlagGuard {
            cache: self,
            flag: Flag::Refreshing,
        };
        op.await
    }

    /// Next page when the list has entities, full fetch otherwise.
    pub async fn reload(&self) -> FetchOutcome {
        if self.is_empty() {
            self.fetch(false, false).await
        } else {
            self.load_more().await
        }
    }

    /// Append whatever raw page the coordinator currently holds.
    pub fn hydrate_page(&self) {
        self.add_entities(self.coordinator.get_entities(), false);
    }

    /// Cancel in-flight requests. Affected fetches resolve as `Aborted`.
    pub fn abort(&self) {
        info!(endpoint = %self.coordinator.endpoint(), "aborting in-flight requests");
        self.coordinator.abort();
    }

    // ---- mutation primitives ----

    pub fn add_entities(&self, entities: Vec<FeedEntity>, replace: bool) {
        let id = self.id;
        self.update(|s| {
            if replace {
                s.entities.clear();
            }
            s.entities.reserve(entities.len());
            for mut entity in entities {
                entity.list_id = Some(id);
                entity.position = s.entities.len() + 1;
                s.entities.push(entity);
            }
            s.loaded = true;
        });
    }

    pub fn prepend(&self, mut entity: FeedEntity) {
        let key = entity.key();
        let scheduled = entity.is_scheduled();
        entity.list_id = Some(self.id);
        self.update(|s| {
            s.entities.insert(0, entity);
            s.renumber_from(0);
            if scheduled {
                s.scheduled_count += 1;
            }
        });
        self.coordinator.prepend(key);
    }

    pub fn remove_index(&self, index: usize) -> Option<FeedEntity> {
        self.update(|s| {
            if index >= s.entities.len() {
                return None;
            }
            let removed = s.entities.remove(index);
            s.renumber_from(index);
            if removed.is_scheduled() {
                s.scheduled_count = s.scheduled_count.saturating_sub(1);
            }
            Some(removed)
        })
    }

    pub fn remove(&self, key: &str) -> Option<FeedEntity> {
        let index = self.get_index(key)?;
        self.remove_index(index)
    }

    /// Drop every entity owned by `owner_guid`. Pulls another page when
    /// less than a page's worth is left. Returns how many were removed.
    pub async fn remove_from_owner(&self, owner_guid: &str) -> usize {
        let (removed, remaining) = self.update(|s| {
            let before = s.entities.len();
            let mut scheduled_removed = 0;
            s.entities.retain(|e| {
                let keep = !e.is_owned_by(owner_guid);
                if !keep && e.is_scheduled() {
                    scheduled_removed += 1;
                }
                keep
            });
            s.scheduled_count = s.scheduled_count.saturating_sub(scheduled_removed);
            s.renumber_from(0);
            (before - s.entities.len(), s.entities.len())
        });
        self.coordinator.remove_from_owner(owner_guid);

        if remaining < self.coordinator.limit() {
            self.load_more().await;
        }
        removed
    }

    pub fn set_visible(&self, key: &str, visible: bool) -> bool {
        self.update(|s| match s.entities.iter_mut().find(|e| e.key() == key) {
            Some(entity) => {
                entity.visible = visible;
                true
            }
            None => false,
        })
    }

    /// Report an entity as viewed once per list lifetime.
    pub fn add_viewed(
        &self,
        entity: &FeedEntity,
        medium: Option<&str>,
        position: Option<usize>,
    ) -> bool {
        self.viewed.add_viewed(entity, medium, position)
    }

    pub fn set_scheduled_count(&self, count: usize) {
        self.update(|s| s.scheduled_count = count);
    }

    /// Empty the list, reset every flag and rewind the cursor.
    pub fn clear(&self) -> &Self {
        self.coordinator.set_offset(None);
        self.update(|s| {
            s.entities.clear();
            s.loading = false;
            s.refreshing = false;
            s.loaded = false;
            s.error_loading = false;
            s.scheduled_count = 0;
        });
        self.viewed.clear_viewed();
        self
    }

    /// [`clear`](Self::clear) plus the coordinator's held page and exclusions.
    pub fn reset(&self) {
        self.clear();
        self.coordinator.clear();
        self.status_tx.send_replace(self.status());
    }
}
