use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use depthsync_protocol::{
    ChangedFields, DepthRange, DepthSnapshot, EngineConfig, Notification, QualityTier,
};
use tracing::{debug, trace, warn};

use super::build::{BuildContext, TileRenderer, render_guarded};
use super::cancel::{CancellationSource, CancellationToken};
use super::entry::{BuildOrigin, BuildState, CacheEntry, Payload};
use super::error::{BuildError, CacheError};
use super::key::{CacheKey, TileGrid};
use super::pool::{Job, WorkerPool};
use crate::input::VelocityProbe;
use crate::source::SampleSource;
use crate::state::{DepthState, ListenerId};

/// Result of a non-blocking cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Payload),
    /// A build for the key is in flight.
    Pending,
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Hit(payload) => Some(payload),
            Self::Pending | Self::Miss => None,
        }
    }
}

/// What one [`PredictiveRenderCache::poll`] observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Builds that became `Ready`.
    pub completed: usize,
    /// Builds that became `Failed`.
    pub failed: usize,
    /// Results dropped because their build was cancelled or superseded, or
    /// because they could not fit the budget.
    pub discarded: usize,
    /// Fine-tier builds scheduled because the view settled.
    pub promoted: usize,
}

impl PollReport {
    fn merge(&mut self, other: PollReport) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.discarded += other.discarded;
        self.promoted += other.promoted;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
    pub resident_bytes: u64,
    pub budget_bytes: u64,
    pub builds_started: u64,
    pub builds_finished: u64,
    pub builds_failed: u64,
    pub builds_cancelled: u64,
    pub evictions: u64,
    pub workers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    evictions: AtomicU64,
}

struct Completion {
    key: CacheKey,
    build_id: u64,
    result: Result<Vec<u8>, BuildError>,
}

/// A build that has been marked `Pending` but not yet handed to a worker.
struct QueuedBuild {
    key: CacheKey,
    build_id: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<CacheKey, CacheEntry>,
    pinned: HashSet<CacheKey>,
    resident_bytes: u64,
    clock: u64,
    next_build: u64,
}

impl Store {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn state_of(&self, key: &CacheKey) -> Option<BuildState> {
        self.entries.get(key).map(CacheEntry::build_state)
    }

    fn needs_build(&self, key: &CacheKey) -> bool {
        matches!(self.state_of(key), None | Some(BuildState::Failed))
    }

    fn touch(&mut self, key: &CacheKey) -> Option<Payload> {
        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_access = tick;
        entry.payload.clone()
    }

    /// Insert a fresh `Pending` entry, replacing a failed one.
    fn begin_build(&mut self, key: CacheKey, origin: BuildOrigin) -> (u64, CancellationToken) {
        self.next_build += 1;
        let build_id = self.next_build;
        let tick = self.tick();
        let entry = CacheEntry::pending(key, origin, build_id, tick);
        let token = entry
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::never, CancellationSource::token);
        if let Some(old) = self.entries.insert(key, entry) {
            self.resident_bytes = self.resident_bytes.saturating_sub(old.size_bytes as u64);
        }
        (build_id, token)
    }

    /// Evict least-recently-accessed `Ready` entries that are neither pinned
    /// nor `key` itself until `incoming` more bytes fit. Returns whether they
    /// do, and how many entries went.
    fn make_room(&mut self, incoming: u64, key: &CacheKey, budget: u64) -> (bool, u64) {
        let mut evicted = 0;
        while self.resident_bytes + incoming > budget {
            let victim = self
                .entries
                .values()
                .filter(|e| {
                    e.build_state == BuildState::Ready
                        && e.key != *key
                        && !self.pinned.contains(&e.key)
                })
                .min_by_key(|e| e.last_access)
                .map(|e| e.key);
            let Some(victim) = victim else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.resident_bytes = self.resident_bytes.saturating_sub(entry.size_bytes as u64);
                debug!(range = %victim.range, tier = %victim.tier, bytes = entry.size_bytes, "cache entry evicted");
                evicted += 1;
            }
        }
        (self.resident_bytes + incoming <= budget, evicted)
    }
}

/// The last viewport the cache was told about, for settle detection.
#[derive(Debug, Default)]
struct ViewTracker {
    viewport: Option<DepthRange>,
    zoom: f64,
    grid: Option<TileGrid>,
    changed_at: Option<Instant>,
    promoted: bool,
}

struct Inner {
    config: EngineConfig,
    renderer: Arc<dyn TileRenderer>,
    source: Arc<dyn SampleSource>,
    store: Mutex<Store>,
    view: Mutex<ViewTracker>,
    done_tx: Sender<Completion>,
    done_rx: Mutex<Receiver<Completion>>,
    counters: Arc<Counters>,
    // Last field: dropping it joins the workers after everything above is gone.
    pool: WorkerPool,
}

impl Inner {
    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_view(&self) -> MutexGuard<'_, ViewTracker> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    // Runs before the fields drop, so queued builds see the cancellation
    // before the pool waits for them.
    fn drop(&mut self) {
        let store = self.lock_store();
        let mut cancelled = 0usize;
        for entry in store.entries.values().filter(|entry| entry.is_pending()) {
            entry.cancel_build();
            cancelled += 1;
        }
        if cancelled > 0 {
            debug!(cancelled, "cache dropped; pending builds cancelled");
        }
    }
}

/// Render payloads for the viewport and the depth windows it is heading
/// toward, built on a small worker pool.
///
/// Keys are tiles of a [`TileGrid`] at the current zoom. Each viewport
/// change ([`observe`](Self::observe)) recomputes the prediction window,
/// cancels predicted builds that fell out of it and schedules coarse builds
/// for the tiles in it. Once the viewport has been still for the settle
/// delay, [`poll`](Self::poll) schedules fine builds for the visible tiles.
///
/// Nothing here blocks on a build. The entry map sits behind one lock held
/// only for lookups and updates; rendering happens with no lock held.
/// Cloning the handle shares the same cache. Dropping the last handle
/// cancels every pending build, then joins the workers.
#[derive(Clone)]
pub struct PredictiveRenderCache {
    inner: Arc<Inner>,
}

impl PredictiveRenderCache {
    pub fn new(
        config: EngineConfig,
        renderer: Arc<dyn TileRenderer>,
        source: Arc<dyn SampleSource>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let pool = WorkerPool::new(config.worker_threads, "depthsync-render")?;
        let (done_tx, done_rx) = mpsc::channel();
        debug!(
            budget = config.max_cache_budget_bytes,
            workers = pool.size(),
            "render cache created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                renderer,
                source,
                store: Mutex::new(Store::default()),
                view: Mutex::new(ViewTracker::default()),
                done_tx,
                done_rx: Mutex::new(done_rx),
                counters: Arc::new(Counters::default()),
                pool,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Look `key` up without blocking. A `Failed` entry reads as a miss and
    /// schedules a retry.
    pub fn query(&self, key: &CacheKey) -> CacheLookup {
        self.drain();
        let mut queued = Vec::new();
        let lookup = {
            let mut store = self.inner.lock_store();
            match store.state_of(key) {
                Some(BuildState::Ready) => store.touch(key).map_or(CacheLookup::Miss, CacheLookup::Hit),
                Some(BuildState::Pending) => CacheLookup::Pending,
                Some(BuildState::Failed) => {
                    let origin = store
                        .entries
                        .get(key)
                        .map_or(BuildOrigin::Requested, CacheEntry::origin);
                    trace!(range = %key.range, tier = %key.tier, "retrying failed build");
                    queued.push(self.schedule(&mut store, *key, origin));
                    CacheLookup::Miss
                }
                None => CacheLookup::Miss,
            }
        };
        self.submit(queued);
        lookup
    }

    /// Force a build for `key` regardless of the prediction window. At most
    /// one build per key is ever in flight: a key already `Pending` returns
    /// `Pending` and starts nothing.
    pub fn request_build(&self, key: &CacheKey) -> CacheLookup {
        self.drain();
        let mut queued = Vec::new();
        let lookup = {
            let mut store = self.inner.lock_store();
            match store.state_of(key) {
                Some(BuildState::Ready) => store.touch(key).map_or(CacheLookup::Miss, CacheLookup::Hit),
                Some(BuildState::Pending) => {
                    if let Some(entry) = store.entries.get_mut(key) {
                        entry.origin = BuildOrigin::Requested;
                    }
                    CacheLookup::Pending
                }
                Some(BuildState::Failed) | None => {
                    queued.push(self.schedule(&mut store, *key, BuildOrigin::Requested));
                    CacheLookup::Pending
                }
            }
        };
        self.submit(queued);
        lookup
    }

    /// Best available payload for a tile: fine first, then coarse.
    pub fn query_best(&self, range: DepthRange, zoom: f64) -> Option<(QualityTier, Payload)> {
        [QualityTier::Fine, QualityTier::Coarse]
            .into_iter()
            .find_map(|tier| {
                self.query(&CacheKey::new(range, zoom, tier))
                    .into_payload()
                    .map(|payload| (tier, payload))
            })
    }

    /// Render `key` on the calling thread, bypassing the cache.
    pub fn render_direct(&self, key: &CacheKey) -> Result<Payload, BuildError> {
        trace!(range = %key.range, tier = %key.tier, "direct render");
        let ctx = BuildContext::uncancellable(*key);
        let bytes = render_guarded(self.inner.renderer.as_ref(), &ctx, self.inner.source.as_ref())?;
        Ok(Payload::from(bytes))
    }

    pub fn entry_state(&self, key: &CacheKey) -> Option<BuildState> {
        self.inner.lock_store().state_of(key)
    }

    /// React to a new depth state: refresh the pinned set, cancel predicted
    /// builds outside the new prediction window and schedule coarse builds
    /// for the tiles inside it. Returns how many builds were scheduled.
    pub fn observe(&self, snapshot: &DepthSnapshot, velocity: f64, now: Instant) -> usize {
        let grid = TileGrid::new(snapshot.bounds, snapshot.default_span(), snapshot.zoom);
        {
            let mut view = self.inner.lock_view();
            if view.viewport != Some(snapshot.viewport) || view.zoom != snapshot.zoom {
                view.viewport = Some(snapshot.viewport);
                view.zoom = snapshot.zoom;
                view.grid = Some(grid);
                view.changed_at = Some(now);
                view.promoted = false;
            }
        }

        let visible = grid.tiles_overlapping(&snapshot.viewport);
        let window = prediction_window(
            &snapshot.viewport,
            &snapshot.bounds,
            velocity,
            self.inner.config.predictive_range_multiplier,
        );
        let center = snapshot.viewport.center();
        let mut ahead: Vec<DepthRange> = grid
            .tiles_overlapping(&window)
            .into_iter()
            .filter(|tile| !visible.contains(tile))
            .collect();
        ahead.sort_by(|a, b| (a.center() - center).abs().total_cmp(&(b.center() - center).abs()));

        let cap = self.inner.config.max_prefetch_tiles.max(visible.len());
        let coarse: Vec<CacheKey> = visible
            .iter()
            .chain(ahead.iter())
            .take(cap)
            .map(|tile| CacheKey::new(*tile, snapshot.zoom, QualityTier::Coarse))
            .collect();
        let pinned: HashSet<CacheKey> = visible
            .iter()
            .flat_map(|tile| QualityTier::ALL.map(|tier| CacheKey::new(*tile, snapshot.zoom, tier)))
            .collect();
        let wanted: HashSet<CacheKey> = coarse.iter().chain(pinned.iter()).copied().collect();

        let mut queued = Vec::new();
        let mut cancelled = 0u64;
        {
            let mut store = self.inner.lock_store();
            store.pinned = pinned;

            let stale: Vec<CacheKey> = store
                .entries
                .values()
                .filter(|e| {
                    e.is_pending() && e.origin == BuildOrigin::Predicted && !wanted.contains(&e.key)
                })
                .map(|e| e.key)
                .collect();
            for key in stale {
                if let Some(entry) = store.entries.remove(&key) {
                    entry.cancel_build();
                    debug!(range = %key.range, tier = %key.tier, "predicted build cancelled");
                    cancelled += 1;
                }
            }

            for key in coarse {
                if store.needs_build(&key) {
                    queued.push(self.schedule(&mut store, key, BuildOrigin::Predicted));
                }
            }
        }
        self.inner
            .counters
            .cancelled
            .fetch_add(cancelled, Ordering::Relaxed);

        let scheduled = queued.len();
        if scheduled > 0 || cancelled > 0 {
            debug!(%window, velocity, scheduled, cancelled, "prediction updated");
        }
        self.submit(queued);
        scheduled
    }

    /// A DepthState listener that feeds every range or zoom change into
    /// [`observe`](Self::observe), reading scroll velocity from `probe`.
    pub fn prediction_listener(&self, probe: VelocityProbe) -> impl FnMut(&Notification) + 'static {
        let cache = self.clone();
        move |notification: &Notification| {
            cache.observe(&notification.snapshot, probe.get(), Instant::now());
        }
    }

    /// Subscribe [`prediction_listener`](Self::prediction_listener) to
    /// `state` and prime the cache with its current snapshot.
    pub fn attach(&self, state: &mut DepthState, probe: VelocityProbe) -> ListenerId {
        self.observe(&state.snapshot(), probe.get(), Instant::now());
        state.subscribe_to(
            ChangedFields::RANGE | ChangedFields::ZOOM,
            self.prediction_listener(probe),
        )
    }

    /// Collect finished builds without blocking, then schedule fine builds
    /// for the visible tiles if the view has been still for the settle delay.
    pub fn poll(&self, now: Instant) -> PollReport {
        let mut report = self.drain();

        let settled = {
            let mut view = self.inner.lock_view();
            match (view.viewport, view.grid, view.changed_at) {
                (Some(viewport), Some(grid), Some(changed))
                    if !view.promoted
                        && now.saturating_duration_since(changed) >= self.inner.config.settle_delay() =>
                {
                    view.promoted = true;
                    Some((viewport, grid, view.zoom))
                }
                _ => None,
            }
        };

        if let Some((viewport, grid, zoom)) = settled {
            let mut queued = Vec::new();
            {
                let mut store = self.inner.lock_store();
                for tile in grid.tiles_overlapping(&viewport) {
                    let key = CacheKey::new(tile, zoom, QualityTier::Fine);
                    if store.needs_build(&key) {
                        queued.push(self.schedule(&mut store, key, BuildOrigin::Predicted));
                    }
                }
            }
            report.merge(PollReport {
                promoted: queued.len(),
                ..PollReport::default()
            });
            if !queued.is_empty() {
                debug!(%viewport, tiles = queued.len(), "view settled, promoting to fine tier");
            }
            self.submit(queued);
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let store = self.inner.lock_store();
        let mut stats = CacheStats {
            resident_bytes: store.resident_bytes,
            budget_bytes: self.inner.config.max_cache_budget_bytes,
            builds_started: counters.started.load(Ordering::Relaxed),
            builds_finished: counters.finished.load(Ordering::Relaxed),
            builds_failed: counters.failed.load(Ordering::Relaxed),
            builds_cancelled: counters.cancelled.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            workers: self.inner.pool.size(),
            ..CacheStats::default()
        };
        for entry in store.entries.values() {
            match entry.build_state {
                BuildState::Pending => stats.pending += 1,
                BuildState::Ready => stats.ready += 1,
                BuildState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// No build is pending.
    pub fn is_idle(&self) -> bool {
        self.drain();
        !self.inner.lock_store().entries.values().any(CacheEntry::is_pending)
    }

    fn schedule(&self, store: &mut Store, key: CacheKey, origin: BuildOrigin) -> QueuedBuild {
        let (build_id, token) = store.begin_build(key, origin);
        trace!(range = %key.range, tier = %key.tier, ?origin, build_id, "build scheduled");

        let renderer = Arc::clone(&self.inner.renderer);
        let source = Arc::clone(&self.inner.source);
        let counters = Arc::clone(&self.inner.counters);
        let done = self.inner.done_tx.clone();
        let job: Job = Box::new(move || {
            let ctx = BuildContext::new(key, token);
            let result = ctx.checkpoint().and_then(|()| {
                counters.started.fetch_add(1, Ordering::Relaxed);
                render_guarded(renderer.as_ref(), &ctx, source.as_ref())
            });
            let _ = done.send(Completion {
                key,
                build_id,
                result,
            });
        });
        QueuedBuild { key, build_id, job }
    }

    /// Hand queued builds to the workers. Called with no lock held.
    fn submit(&self, queued: Vec<QueuedBuild>) {
        for QueuedBuild { key, build_id, job } in queued {
            if let Err(err) = self.inner.pool.submit(job) {
                warn!(range = %key.range, %err, "could not queue build");
                let mut store = self.inner.lock_store();
                if let Some(entry) = store.entries.get_mut(&key)
                    && entry.build_id == build_id
                {
                    entry.mark_failed();
                }
            }
        }
    }

    fn drain(&self) -> PollReport {
        let mut report = PollReport::default();
        let completions: Vec<Completion> = {
            let rx = self.inner.done_rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.try_iter().collect()
        };
        if completions.is_empty() {
            return report;
        }
        let mut store = self.inner.lock_store();
        for completion in completions {
            self.apply(&mut store, completion, &mut report);
        }
        report
    }

    fn apply(&self, store: &mut Store, completion: Completion, report: &mut PollReport) {
        let Completion {
            key,
            build_id,
            result,
        } = completion;
        let current = store
            .entries
            .get(&key)
            .is_some_and(|e| e.build_id == build_id && e.is_pending());
        if !current {
            trace!(range = %key.range, tier = %key.tier, build_id, "dropping superseded build result");
            report.discarded += 1;
            return;
        }

        let counters = &self.inner.counters;
        match result {
            Ok(bytes) => {
                if self.admit(store, key, bytes) {
                    counters.finished.fetch_add(1, Ordering::Relaxed);
                    report.completed += 1;
                } else {
                    report.discarded += 1;
                }
            }
            Err(BuildError::Cancelled) => {
                store.entries.remove(&key);
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                report.discarded += 1;
            }
            Err(err) => {
                warn!(range = %key.range, tier = %key.tier, %err, "build failed");
                if let Some(entry) = store.entries.get_mut(&key) {
                    entry.mark_failed();
                }
                counters.failed.fetch_add(1, Ordering::Relaxed);
                report.failed += 1;
            }
        }
    }

    /// Store a finished payload, evicting to make room. A payload that still
    /// does not fit is kept only if it backs the viewport.
    fn admit(&self, store: &mut Store, key: CacheKey, bytes: Vec<u8>) -> bool {
        let size = bytes.len() as u64;
        let budget = self.inner.config.max_cache_budget_bytes;
        let (fits, evicted) = store.make_room(size, &key, budget);
        self.inner
            .counters
            .evictions
            .fetch_add(evicted, Ordering::Relaxed);

        if !fits {
            if !store.pinned.contains(&key) {
                debug!(range = %key.range, tier = %key.tier, size, budget, "payload does not fit budget, discarded");
                store.entries.remove(&key);
                return false;
            }
            warn!(
                range = %key.range,
                tier = %key.tier,
                resident = store.resident_bytes,
                size,
                budget,
                "pinned payload exceeds cache budget"
            );
        }

        let tick = store.tick();
        if let Some(entry) = store.entries.get_mut(&key) {
            entry.mark_ready(Payload::from(bytes), tick);
            store.resident_bytes += size;
        }
        true
    }
}

impl fmt::Debug for PredictiveRenderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictiveRenderCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// The viewport stretched to `multiplier` times its span toward the
/// direction of travel, or symmetrically when `velocity` is zero, clamped to
/// `bounds`.
pub fn prediction_window(
    viewport: &DepthRange,
    bounds: &DepthRange,
    velocity: f64,
    multiplier: f64,
) -> DepthRange {
    let span = viewport.span() * multiplier.max(1.0);
    let (from, to) = if velocity > 0.0 {
        (viewport.from(), viewport.from() + span)
    } else if velocity < 0.0 {
        (viewport.to() - span, viewport.to())
    } else {
        let half = span / 2.0;
        (viewport.center() - half, viewport.center() + half)
    };
    DepthRange::new(from, to)
        .and_then(|window| window.clamp_to(bounds))
        .unwrap_or(*viewport)
}
