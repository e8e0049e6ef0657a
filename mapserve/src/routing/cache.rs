//! Routing context cache.
//!
//! Building a routing context loads and indexes the hierarchical route graph
//! of the shared routing file, which takes seconds and a lot of memory. The
//! cache keeps a small number of prepared contexts per profile and hands them
//! out exclusively to one request at a time.
//!
//! ```text
//! checkout(config)
//!   ├── contexts on a replaced file ─► evict (free) or mark (busy)
//!   ├── free context, same key ─────► reuse
//!   ├── free context, same profile ─► reconfigure + invalidate segments
//!   ├── below caps ─────────────────► reserve slot, build outside the lock
//!   └── otherwise ──────────────────► wait (retry slices) until timeout → None
//!
//! ContextLease::drop ──► reset search state ──► checkin (Free | evict)
//! ```
//!
//! All state transitions happen under one cache lock. Graph work (building,
//! reconfiguring, resetting) runs outside it on the graph's own mutex.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::engine::{RouterConfig, RoutingEngine, RoutingGraph};
use super::memory;
use crate::catalog::MapCatalog;
use crate::map_file::MapReader;
use crate::pool::MapFileHandle;
use crate::telemetry::RoutingMetrics;

type SharedGraph = Arc<Mutex<Box<dyn RoutingGraph>>>;

/// Configuration for the routing context cache.
#[derive(Debug, Clone)]
pub struct ContextCacheConfig {
    /// Maximum contexts per profile (default: car, bicycle, pedestrian = 2).
    pub profile_caps: HashMap<String, usize>,
    /// Cap for profiles not listed in `profile_caps` (default: 1).
    pub default_cap: usize,
    /// Maximum contexts across all profiles (default: 8).
    pub global_cap: usize,
    /// Number of contexts above which the sweep evicts by importance (default: 5).
    pub hint_threshold: usize,
    /// Contexts older than this are evicted (default: 4 hours).
    pub max_lifetime: Duration,
    /// How long `checkout` waits for a context (default: 6s).
    pub checkout_timeout: Duration,
    /// Re-check interval while waiting (default: 1s).
    pub retry_interval: Duration,
    /// Interval of the background sweep (default: 5 minutes).
    pub sweep_interval: Duration,
    /// Resident memory above which segments are released (default: none).
    pub memory_limit_bytes: Option<u64>,
    /// Floor for the age term of the importance formula, in minutes (default: 1/60).
    pub min_minutes_alive: f64,
}

impl Default for ContextCacheConfig {
    fn default() -> Self {
        let profile_caps = ["car", "bicycle", "pedestrian"]
            .into_iter()
            .map(|p| (p.to_string(), 2))
            .collect();
        Self {
            profile_caps,
            default_cap: 1,
            global_cap: 8,
            hint_threshold: 5,
            max_lifetime: Duration::from_secs(4 * 60 * 60),
            checkout_timeout: Duration::from_secs(6),
            retry_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5 * 60),
            memory_limit_bytes: None,
            min_minutes_alive: 1.0 / 60.0,
        }
    }
}

impl ContextCacheConfig {
    pub fn with_profile_cap(mut self, profile: impl Into<String>, cap: usize) -> Self {
        self.profile_caps.insert(profile.into(), cap);
        self
    }

    pub fn with_default_cap(mut self, cap: usize) -> Self {
        self.default_cap = cap;
        self
    }

    pub fn with_global_cap(mut self, cap: usize) -> Self {
        self.global_cap = cap;
        self
    }

    pub fn with_hint_threshold(mut self, threshold: usize) -> Self {
        self.hint_threshold = threshold;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_memory_limit(mut self, bytes: Option<u64>) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Context cap for `profile`.
    pub fn cap_for(&self, profile: &str) -> usize {
        self.profile_caps
            .get(profile)
            .copied()
            .unwrap_or(self.default_cap)
    }
}

/// Lifecycle state of a cached context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Free,
    Busy,
    /// Busy, and dropped instead of freed on checkin.
    Evicting,
}

/// How a checkout was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutKind {
    /// Existing context with identical parameters.
    Reused,
    /// Existing context reconfigured for new parameters.
    Rebuilt,
    /// Freshly built context.
    Built,
}

struct CachedContext {
    id: u64,
    profile: String,
    /// [`RouterConfig::context_key`] the graph is configured with.
    params: String,
    /// `None` while the context is being built.
    graph: Option<SharedGraph>,
    reader: Option<Arc<dyn MapReader>>,
    /// Catalog handle the graph was built from.
    source: Option<Arc<MapFileHandle>>,
    created: Instant,
    locked_at: Option<Instant>,
    usage: u64,
    state: ContextState,
    reclaim: bool,
}

impl CachedContext {
    fn reserved(id: u64, profile: &str, params: &str, now: Instant) -> Self {
        Self {
            id,
            profile: profile.to_string(),
            params: params.to_string(),
            graph: None,
            reader: None,
            source: None,
            created: now,
            locked_at: Some(now),
            usage: 1,
            state: ContextState::Busy,
            reclaim: false,
        }
    }

    fn is_free(&self) -> bool {
        self.state == ContextState::Free && self.graph.is_some()
    }

    /// Built from a file that has since been replaced.
    fn is_stale(&self) -> bool {
        self.source.as_ref().is_some_and(|h| h.is_retired())
    }

    /// `(usage + 1) / minutes_alive`, with the age floored at `min_minutes`.
    fn importance(&self, now: Instant, min_minutes: f64) -> f64 {
        let minutes = now.saturating_duration_since(self.created).as_secs_f64() / 60.0;
        (self.usage + 1) as f64 / minutes.max(min_minutes)
    }
}

/// Point-in-time view of one cached context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub id: u64,
    pub profile: String,
    pub params: String,
    pub state: ContextState,
    pub usage: u64,
    pub age: Duration,
    pub locked_for: Option<Duration>,
    pub importance: f64,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    /// Busy contexts marked for eviction on checkin.
    pub marked: usize,
    /// Free contexts whose segments were released.
    pub released: usize,
}

/// Cache of prepared routing contexts over one shared routing file.
pub struct RoutingContextCache {
    config: ContextCacheConfig,
    engine: Arc<dyn RoutingEngine>,
    catalog: Arc<MapCatalog>,
    routing_file: Option<PathBuf>,
    metrics: Arc<RoutingMetrics>,
    contexts: Mutex<Vec<CachedContext>>,
    available: Condvar,
    next_id: AtomicU64,
}

impl RoutingContextCache {
    /// Creates a cache. Without a `routing_file` every checkout returns `None`.
    pub fn new(
        config: ContextCacheConfig,
        engine: Arc<dyn RoutingEngine>,
        catalog: Arc<MapCatalog>,
        routing_file: Option<PathBuf>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        Self {
            config,
            engine,
            catalog,
            routing_file,
            metrics,
            contexts: Mutex::new(Vec::new()),
            available: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &ContextCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.routing_file.is_some()
    }

    /// Number of contexts, including ones being built.
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contexts(&self) -> Vec<ContextInfo> {
        let now = Instant::now();
        self.contexts
            .lock()
            .iter()
            .map(|c| ContextInfo {
                id: c.id,
                profile: c.profile.clone(),
                params: c.params.clone(),
                state: c.state,
                usage: c.usage,
                age: now.saturating_duration_since(c.created),
                locked_for: c.locked_at.map(|t| now.saturating_duration_since(t)),
                importance: c.importance(now, self.config.min_minutes_alive),
            })
            .collect()
    }

    /// Checks out a context for `config`, waiting up to the checkout timeout.
    pub fn checkout(self: &Arc<Self>, config: &RouterConfig) -> Option<ContextLease> {
        let routing_file = self.routing_file.as_ref()?;
        let params = config.context_key();
        let deadline = Instant::now() + self.config.checkout_timeout;
        let mut contexts = self.contexts.lock();

        loop {
            let mut report = SweepReport::default();
            let stale = take_stale(&mut contexts, &mut report);
            if !stale.is_empty() {
                self.available.notify_all();
                drop(contexts);
                debug!(evicted = stale.len(), "Evicting routing contexts built from a replaced file");
                self.finish_evictions(stale);
                contexts = self.contexts.lock();
                continue;
            }

            let pick = contexts
                .iter()
                .position(|c| c.is_free() && c.profile == config.profile && c.params == params)
                .map(|i| (i, false))
                .or_else(|| {
                    contexts
                        .iter()
                        .position(|c| c.is_free() && c.profile == config.profile)
                        .map(|i| (i, true))
                });

            if let Some((index, mismatch)) = pick {
                let now = Instant::now();
                let ctx = &mut contexts[index];
                ctx.state = ContextState::Busy;
                ctx.locked_at = Some(now);
                ctx.usage += 1;
                if mismatch {
                    ctx.params = params.clone();
                }
                let id = ctx.id;
                let graph = ctx.graph.clone()?;
                let reader = ctx.reader.clone()?;
                drop(contexts);
                return self.lease_existing(id, graph, reader, config, mismatch);
            }

            if self.has_capacity(&contexts, &config.profile) {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                contexts.push(CachedContext::reserved(id, &config.profile, &params, Instant::now()));
                drop(contexts);
                return self.build(id, routing_file, config);
            }

            let now = Instant::now();
            if now >= deadline {
                drop(contexts);
                self.metrics.checkout_timed_out();
                debug!(profile = %config.profile, waited = ?self.config.checkout_timeout, "Context checkout timed out");
                return None;
            }
            let slice = (deadline - now).min(self.config.retry_interval);
            self.available.wait_for(&mut contexts, slice);
        }
    }

    fn has_capacity(&self, contexts: &[CachedContext], profile: &str) -> bool {
        let of_profile = contexts.iter().filter(|c| c.profile == profile).count();
        of_profile < self.config.cap_for(profile) && contexts.len() < self.config.global_cap
    }

    fn lease_existing(
        self: &Arc<Self>,
        id: u64,
        graph: SharedGraph,
        reader: Arc<dyn MapReader>,
        config: &RouterConfig,
        mismatch: bool,
    ) -> Option<ContextLease> {
        let kind = if mismatch {
            let rebuilt = {
                let mut g = graph.lock();
                g.reconfigure(config).map(|()| g.invalidate_segments())
            };
            if let Err(e) = rebuilt {
                warn!(profile = %config.profile, error = %e, "Failed to reconfigure routing context");
                self.discard(id);
                return None;
            }
            self.metrics.context_rebuilt();
            debug!(id, profile = %config.profile, "Rebuilt routing context for new parameters");
            CheckoutKind::Rebuilt
        } else {
            self.metrics.context_reused();
            CheckoutKind::Reused
        };

        Some(ContextLease {
            cache: Arc::clone(self),
            id,
            graph,
            reader,
            kind,
        })
    }

    fn build(self: &Arc<Self>, id: u64, routing_file: &Path, config: &RouterConfig) -> Option<ContextLease> {
        let started = Instant::now();
        let built = self
            .catalog
            .handle_or_register(routing_file)
            .map_err(|e| e.to_string())
            .and_then(|handle| {
                self.catalog
                    .pool()
                    .open_dedicated(&handle)
                    .map(|reader| (handle, reader))
                    .map_err(|e| e.to_string())
            })
            .and_then(|(handle, reader)| {
                self.engine
                    .build_graph(config, std::slice::from_ref(&reader))
                    .map(|graph| (graph, reader, handle))
                    .map_err(|e| e.to_string())
            });

        let (graph, reader, source) = match built {
            Ok(built) => built,
            Err(error) => {
                warn!(profile = %config.profile, %error, "Failed to build routing context");
                self.discard(id);
                return None;
            }
        };

        let graph: SharedGraph = Arc::new(Mutex::new(graph));
        {
            let mut contexts = self.contexts.lock();
            match contexts.iter_mut().find(|c| c.id == id) {
                Some(ctx) => {
                    ctx.graph = Some(Arc::clone(&graph));
                    ctx.reader = Some(Arc::clone(&reader));
                    ctx.source = Some(source);
                }
                None => {
                    // Reserved slots are never swept, so this only happens on misuse.
                    warn!(id, "Reserved routing context disappeared during build");
                    self.catalog.pool().dedicated_closed();
                    return None;
                }
            }
        }
        self.metrics.context_built();
        info!(
            id,
            profile = %config.profile,
            params = %config.context_key(),
            took_ms = started.elapsed().as_millis() as u64,
            "Built routing context"
        );

        Some(ContextLease {
            cache: Arc::clone(self),
            id,
            graph,
            reader,
            kind: CheckoutKind::Built,
        })
    }

    /// Drops a context that never became usable.
    fn discard(&self, id: u64) {
        let removed = {
            let mut contexts = self.contexts.lock();
            let removed = contexts
                .iter()
                .position(|c| c.id == id)
                .map(|i| contexts.remove(i));
            self.available.notify_all();
            removed
        };
        if let Some(ctx) = removed {
            if ctx.graph.is_some() {
                self.metrics.context_evicted();
            }
            if ctx.reader.is_some() {
                self.catalog.pool().dedicated_closed();
            }
        }
    }

    fn checkin(&self, id: u64, graph: &Mutex<Box<dyn RoutingGraph>>) {
        let reclaim = self
            .contexts
            .lock()
            .iter_mut()
            .find(|c| c.id == id)
            .map(|c| mem::take(&mut c.reclaim))
            .unwrap_or(false);

        {
            let mut g = graph.lock();
            g.reset_search_state();
            if reclaim {
                g.release_segments();
            }
        }

        let evicted = {
            let mut contexts = self.contexts.lock();
            let Some(index) = contexts.iter().position(|c| c.id == id) else {
                warn!(id, "Checked in an unknown routing context");
                return;
            };
            let evicted = match contexts[index].state {
                ContextState::Busy => {
                    let ctx = &mut contexts[index];
                    ctx.state = ContextState::Free;
                    ctx.locked_at = None;
                    None
                }
                ContextState::Evicting => Some(contexts.remove(index)),
                ContextState::Free => {
                    warn!(id, "Checked in a routing context that was already free");
                    None
                }
            };
            self.available.notify_all();
            evicted
        };

        if let Some(ctx) = evicted {
            self.finish_eviction(&ctx);
            drop(ctx);
            memory::reclaim_logged(1);
        }
    }

    fn finish_eviction(&self, ctx: &CachedContext) {
        self.metrics.context_evicted();
        if ctx.reader.is_some() {
            self.catalog.pool().dedicated_closed();
        }
        debug!(id = ctx.id, profile = %ctx.profile, usage = ctx.usage, "Evicted routing context");
    }

    fn finish_evictions(&self, evicted: Vec<CachedContext>) {
        let count = evicted.len();
        for ctx in &evicted {
            self.finish_eviction(ctx);
        }
        drop(evicted);
        if count > 0 {
            memory::reclaim_logged(count);
        }
    }

    /// Evicts every free context and marks busy ones for eviction on checkin.
    ///
    /// Used on shutdown. Contexts still being built are left alone; they are
    /// dropped with the cache.
    pub fn drain(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let evicted = {
            let mut contexts = self.contexts.lock();
            let mut evicted = Vec::new();
            let mut index = 0;
            while index < contexts.len() {
                let ctx = &mut contexts[index];
                if ctx.is_free() {
                    evicted.push(contexts.remove(index));
                    continue;
                }
                if ctx.state == ContextState::Busy && ctx.graph.is_some() {
                    ctx.state = ContextState::Evicting;
                    report.marked += 1;
                }
                index += 1;
            }
            self.available.notify_all();
            evicted
        };
        report.evicted = evicted.len();
        self.finish_evictions(evicted);
        debug!(
            evicted = report.evicted,
            marked = report.marked,
            remaining = self.len(),
            "Drained routing context cache"
        );
        report
    }

    /// Evicts expired and unimportant contexts and reacts to memory pressure.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let min_minutes = self.config.min_minutes_alive;
        let mut report = SweepReport::default();
        let mut evicted: Vec<CachedContext> = Vec::new();

        {
            let mut contexts = self.contexts.lock();
            evicted.extend(take_stale(&mut contexts, &mut report));

            let mut index = 0;
            while index < contexts.len() {
                let ctx = &mut contexts[index];
                let expired = now.saturating_duration_since(ctx.created) > self.config.max_lifetime;
                if expired && ctx.is_free() {
                    evicted.push(contexts.remove(index));
                    continue;
                }
                if expired && ctx.state == ContextState::Busy && ctx.graph.is_some() {
                    ctx.state = ContextState::Evicting;
                    report.marked += 1;
                }
                index += 1;
            }

            let excess = contexts.len().saturating_sub(self.config.hint_threshold);
            evict_least_important(&mut contexts, excess, now, min_minutes, |_| true, &mut evicted);

            let mut profiles: Vec<String> = contexts.iter().map(|c| c.profile.clone()).collect();
            profiles.sort();
            profiles.dedup();
            for profile in profiles {
                let count = contexts.iter().filter(|c| c.profile == profile).count();
                let excess = count.saturating_sub(self.config.cap_for(&profile));
                evict_least_important(&mut contexts, excess, now, min_minutes, |c| c.profile == profile, &mut evicted);
            }

            let excess = contexts.len().saturating_sub(self.config.global_cap);
            evict_least_important(&mut contexts, excess, now, min_minutes, |_| true, &mut evicted);

            if let Some(limit) = self.config.memory_limit_bytes {
                let resident = memory::resident_bytes().unwrap_or(0);
                if resident > limit {
                    for ctx in contexts.iter_mut() {
                        match (&ctx.graph, ctx.state) {
                            (Some(graph), ContextState::Free) => {
                                // Free graphs are never locked outside the cache lock.
                                if let Some(mut g) = graph.try_lock() {
                                    g.release_segments();
                                    report.released += 1;
                                }
                            }
                            (Some(_), _) => ctx.reclaim = true,
                            (None, _) => {}
                        }
                    }
                    info!(
                        resident_mb = resident / 1_048_576,
                        limit_mb = limit / 1_048_576,
                        released = report.released,
                        "Routing memory above limit; releasing graph segments"
                    );
                }
            }

            if !evicted.is_empty() {
                self.available.notify_all();
            }
        }

        report.evicted = evicted.len();
        self.finish_evictions(evicted);
        if report != SweepReport::default() {
            info!(
                evicted = report.evicted,
                marked = report.marked,
                released = report.released,
                remaining = self.len(),
                "Routing context sweep"
            );
        }
        report
    }
}

/// Removes free contexts built from a replaced file and marks busy ones.
fn take_stale(contexts: &mut Vec<CachedContext>, report: &mut SweepReport) -> Vec<CachedContext> {
    let mut stale = Vec::new();
    let mut index = 0;
    while index < contexts.len() {
        let ctx = &mut contexts[index];
        if ctx.is_stale() {
            if ctx.is_free() {
                stale.push(contexts.remove(index));
                continue;
            }
            if ctx.state == ContextState::Busy {
                ctx.state = ContextState::Evicting;
                report.marked += 1;
            }
        }
        index += 1;
    }
    stale
}

/// Removes up to `count` free contexts matching `filter`, lowest importance first.
fn evict_least_important<F>(
    contexts: &mut Vec<CachedContext>,
    count: usize,
    now: Instant,
    min_minutes: f64,
    filter: F,
    out: &mut Vec<CachedContext>,
) where
    F: Fn(&CachedContext) -> bool,
{
    if count == 0 {
        return;
    }
    let mut candidates: Vec<(usize, f64)> = contexts
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_free() && filter(c))
        .map(|(i, c)| (i, c.importance(now, min_minutes)))
        .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut victims: Vec<usize> = candidates.into_iter().take(count).map(|(i, _)| i).collect();
    victims.sort_unstable_by(|a, b| b.cmp(a));
    for index in victims {
        out.push(contexts.remove(index));
    }
}

/// Exclusive use of one cached routing context.
///
/// Dropping the lease resets the graph's search state and checks the context
/// back in.
pub struct ContextLease {
    cache: Arc<RoutingContextCache>,
    id: u64,
    graph: SharedGraph,
    reader: Arc<dyn MapReader>,
    kind: CheckoutKind,
}

impl ContextLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> CheckoutKind {
        self.kind
    }

    /// The context's dedicated reader on the shared routing file.
    pub fn reader(&self) -> &Arc<dyn MapReader> {
        &self.reader
    }

    /// Locks the routing graph. Only the lease holder ever takes this lock.
    pub fn graph(&self) -> MutexGuard<'_, Box<dyn RoutingGraph>> {
        self.graph.lock()
    }

    /// Checks the context back in.
    pub fn checkin(self) {
        drop(self);
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        self.cache.checkin(self.id, &self.graph);
    }
}

impl fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLease")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.reader.path())
            .finish()
    }
}
