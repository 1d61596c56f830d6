// ============================================================================
// CACHE WARMER - periodic per-tenant refresh of the warm tier
// ============================================================================
//
// One loop per enrolled tenant. Every `interval` the loop runs a wave: all
// warm tasks spawned together, each result written to the warm tier as it
// completes. A failing or panicking task is logged and counted; its siblings
// and the loop carry on.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheResult, TenantId, WarmCache, WarmKey};
use crate::observability::metrics::{record_warm_task, update_warm_tenants};

/// Computes one named aggregate for a tenant.
#[async_trait]
pub trait WarmTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn compute(&self, tenant: &TenantId) -> anyhow::Result<Value>;
}

/// Source of truth for which tenants exist.
///
/// Lists the tenants to warm at startup, and gates lazy enrollment: a lookup
/// only enrolls a tenant the directory knows about.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn active_tenants(&self) -> anyhow::Result<Vec<TenantId>>;

    async fn contains(&self, tenant: &TenantId) -> anyhow::Result<bool> {
        Ok(self.active_tenants().await?.contains(tenant))
    }
}

/// Fixed tenant list, usually from `CACHE_WARM_TENANTS`.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    tenants: Vec<TenantId>,
}

impl StaticTenantDirectory {
    pub fn new(tenants: Vec<TenantId>) -> Self {
        Self { tenants }
    }

    pub fn from_ids(ids: &[String]) -> CacheResult<Self> {
        let tenants = ids
            .iter()
            .map(|id| TenantId::new(id.as_str()))
            .collect::<CacheResult<Vec<_>>>()?;
        Ok(Self::new(tenants))
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn active_tenants(&self) -> anyhow::Result<Vec<TenantId>> {
        Ok(self.tenants.clone())
    }

    async fn contains(&self, tenant: &TenantId) -> anyhow::Result<bool> {
        Ok(self.tenants.contains(tenant))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmerState {
    Idle,
    Warming,
}

/// Outcome counts of one wave.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmCycleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
    pub pruned: usize,
}

struct TenantWorker {
    warming: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct WarmContext {
    cache: Arc<WarmCache>,
    tasks: Vec<Arc<dyn WarmTask>>,
    interval: Duration,
}

impl WarmContext {
    async fn run_wave(&self, tenant: &TenantId) -> WarmCycleReport {
        let mut report = WarmCycleReport::default();
        let mut wave = JoinSet::new();

        for task in &self.tasks {
            let task = Arc::clone(task);
            let tenant = tenant.clone();
            wave.spawn(async move {
                let started = Instant::now();
                let outcome = AssertUnwindSafe(task.compute(&tenant)).catch_unwind().await;
                (task, started.elapsed(), outcome)
            });
        }

        while let Some(joined) = wave.join_next().await {
            match joined {
                Ok((task, elapsed, Ok(Ok(data)))) => {
                    self.cache
                        .put(WarmKey::new(tenant.clone(), task.name()), data);
                    record_warm_task(task.name(), "success", elapsed.as_secs_f64());
                    report.succeeded += 1;
                }
                Ok((task, elapsed, Ok(Err(e)))) => {
                    warn!(tenant = %tenant, task = task.name(), error = %e, "⚠️ Warm task failed");
                    record_warm_task(task.name(), "error", elapsed.as_secs_f64());
                    report.failed += 1;
                }
                Ok((task, elapsed, Err(_panic))) => {
                    error!(tenant = %tenant, task = task.name(), "❌ Warm task panicked");
                    record_warm_task(task.name(), "panic", elapsed.as_secs_f64());
                    report.panicked += 1;
                }
                Err(e) => {
                    error!(tenant = %tenant, error = %e, "❌ Warm task aborted");
                    report.panicked += 1;
                }
            }
        }

        report.pruned = self.cache.prune_expired();
        report
    }
}

async fn tenant_loop(
    tenant: TenantId,
    ctx: Arc<WarmContext>,
    warming: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if *shutdown_rx.borrow() {
        return;
    }

    let mut ticker = interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(tenant = %tenant, interval_secs = ctx.interval.as_secs(), "Warm loop started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                warming.store(true, Ordering::Release);
                let report = tokio::select! {
                    report = ctx.run_wave(&tenant) => Some(report),
                    _ = shutdown_rx.changed() => None,
                };
                warming.store(false, Ordering::Release);

                match report {
                    Some(report) => debug!(
                        tenant = %tenant,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        panicked = report.panicked,
                        "🔥 Warm wave completed"
                    ),
                    None => break,
                }
            }
        }
    }

    debug!(tenant = %tenant, "Warm loop stopped");
}

/// Owns the per-tenant warm loops.
///
/// Withdrawn tenants are remembered: only an explicit `enroll` brings them
/// back, never a lookup.
pub struct BackgroundWarmer {
    ctx: Arc<WarmContext>,
    directory: Arc<dyn TenantDirectory>,
    workers: DashMap<TenantId, TenantWorker>,
    withdrawn: DashSet<TenantId>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl BackgroundWarmer {
    pub fn new(
        cache: Arc<WarmCache>,
        tasks: Vec<Arc<dyn WarmTask>>,
        interval: Duration,
        directory: Arc<dyn TenantDirectory>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx: Arc::new(WarmContext {
                cache,
                tasks,
                interval,
            }),
            directory,
            workers: DashMap::new(),
            withdrawn: DashSet::new(),
            shutdown_tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<WarmCache> {
        &self.ctx.cache
    }

    /// Enrolls every tenant the directory reports. Returns how many were new.
    pub async fn start(&self) -> anyhow::Result<usize> {
        let tenants = self.directory.active_tenants().await?;
        let enrolled = tenants.into_iter().filter(|t| self.spawn_worker(t)).count();
        info!(
            enrolled,
            tasks = self.ctx.tasks.len(),
            interval_secs = self.ctx.interval.as_secs(),
            "🔥 Cache warmer started"
        );
        Ok(enrolled)
    }

    /// Onboarding: starts the tenant's loop, including for a tenant withdrawn
    /// earlier. Idempotent; returns whether it was newly enrolled.
    pub fn enroll(&self, tenant: TenantId) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.withdrawn.remove(&tenant);
        self.spawn_worker(&tenant)
    }

    /// Lookup path: enrolls the tenant only when the directory lists it and
    /// it was never withdrawn. Returns whether it was newly enrolled.
    pub async fn enroll_if_listed(&self, tenant: &TenantId) -> bool {
        if self.closed.load(Ordering::Acquire)
            || self.workers.contains_key(tenant)
            || self.withdrawn.contains(tenant)
        {
            return false;
        }
        match self.directory.contains(tenant).await {
            Ok(true) => self.spawn_worker(tenant),
            Ok(false) => {
                debug!(tenant = %tenant, "Lookup for a tenant outside the directory, not enrolling");
                false
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "⚠️ Tenant directory lookup failed");
                false
            }
        }
    }

    fn spawn_worker(&self, tenant: &TenantId) -> bool {
        if self.closed.load(Ordering::Acquire) || self.withdrawn.contains(tenant) {
            return false;
        }

        let newly = match self.workers.entry(tenant.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let warming = Arc::new(AtomicBool::new(false));
                let handle = tokio::spawn(tenant_loop(
                    tenant.clone(),
                    Arc::clone(&self.ctx),
                    Arc::clone(&warming),
                    self.shutdown_tx.subscribe(),
                ));
                slot.insert(TenantWorker { warming, handle });
                true
            }
        };

        if newly {
            info!(tenant = %tenant, "Tenant enrolled for cache warming");
            update_warm_tenants("enrolled", self.workers.len() as i64);
        }
        newly
    }

    pub fn is_enrolled(&self, tenant: &TenantId) -> bool {
        self.workers.contains_key(tenant)
    }

    pub fn is_withdrawn(&self, tenant: &TenantId) -> bool {
        self.withdrawn.contains(tenant)
    }

    pub fn enrolled_tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.workers.iter().map(|w| w.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// `None` when the tenant is not enrolled.
    pub fn state(&self, tenant: &TenantId) -> Option<WarmerState> {
        self.workers.get(tenant).map(|worker| {
            if worker.warming.load(Ordering::Acquire) {
                WarmerState::Warming
            } else {
                WarmerState::Idle
            }
        })
    }

    /// Runs a single wave for the tenant outside its loop.
    pub async fn warm_once(&self, tenant: &TenantId) -> WarmCycleReport {
        self.ctx.run_wave(tenant).await
    }

    /// Offboarding: stops the tenant's loop, drops its warm entries and keeps
    /// lookups from enrolling it again. Returns whether a loop was running.
    pub async fn withdraw(&self, tenant: &TenantId) -> bool {
        self.withdrawn.insert(tenant.clone());
        let Some((_, worker)) = self.workers.remove(tenant) else {
            self.ctx.cache.remove_tenant(tenant);
            return false;
        };
        worker.handle.abort();
        let _ = worker.handle.await;

        let dropped = self.ctx.cache.remove_tenant(tenant);
        update_warm_tenants("enrolled", self.workers.len() as i64);
        info!(tenant = %tenant, dropped, "Tenant withdrawn from cache warming");
        true
    }

    /// Signals every loop to stop and waits for them. Entries already written stay.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let tenants: Vec<TenantId> = self.workers.iter().map(|w| w.key().clone()).collect();
        for tenant in tenants {
            if let Some((_, worker)) = self.workers.remove(&tenant) {
                if let Err(e) = worker.handle.await {
                    warn!(tenant = %tenant, error = %e, "Warm loop ended abnormally");
                }
            }
        }
        update_warm_tenants("enrolled", 0);
        info!("🛑 Cache warmer stopped");
    }
}
