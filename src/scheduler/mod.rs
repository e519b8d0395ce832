//! Acquisition orchestrator: daily sweep, retry drains, initial sync.
//!
//! All acquisition work funnels through one single-flight gate, so a
//! sweep, a manual update and a retry drain can never run on top of
//! each other. Rate-limited symbols land in the retry queue and a
//! one-shot drain job is armed; everything else resolves immediately.

pub mod jobs;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::models::{Config, PeriodType, UpdateResult};
use crate::pipeline::FetchPipeline;
use crate::retry_queue::{RetryQueue, RetryQueueStatus};
use crate::store::StatementStore;

use jobs::{JobRegistry, JobStatus};

const SWEEP_JOB_ID: &str = "daily-sweep";
const DRAIN_JOB_ID: &str = "retry-drain";

/// Symbols seeded first on a fresh database, most liquid tickers first
pub const PRIORITY_SYMBOLS: &[&str] = &[
    "VCB", "BID", "CTG", "TCB", "MBB", "VPB", "ACB", "STB", "HDB", "TPB",
    "SSI", "VND", "HCM", "VCI", "VNM", "MSN", "MWG", "PNJ", "SAB", "VIC",
    "VHM", "VRE", "NVL", "KDH", "DXG", "HPG", "HSG", "NKG", "GAS", "PLX",
    "POW", "NT2", "FPT", "CMG", "VJC", "HVN", "GMD", "VSC", "DHG", "IMP",
    "DPM", "DCM", "VCG", "CTD", "REE", "GEX", "BVH", "PVS", "PVD", "KBC",
];

/// Outcome tally of the most recent sweep. A sweep that died before
/// touching any symbol carries the cause in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub symbols: usize,
    pub succeeded: usize,
    pub rate_limited: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// Structured reply for manual triggers; never an error, a busy
/// orchestrator answers with `success = false` and no results
#[derive(Debug, Clone, Serialize)]
pub struct ManualUpdateResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<UpdateResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub is_job_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_sweep: Option<SweepSummary>,
    pub retry_queue: RetryQueueStatus,
    pub jobs: Vec<JobStatus>,
}

struct SchedulerInner {
    pipeline: Arc<FetchPipeline>,
    store: Arc<StatementStore>,
    config: Config,
    started: AtomicBool,
    job_running: AtomicBool,
    initial_sync_done: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    last_sweep: Mutex<Option<SweepSummary>>,
    retry_queue: Mutex<RetryQueue>,
    jobs: JobRegistry,
}

/// Releases the single-flight gate on every exit path
struct RunningGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.job_running.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<FetchPipeline>, store: Arc<StatementStore>, config: Config) -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                pipeline,
                store,
                config,
                started: AtomicBool::new(false),
                job_running: AtomicBool::new(false),
                initial_sync_done: AtomicBool::new(false),
                last_run: Mutex::new(None),
                last_sweep: Mutex::new(None),
                retry_queue: Mutex::new(RetryQueue::new()),
                jobs: JobRegistry::new(),
            }),
        }
    }

    /// Arm the recurring daily sweep. Calling again is a no-op.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            info!("scheduler already started");
            return;
        }

        let config = &self.inner.config;
        info!(
            hour = config.sweep_hour,
            minute = config.sweep_minute,
            timezone = %config.timezone,
            "scheduling daily sweep"
        );

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let config = &scheduler.inner.config;
                let delay = duration_until_next(
                    config.sweep_hour,
                    config.sweep_minute,
                    config.timezone,
                );
                let next_run = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                scheduler.inner.jobs.set_next_run(SWEEP_JOB_ID, next_run).await;
                tokio::time::sleep(delay).await;

                // Detached so shutdown never cuts off a sweep mid-symbol
                let runner = scheduler.clone();
                tokio::spawn(async move { runner.run_sweep().await });
            }
        });
        let first_run = Utc::now()
            + chrono::Duration::from_std(duration_until_next(
                config.sweep_hour,
                config.sweep_minute,
                config.timezone,
            ))
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.inner
            .jobs
            .track(SWEEP_JOB_ID, "daily statement sweep", first_run, handle)
            .await;
    }

    /// Stop all pending timers. Work already in flight runs to completion.
    pub async fn shutdown(&self) {
        self.inner.started.store(false, Ordering::SeqCst);
        self.inner.jobs.cancel_all().await;
        info!("scheduler shut down");
    }

    /// Sweep every known symbol once. Skips silently when another job
    /// already holds the gate.
    pub async fn run_sweep(&self) {
        let guard = match self.try_begin_job() {
            Some(guard) => guard,
            None => {
                info!("sweep skipped, another update is already running");
                return;
            }
        };

        let started_at = Utc::now();
        *self.inner.last_run.lock().await = Some(started_at);

        let stocks = match self.inner.store.database().all_stocks().await {
            Ok(stocks) => stocks,
            Err(err) => {
                error!(error = %err, "sweep aborted, could not list stocks");
                *self.inner.last_sweep.lock().await = Some(SweepSummary {
                    started_at,
                    finished_at: Utc::now(),
                    symbols: 0,
                    succeeded: 0,
                    rate_limited: 0,
                    failed: 0,
                    error: Some(format!("could not list stocks: {}", err)),
                });
                return;
            }
        };

        info!(symbols = stocks.len(), "daily sweep started");
        let mut summary = SweepSummary {
            started_at,
            finished_at: started_at,
            symbols: stocks.len(),
            succeeded: 0,
            rate_limited: 0,
            failed: 0,
            error: None,
        };

        let config = &self.inner.config;
        for stock in &stocks {
            let result = self
                .update_and_track(&stock.symbol, PeriodType::Annual, config.horizon_years, None)
                .await;
            if result.rate_limited {
                summary.rate_limited += 1;
            } else if result.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            tokio::time::sleep(config.sweep_delay).await;
        }

        summary.finished_at = Utc::now();
        info!(
            succeeded = summary.succeeded,
            rate_limited = summary.rate_limited,
            failed = summary.failed,
            "daily sweep finished"
        );
        *self.inner.last_sweep.lock().await = Some(summary);
        drop(guard);
    }

    /// On-demand update of the given symbols, or all known symbols when
    /// none are supplied. Rejected wholesale while any other job holds
    /// the gate; per-symbol failures are contained and reported.
    pub async fn trigger_manual(&self, symbols: Option<Vec<String>>) -> ManualUpdateResponse {
        let guard = match self.try_begin_job() {
            Some(guard) => guard,
            None => {
                return ManualUpdateResponse {
                    success: false,
                    message: "already running".to_string(),
                    results: Vec::new(),
                }
            }
        };

        let symbols: Vec<String> = match symbols {
            Some(list) => list
                .iter()
                .map(|symbol| symbol.trim().to_uppercase())
                .filter(|symbol| !symbol.is_empty())
                .collect(),
            None => match self.inner.store.database().all_stocks().await {
                Ok(stocks) => stocks.into_iter().map(|stock| stock.symbol).collect(),
                Err(err) => {
                    return ManualUpdateResponse {
                        success: false,
                        message: format!("could not list symbols: {}", err),
                        results: Vec::new(),
                    }
                }
            },
        };

        let config = &self.inner.config;
        let mut results = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            results.push(
                self.update_and_track(symbol, PeriodType::Annual, config.horizon_years, None)
                    .await,
            );
        }
        drop(guard);

        let succeeded = results.iter().filter(|result| result.success).count();
        ManualUpdateResponse {
            success: true,
            message: format!("updated {} of {} symbols", succeeded, results.len()),
            results,
        }
    }

    /// Seed the first few priority symbols on a fresh database. Runs at
    /// most once per process.
    pub async fn sync_initial_batch(&self) {
        if self.inner.initial_sync_done.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = &self.inner.config;
        let batch: Vec<&str> = PRIORITY_SYMBOLS
            .iter()
            .copied()
            .take(config.initial_sync_limit)
            .collect();
        info!(symbols = batch.len(), "initial sync starting");

        for (index, symbol) in batch.iter().enumerate() {
            if self.has_statements(symbol).await {
                continue;
            }
            let result = self
                .update_and_track(symbol, PeriodType::Annual, config.horizon_years, None)
                .await;
            if result.rate_limited {
                // Queue what we could not reach and let the drain finish the job
                let mut queue = self.inner.retry_queue.lock().await;
                for remaining in &batch[index + 1..] {
                    if !self.has_statements(remaining).await {
                        queue.enqueue(
                            remaining,
                            PeriodType::Annual,
                            config.horizon_years,
                            None,
                        );
                    }
                }
                drop(queue);
                self.schedule_drain().await;
                warn!(symbol, "initial sync deferred by rate limit");
                break;
            }
            tokio::time::sleep(config.initial_sync_delay).await;
        }
        info!("initial sync finished");
    }

    /// Replay queued symbols against the primary provider
    pub async fn drain_retry_queue(&self) {
        let guard = match self.try_begin_job() {
            Some(guard) => guard,
            None => {
                // Gate is busy; come back after the usual delay
                self.schedule_drain().await;
                return;
            }
        };

        let config = &self.inner.config;
        let entries = self.inner.retry_queue.lock().await.snapshot();
        info!(pending = entries.len(), "retry drain started");

        for (symbol, entry) in entries {
            if entry.attempts >= config.max_retry_attempts {
                warn!(symbol = %symbol, attempts = entry.attempts, "evicting symbol, retry budget spent");
                self.inner.retry_queue.lock().await.remove(&symbol);
                continue;
            }

            let result = self
                .inner
                .pipeline
                .update_via_provider(
                    &symbol,
                    entry.period_type,
                    entry.years,
                    entry.lang.as_deref(),
                )
                .await;

            if result.rate_limited {
                // Still throttled; push everything to the next drain
                self.inner.retry_queue.lock().await.enqueue(
                    &symbol,
                    entry.period_type,
                    entry.years,
                    entry.lang.as_deref(),
                );
                drop(guard);
                self.schedule_drain().await;
                warn!(symbol = %symbol, "provider still rate limited, drain deferred");
                return;
            }

            if result.success {
                info!(symbol = %symbol, stored = result.counts.total(), "retry succeeded");
            } else {
                warn!(symbol = %symbol, error = ?result.error, "retry failed, dropping symbol");
            }
            self.inner.retry_queue.lock().await.remove(&symbol);
            tokio::time::sleep(config.drain_pause).await;
        }

        info!("retry drain finished");
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.inner.started.load(Ordering::SeqCst),
            is_job_running: self.inner.job_running.load(Ordering::SeqCst),
            last_run: *self.inner.last_run.lock().await,
            last_sweep: self.inner.last_sweep.lock().await.clone(),
            retry_queue: self.inner.retry_queue.lock().await.status(),
            jobs: self.inner.jobs.statuses().await,
        }
    }

    fn try_begin_job(&self) -> Option<RunningGuard> {
        self.inner
            .job_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(RunningGuard {
            inner: self.inner.clone(),
        })
    }

    /// Run the pipeline and reconcile the retry queue with the outcome
    async fn update_and_track(
        &self,
        symbol: &str,
        period_type: PeriodType,
        years: i32,
        lang: Option<&str>,
    ) -> UpdateResult {
        let result = self
            .inner
            .pipeline
            .update_symbol(symbol, period_type, years, lang)
            .await;

        if result.rate_limited {
            let attempts = self
                .inner
                .retry_queue
                .lock()
                .await
                .enqueue(symbol, period_type, years, lang);
            info!(symbol, attempts, "queued for retry");
            self.schedule_drain().await;
        } else if result.success {
            self.inner.retry_queue.lock().await.remove(symbol);
        }

        result
    }

    /// Arm a one-shot drain after the configured delay; no-op if one is
    /// already pending
    // Boxed return type breaks the drain -> schedule_drain -> drain
    // async recursion cycle so the compiler can resolve `Send`.
    fn schedule_drain(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let scheduler = self.clone();
            let armed = self
                .inner
                .jobs
                .schedule_once(
                    DRAIN_JOB_ID,
                    "retry queue drain",
                    self.inner.config.retry_delay,
                    async move { scheduler.drain_retry_queue().await },
                )
                .await;
            if armed {
                info!(delay = ?self.inner.config.retry_delay, "retry drain scheduled");
            }
        })
    }

    async fn has_statements(&self, symbol: &str) -> bool {
        let db = self.inner.store.database();
        match db.get_stock_by_symbol(symbol).await {
            Ok(Some(stock)) => match stock.id {
                Some(id) => {
                    let counts = future::join_all(
                        crate::models::StatementKind::ALL
                            .map(|kind| db.count_statements(id, kind)),
                    )
                    .await;
                    counts.into_iter().filter_map(Result::ok).sum::<i64>() > 0
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// Time until the next wall-clock occurrence of `hour:minute` in `tz`
fn duration_until_next(hour: u32, minute: u32, tz: Tz) -> std::time::Duration {
    let now = Utc::now().with_timezone(&tz);
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);

    let mut date = now.date_naive();
    loop {
        // Skips forward through nonexistent local times around DST gaps
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(target_time)).earliest() {
            if candidate > now {
                return (candidate - now).to_std().unwrap_or_default();
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => return std::time::Duration::from_secs(24 * 3600),
        };
    }
}
