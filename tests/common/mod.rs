//! Shared fixtures: a throwaway database, a scripted provider and a
//! canned fallback so no test touches the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use finreports::db::Database;
use finreports::error::FetchError;
use finreports::models::{
    BalanceSheetFields, Config, PeriodKey, PeriodType, StatementCounts, StatementFields,
    StatementKind, StatementRecord,
};
use finreports::pipeline::{FallbackSource, FetchPipeline};
use finreports::provider::{CompanyOverview, FinancialDataProvider, SymbolListing};
use finreports::scheduler::Scheduler;
use finreports::store::StatementStore;

/// Config with timings shrunk so schedule-sensitive tests run in
/// milliseconds instead of minutes
pub fn test_config(database_path: &str) -> Config {
    Config {
        database_path: database_path.to_string(),
        provider_base_url: "http://127.0.0.1:0".to_string(),
        report_api_url: "http://127.0.0.1:0".to_string(),
        lang: "vi".to_string(),
        sweep_hour: 18,
        sweep_minute: 0,
        timezone: chrono_tz::Asia::Ho_Chi_Minh,
        sweep_delay: Duration::from_millis(1),
        retry_delay: Duration::from_millis(40),
        max_retry_attempts: 3,
        fetch_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
        horizon_years: 6,
        search_cache_ttl: Duration::from_secs(300),
        initial_sync_limit: 3,
        initial_sync_delay: Duration::from_millis(1),
        drain_pause: Duration::from_millis(1),
    }
}

pub fn annual_balance(year: i32, total_assets: f64) -> StatementRecord {
    StatementRecord {
        key: PeriodKey::annual(year),
        fields: StatementFields::Balance(BalanceSheetFields {
            total_assets: Some(total_assets),
            ..Default::default()
        }),
    }
}

/// One scripted answer from the mock provider
#[derive(Clone)]
pub enum MockResponse {
    Records(Vec<StatementRecord>),
    RateLimited,
    Error,
    Empty,
}

impl MockResponse {
    fn into_result(self) -> Result<Vec<StatementRecord>, FetchError> {
        match self {
            MockResponse::Records(records) => Ok(records),
            MockResponse::RateLimited => Err(FetchError::RateLimited(
                "too many requests, vui lòng thử lại sau".to_string(),
            )),
            MockResponse::Error => Err(FetchError::Provider("status 500: boom".to_string())),
            MockResponse::Empty => Ok(Vec::new()),
        }
    }
}

/// Provider that pops scripted responses per statement fetch; once the
/// script runs dry it keeps returning `exhausted`.
pub struct MockProvider {
    script: Mutex<VecDeque<MockResponse>>,
    exhausted: MockResponse,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl MockProvider {
    pub fn scripted(responses: Vec<MockResponse>) -> Self {
        MockProvider {
            script: Mutex::new(responses.into()),
            exhausted: MockResponse::Empty,
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn always(response: MockResponse) -> Self {
        MockProvider {
            script: Mutex::new(VecDeque::new()),
            exhausted: response,
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FinancialDataProvider for MockProvider {
    async fn fetch_statements(
        &self,
        _symbol: &str,
        _kind: StatementKind,
        _period_type: PeriodType,
        _lang: &str,
    ) -> Result<Vec<StatementRecord>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.exhausted.clone());
        next.into_result()
    }

    async fn company_overview(&self, _symbol: &str) -> Result<CompanyOverview, FetchError> {
        Ok(CompanyOverview::default())
    }

    async fn all_symbols(&self) -> Result<Vec<SymbolListing>, FetchError> {
        Ok(Vec::new())
    }
}

/// Fallback with a canned outcome and an invocation counter
pub struct MockFallback {
    counts: StatementCounts,
    fail: bool,
    calls: AtomicUsize,
}

impl MockFallback {
    pub fn yielding(balance_sheets: usize) -> Self {
        MockFallback {
            counts: StatementCounts {
                balance_sheets,
                ..Default::default()
            },
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::yielding(0)
    }

    pub fn failing() -> Self {
        MockFallback {
            counts: StatementCounts::default(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackSource for MockFallback {
    async fn fetch_reports(&self, _symbol: &str) -> Result<StatementCounts> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("report listing unavailable");
        }
        Ok(self.counts)
    }
}

pub struct TestEnv {
    pub _dir: TempDir,
    pub db: Database,
    pub store: Arc<StatementStore>,
    pub pipeline: Arc<FetchPipeline>,
    pub config: Config,
}

pub async fn setup(provider: Arc<MockProvider>, fallback: Arc<MockFallback>) -> TestEnv {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.db");
    let path = path.to_str().expect("utf8 path");
    let config = test_config(path);

    let db = Database::new(path).await.expect("database");
    let store = Arc::new(StatementStore::new(db.clone(), provider.clone()));
    let pipeline = Arc::new(FetchPipeline::new(
        store.clone(),
        provider,
        fallback,
        &config.lang,
    ));
    TestEnv {
        _dir: dir,
        db,
        store,
        pipeline,
        config,
    }
}

pub fn scheduler_for(env: &TestEnv) -> Scheduler {
    Scheduler::new(env.pipeline.clone(), env.store.clone(), env.config.clone())
}
