use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A listed stock symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub id: Option<i64>,
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Statement kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::BalanceSheet,
        StatementKind::IncomeStatement,
        StatementKind::CashFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::IncomeStatement => "income_statement",
            StatementKind::CashFlow => "cash_flow",
        }
    }
}

/// Period granularity for financial reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodType {
    Annual,
    Quarter,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Annual => "annual",
            PeriodType::Quarter => "quarter",
        }
    }

    pub fn parse(s: &str) -> PeriodType {
        match s {
            "quarter" => PeriodType::Quarter,
            _ => PeriodType::Annual,
        }
    }
}

/// Composite period key: the uniqueness boundary for stored statements.
/// Quarter is None for annual periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodKey {
    pub period_type: PeriodType,
    pub year: i32,
    pub quarter: Option<u32>,
}

impl PeriodKey {
    pub fn annual(year: i32) -> Self {
        Self {
            period_type: PeriodType::Annual,
            year,
            quarter: None,
        }
    }

    pub fn quarterly(year: i32, quarter: u32) -> Self {
        Self {
            period_type: PeriodType::Quarter,
            year,
            quarter: Some(quarter),
        }
    }

    /// Display label, e.g. "2024" or "2024-Q1"
    pub fn label(&self) -> String {
        match self.quarter {
            Some(q) => format!("{}-Q{}", self.year, q),
            None => format!("{}", self.year),
        }
    }
}

/// Balance sheet line items. All values optional: a provider may omit
/// any line item, and absence is distinct from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheetFields {
    pub total_assets: Option<f64>,
    pub current_assets: Option<f64>,
    pub cash_and_equivalents: Option<f64>,
    pub short_term_investments: Option<f64>,
    pub accounts_receivable: Option<f64>,
    pub inventory: Option<f64>,
    pub non_current_assets: Option<f64>,
    pub fixed_assets: Option<f64>,
    pub long_term_investments: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub current_liabilities: Option<f64>,
    pub short_term_debt: Option<f64>,
    pub accounts_payable: Option<f64>,
    pub non_current_liabilities: Option<f64>,
    pub long_term_debt: Option<f64>,
    pub total_equity: Option<f64>,
    pub share_capital: Option<f64>,
    pub retained_earnings: Option<f64>,
    pub minority_interest: Option<f64>,
}

/// Income statement line items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeStatementFields {
    pub revenue: Option<f64>,
    pub cost_of_revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_expenses: Option<f64>,
    pub selling_expenses: Option<f64>,
    pub administrative_expenses: Option<f64>,
    pub operating_income: Option<f64>,
    pub interest_expense: Option<f64>,
    pub interest_income: Option<f64>,
    pub other_income: Option<f64>,
    pub other_expenses: Option<f64>,
    pub profit_before_tax: Option<f64>,
    pub income_tax: Option<f64>,
    pub net_income: Option<f64>,
    pub net_income_attributable: Option<f64>,
    pub eps: Option<f64>,
}

/// Cash flow statement line items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowFields {
    pub operating_cash_flow: Option<f64>,
    pub net_income_cf: Option<f64>,
    pub depreciation: Option<f64>,
    pub changes_in_working_capital: Option<f64>,
    pub investing_cash_flow: Option<f64>,
    pub capital_expenditure: Option<f64>,
    pub investments_purchases: Option<f64>,
    pub investments_sales: Option<f64>,
    pub financing_cash_flow: Option<f64>,
    pub debt_issued: Option<f64>,
    pub debt_repaid: Option<f64>,
    pub dividends_paid: Option<f64>,
    pub stock_issued: Option<f64>,
    pub stock_repurchased: Option<f64>,
    pub net_change_in_cash: Option<f64>,
    pub beginning_cash: Option<f64>,
    pub ending_cash: Option<f64>,
}

/// Fields for one statement, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementFields {
    Balance(BalanceSheetFields),
    Income(IncomeStatementFields),
    CashFlow(CashFlowFields),
}

impl StatementFields {
    pub fn kind(&self) -> StatementKind {
        match self {
            StatementFields::Balance(_) => StatementKind::BalanceSheet,
            StatementFields::Income(_) => StatementKind::IncomeStatement,
            StatementFields::CashFlow(_) => StatementKind::CashFlow,
        }
    }
}

/// One fetched statement for one period, ready for the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub key: PeriodKey,
    pub fields: StatementFields,
}

/// Counts of newly stored records per statement kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementCounts {
    pub balance_sheets: usize,
    pub income_statements: usize,
    pub cash_flow_statements: usize,
}

impl StatementCounts {
    pub fn total(&self) -> usize {
        self.balance_sheets + self.income_statements + self.cash_flow_statements
    }

    pub fn record(&mut self, kind: StatementKind, added: usize) {
        match kind {
            StatementKind::BalanceSheet => self.balance_sheets += added,
            StatementKind::IncomeStatement => self.income_statements += added,
            StatementKind::CashFlow => self.cash_flow_statements += added,
        }
    }

    pub fn merge(self, other: StatementCounts) -> StatementCounts {
        StatementCounts {
            balance_sheets: self.balance_sheets + other.balance_sheets,
            income_statements: self.income_statements + other.income_statements,
            cash_flow_statements: self.cash_flow_statements + other.cash_flow_statements,
        }
    }
}

/// Which source actually produced the stored data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Provider,
    Documents,
}

/// Outcome of one per-symbol update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub symbol: String,
    pub source: Option<UpdateSource>,
    pub success: bool,
    pub counts: StatementCounts,
    pub rate_limited: bool,
    pub error: Option<String>,
}

impl UpdateResult {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            source: None,
            success: false,
            counts: StatementCounts::default(),
            rate_limited: false,
            error: None,
        }
    }
}

/// Configuration for the service
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub provider_base_url: String,
    pub report_api_url: String,
    pub lang: String,
    pub sweep_hour: u32,
    pub sweep_minute: u32,
    pub timezone: Tz,
    pub sweep_delay: Duration,
    pub retry_delay: Duration,
    pub max_retry_attempts: u32,
    pub fetch_timeout: Duration,
    pub download_timeout: Duration,
    pub horizon_years: i32,
    pub search_cache_ttl: Duration,
    pub initial_sync_limit: usize,
    pub initial_sync_delay: Duration,
    pub drain_pause: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let timezone: Tz = std::env::var("SWEEP_TIMEZONE")
            .unwrap_or_else(|_| "Asia/Ho_Chi_Minh".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid SWEEP_TIMEZONE: {}", e))?;

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "finreports.db".to_string()),
            provider_base_url: std::env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.vietcap.com.vn".to_string()),
            report_api_url: std::env::var("REPORT_API_URL").unwrap_or_else(|_| {
                "https://cafef.vn/du-lieu/Ajax/PageNew/FileBCTC.ashx".to_string()
            }),
            lang: std::env::var("PROVIDER_LANG").unwrap_or_else(|_| "vi".to_string()),
            sweep_hour: env_or("SWEEP_HOUR", 18),
            sweep_minute: env_or("SWEEP_MINUTE", 0),
            timezone,
            sweep_delay: Duration::from_secs(env_or("SWEEP_SYMBOL_DELAY_SECS", 0)),
            retry_delay: Duration::from_secs(env_or("RATE_LIMIT_RETRY_DELAY_SECS", 45)),
            max_retry_attempts: env_or("MAX_RETRY_ATTEMPTS", 3),
            fetch_timeout: Duration::from_secs(env_or("FETCH_TIMEOUT_SECS", 30)),
            download_timeout: Duration::from_secs(env_or("DOWNLOAD_TIMEOUT_SECS", 60)),
            horizon_years: env_or("HORIZON_YEARS", 6),
            search_cache_ttl: Duration::from_secs(env_or("SEARCH_CACHE_TTL_SECS", 300)),
            initial_sync_limit: env_or("INITIAL_SYNC_LIMIT", 10),
            initial_sync_delay: Duration::from_secs(env_or("INITIAL_SYNC_DELAY_SECS", 3)),
            drain_pause: Duration::from_secs(env_or("DRAIN_PAUSE_SECS", 2)),
        })
    }
}
