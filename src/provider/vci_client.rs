use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{Config, PeriodType, StatementKind, StatementRecord};

use super::{mapping, CompanyOverview, FinancialDataProvider, RequestPacer, SymbolListing};

const PACER_DELAY_MS: u64 = 500;

/// HTTP client for the primary financial-data provider
pub struct VciClient {
    client: Client,
    base_url: String,
    call_timeout: Duration,
    pacer: RequestPacer,
}

impl VciClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent("finreports/0.1")
            .build()?;

        Ok(Self {
            client,
            base_url: config.provider_base_url.trim_end_matches('/').to_string(),
            call_timeout: config.fetch_timeout,
            pacer: RequestPacer::new(Duration::from_millis(PACER_DELAY_MS)),
        })
    }

    fn kind_path(kind: StatementKind) -> &'static str {
        match kind {
            StatementKind::BalanceSheet => "balance-sheet",
            StatementKind::IncomeStatement => "income-statement",
            StatementKind::CashFlow => "cash-flow",
        }
    }

    /// One bounded request. Exceeding the wall-clock bound is a definitive
    /// timeout, never a rate limit; HTTP 429 and rate-limit body phrasing
    /// map to the recoverable variant.
    async fn make_request(&self, url: &str) -> Result<Value, FetchError> {
        self.pacer.wait().await;
        debug!("Provider request: {}", url);

        let send = self.client.get(url).send();
        let response = match tokio::time::timeout(self.call_timeout, send).await {
            Ok(result) => result.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.call_timeout)
                } else {
                    FetchError::Http(e)
                }
            })?,
            Err(_) => return Err(FetchError::Timeout(self.call_timeout)),
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::RateLimited(format!("status 429: {}", body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Throttle phrasing in the body promotes to the recoverable variant
            return Err(FetchError::from_provider_message(format!(
                "status {}: {}",
                status, body
            )));
        }

        let json: Value = response.json().await?;
        Ok(json)
    }

    fn rows_of(data: &Value) -> &[Value] {
        // Endpoints wrap the table in {"data": [...]} or return it bare
        data.get("data")
            .and_then(|v| v.as_array())
            .or_else(|| data.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[async_trait]
impl FinancialDataProvider for VciClient {
    async fn fetch_statements(
        &self,
        symbol: &str,
        kind: StatementKind,
        period_type: PeriodType,
        lang: &str,
    ) -> Result<Vec<StatementRecord>, FetchError> {
        let period = match period_type {
            PeriodType::Annual => "year",
            PeriodType::Quarter => "quarter",
        };
        let url = format!(
            "{}/finance/{}?symbol={}&period={}&lang={}",
            self.base_url,
            Self::kind_path(kind),
            symbol,
            period,
            lang
        );

        let data = self.make_request(&url).await.map_err(|e| match e {
            FetchError::Provider(msg) if msg.starts_with("status 404") => {
                FetchError::InvalidSymbol(symbol.to_string())
            }
            other => other,
        })?;

        let records: Vec<StatementRecord> = Self::rows_of(&data)
            .iter()
            .filter_map(|row| row.as_object())
            .filter_map(|row| mapping::record_from_row(kind, period_type, row))
            .collect();

        debug!(
            "Fetched {} {} rows for {}",
            records.len(),
            kind.as_str(),
            symbol
        );
        Ok(records)
    }

    async fn company_overview(&self, symbol: &str) -> Result<CompanyOverview, FetchError> {
        let url = format!("{}/company/overview?symbol={}", self.base_url, symbol);
        let data = self.make_request(&url).await?;

        let obj = data.get("data").unwrap_or(&data);
        Ok(CompanyOverview {
            name: obj
                .get("short_name")
                .or_else(|| obj.get("organName"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            exchange: obj
                .get("exchange")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn all_symbols(&self) -> Result<Vec<SymbolListing>, FetchError> {
        let url = format!("{}/listing/all-symbols", self.base_url);
        let data = self.make_request(&url).await?;

        let listings = Self::rows_of(&data)
            .iter()
            .filter_map(|row| {
                let symbol = row.get("symbol").and_then(|v| v.as_str())?;
                Some(SymbolListing {
                    symbol: symbol.to_uppercase(),
                    name: row
                        .get("organ_name")
                        .or_else(|| row.get("organName"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    exchange: row
                        .get("exchange")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                })
            })
            .collect();

        Ok(listings)
    }
}
