//! Document-based fallback for statement acquisition.
//!
//! When the primary provider yields nothing for a symbol, published report
//! documents are the source of last resort: list the documents filed for
//! the symbol, download each one, extract line items from the text and
//! persist whatever was recovered. The listing endpoint and the extractor
//! are trait seams so tests never touch the network.

pub mod extract;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Datelike;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::{
    Config, PeriodKey, StatementCounts, StatementFields, StatementRecord,
};
use crate::pipeline::FallbackSource;
use crate::store::StatementStore;

use extract::{ExtractedStatements, StatementExtractor};

/// One published report document for a symbol
#[derive(Debug, Clone)]
pub struct ReportLink {
    pub year: i32,
    /// Raw period marker from the listing; 0, 5 and absent all mean annual
    pub quarter: Option<i64>,
    pub name: String,
    pub url: String,
    pub consolidated: bool,
}

impl ReportLink {
    pub fn is_annual(&self) -> bool {
        matches!(self.quarter, None | Some(0) | Some(5))
    }
}

/// Lists and downloads published report documents
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn list_reports(&self, symbol: &str) -> Result<Vec<ReportLink>, FetchError>;
    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Report listing backed by the CafeF document archive
pub struct CafefReportSource {
    client: reqwest::Client,
    api_url: String,
    download_timeout: Duration,
}

impl CafefReportSource {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
            )
            .build()?;
        Ok(CafefReportSource {
            client,
            api_url: config.report_api_url.clone(),
            download_timeout: config.download_timeout,
        })
    }

    fn link_from_item(item: &Value) -> Option<ReportLink> {
        let name = item
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let url = item.get("Link").and_then(Value::as_str)?.to_string();
        let year = item.get("Year").and_then(Value::as_i64)? as i32;
        let quarter = item.get("Quarter").and_then(Value::as_i64);
        let consolidated = name.to_lowercase().contains("hợp nhất");
        Some(ReportLink {
            year,
            quarter,
            name,
            url,
            consolidated,
        })
    }
}

#[async_trait]
impl ReportSource for CafefReportSource {
    async fn list_reports(&self, symbol: &str) -> Result<Vec<ReportLink>, FetchError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("Symbol", symbol)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Provider(format!(
                "report listing returned status {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let items = body
            .get("Data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(Self::link_from_item).collect())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request = self.client.get(url).send();
        let response = tokio::time::timeout(self.download_timeout, request)
            .await
            .map_err(|_| FetchError::Timeout(self.download_timeout))??;
        if !response.status().is_success() {
            return Err(FetchError::Provider(format!(
                "document download returned status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Fetches published reports for a symbol and persists extracted fields.
///
/// The document archive only carries full-year consolidated filings in a
/// usable form, so the scraper always works annual periods within its
/// year horizon regardless of what the primary request asked for.
pub struct ReportScraper {
    source: Arc<dyn ReportSource>,
    extractor: Arc<dyn StatementExtractor>,
    store: Arc<StatementStore>,
    horizon_years: i32,
}

impl ReportScraper {
    pub fn new(
        source: Arc<dyn ReportSource>,
        extractor: Arc<dyn StatementExtractor>,
        store: Arc<StatementStore>,
        horizon_years: i32,
    ) -> Self {
        ReportScraper {
            source,
            extractor,
            store,
            horizon_years,
        }
    }
}

#[async_trait]
impl FallbackSource for ReportScraper {
    /// Process every in-horizon annual consolidated report for `symbol`.
    /// Per-document failures are logged and skipped; only listing-level
    /// failures abort the run.
    async fn fetch_reports(&self, symbol: &str) -> Result<StatementCounts> {
        let stock = self.store.get_or_create_stock(symbol).await?;
        let stock_id = stock
            .id
            .ok_or_else(|| anyhow::anyhow!("stock {} has no row id", stock.symbol))?;

        let links = self.source.list_reports(&stock.symbol).await?;
        let cutoff = Utc::now().year() - self.horizon_years;
        let mut counts = StatementCounts::default();
        let mut processed = 0usize;

        for link in &links {
            if !link.consolidated || !link.is_annual() || link.year < cutoff {
                continue;
            }
            let data = match self.source.download(&link.url).await {
                Ok(data) => data,
                Err(err) => {
                    warn!(symbol = %stock.symbol, name = %link.name, error = %err,
                          "skipping report document, download failed");
                    continue;
                }
            };
            let extracted = self.extractor.extract(&data);
            if extracted.is_empty() {
                debug!(symbol = %stock.symbol, name = %link.name,
                       "no line items recovered from document");
                continue;
            }
            processed += 1;
            let key = PeriodKey::annual(link.year);
            for record in records_from(key, extracted) {
                let kind = record.fields.kind();
                if self.store.store_if_absent(stock_id, &record).await? {
                    counts.record(kind, 1);
                }
            }
        }

        info!(symbol = %stock.symbol, documents = processed, stored = counts.total(),
              "report scrape finished");
        Ok(counts)
    }
}

/// Non-empty kinds only; a document that has no income lines still yields
/// its balance sheet.
fn records_from(key: PeriodKey, extracted: ExtractedStatements) -> Vec<StatementRecord> {
    let mut records = Vec::new();
    if extracted.balance_sheet != Default::default() {
        records.push(StatementRecord {
            key,
            fields: StatementFields::Balance(extracted.balance_sheet),
        });
    }
    if extracted.income_statement != Default::default() {
        records.push(StatementRecord {
            key,
            fields: StatementFields::Income(extracted.income_statement),
        });
    }
    if extracted.cash_flow != Default::default() {
        records.push(StatementRecord {
            key,
            fields: StatementFields::CashFlow(extracted.cash_flow),
        });
    }
    records
}
