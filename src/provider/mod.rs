use async_trait::async_trait;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{PeriodType, StatementKind, StatementRecord};

pub mod mapping;
pub mod vci_client;

pub use vci_client::VciClient;

/// Company info used to enrich newly created stocks, best-effort
#[derive(Debug, Clone, Default)]
pub struct CompanyOverview {
    pub name: Option<String>,
    pub exchange: Option<String>,
}

/// One entry of the provider's full symbol listing
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolListing {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
}

/// Primary financial-data source, one symbol at a time
#[async_trait]
pub trait FinancialDataProvider: Send + Sync {
    /// Fetch all periods of one statement kind for a symbol
    async fn fetch_statements(
        &self,
        symbol: &str,
        kind: StatementKind,
        period_type: PeriodType,
        lang: &str,
    ) -> Result<Vec<StatementRecord>, FetchError>;

    /// Company name/exchange lookup for symbol enrichment
    async fn company_overview(&self, symbol: &str) -> Result<CompanyOverview, FetchError>;

    /// The provider's full symbol listing
    async fn all_symbols(&self) -> Result<Vec<SymbolListing>, FetchError>;
}

/// Fixed-delay pacer between consecutive upstream requests
pub struct RequestPacer {
    delay: Duration,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn wait(&self) {
        tokio::time::sleep(self.delay).await;
    }
}
