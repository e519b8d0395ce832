use anyhow::Result;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::{StatementCounts, StatementFields, StatementRecord, Stock};
use crate::provider::FinancialDataProvider;

/// Sole write path for statement data. Records are keyed by
/// (stock, kind, period type, year, quarter); an existing period is
/// never overwritten, later fetches for it are dropped.
pub struct StatementStore {
    db: Database,
    provider: Arc<dyn FinancialDataProvider>,
}

impl StatementStore {
    pub fn new(db: Database, provider: Arc<dyn FinancialDataProvider>) -> Self {
        Self { db, provider }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Case-normalize the ticker and return the existing stock or create
    /// it. Creation is enriched with name/exchange from the provider
    /// when the lookup succeeds; enrichment failure never fails creation.
    pub async fn get_or_create_stock(&self, ticker: &str) -> Result<Stock> {
        let symbol = ticker.trim().to_uppercase();

        if let Some(stock) = self.db.get_stock_by_symbol(&symbol).await? {
            return Ok(stock);
        }

        let overview = match self.provider.company_overview(&symbol).await {
            Ok(overview) => overview,
            Err(e) => {
                warn!("Could not fetch company info for {}: {}", symbol, e);
                Default::default()
            }
        };

        self.db
            .insert_stock(&symbol, overview.name.as_deref(), overview.exchange.as_deref())
            .await?;

        // Read back to pick up the generated id and timestamps
        self.db
            .get_stock_by_symbol(&symbol)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Stock {} missing after insert", symbol))
    }

    /// Idempotent insert: false when the composite period key already
    /// holds a record (a no-op signal, not an error).
    pub async fn store_if_absent(&self, stock_id: i64, record: &StatementRecord) -> Result<bool> {
        let inserted = match &record.fields {
            StatementFields::Balance(fields) => {
                self.db
                    .insert_balance_sheet_if_absent(stock_id, &record.key, fields)
                    .await?
            }
            StatementFields::Income(fields) => {
                self.db
                    .insert_income_statement_if_absent(stock_id, &record.key, fields)
                    .await?
            }
            StatementFields::CashFlow(fields) => {
                self.db
                    .insert_cash_flow_if_absent(stock_id, &record.key, fields)
                    .await?
            }
        };

        if !inserted {
            debug!(
                "Skipping stored period {} ({})",
                record.key.label(),
                record.fields.kind().as_str()
            );
        }

        Ok(inserted)
    }

    /// Store a batch, discarding records older than the horizon before
    /// they reach the write path. Returns newly stored counts per kind.
    pub async fn store_within_horizon(
        &self,
        stock_id: i64,
        records: &[StatementRecord],
        horizon_years: i32,
    ) -> Result<StatementCounts> {
        let cutoff = Utc::now().year() - horizon_years;
        let mut counts = StatementCounts::default();

        for record in records {
            if record.key.year < cutoff {
                continue;
            }
            if self.store_if_absent(stock_id, record).await? {
                counts.record(record.fields.kind(), 1);
            }
        }

        Ok(counts)
    }
}
