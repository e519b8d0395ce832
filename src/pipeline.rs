//! Primary-then-fallback acquisition pipeline for a single symbol.
//!
//! One update walks the three statement kinds against the primary
//! provider and persists whatever is new. The outcome of that pass
//! decides what happens next: a rate limit aborts the update so the
//! caller can queue a retry, while an empty or definitively failed pass
//! hands the symbol to the document fallback. Rate limits never reach
//! the fallback; hammering a second upstream while the first is
//! throttling us helps nobody.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{
    PeriodType, StatementCounts, StatementKind, UpdateResult, UpdateSource,
};
use crate::provider::FinancialDataProvider;
use crate::store::StatementStore;

/// Secondary acquisition path used when the primary yields nothing
#[async_trait]
pub trait FallbackSource: Send + Sync {
    /// Acquire and persist statements for `symbol`, returning newly
    /// stored counts. Implementations choose their own period scope.
    async fn fetch_reports(&self, symbol: &str) -> Result<StatementCounts>;
}

/// What the primary pass produced for one symbol
enum PrimaryOutcome {
    /// At least one new statement row was written
    Stored(StatementCounts),
    /// The provider throttled us part-way through
    RateLimited(String),
    /// Every kind failed for a non-throttling reason
    Failed(String),
    /// The provider answered but nothing new was stored
    Empty,
}

pub struct FetchPipeline {
    store: Arc<StatementStore>,
    provider: Arc<dyn FinancialDataProvider>,
    fallback: Arc<dyn FallbackSource>,
    lang: String,
}

impl FetchPipeline {
    pub fn new(
        store: Arc<StatementStore>,
        provider: Arc<dyn FinancialDataProvider>,
        fallback: Arc<dyn FallbackSource>,
        lang: &str,
    ) -> Self {
        FetchPipeline {
            store,
            provider,
            fallback,
            lang: lang.to_string(),
        }
    }

    /// Full update for one symbol: primary pass, then the document
    /// fallback when the primary came up empty or failed outright.
    pub async fn update_symbol(
        &self,
        symbol: &str,
        period_type: PeriodType,
        years: i32,
        lang: Option<&str>,
    ) -> UpdateResult {
        let lang = lang.unwrap_or(&self.lang);
        let mut result = UpdateResult::new(symbol);

        match self.run_primary(symbol, period_type, years, lang).await {
            PrimaryOutcome::Stored(counts) => {
                result.success = true;
                result.source = Some(UpdateSource::Provider);
                result.counts = counts;
            }
            PrimaryOutcome::RateLimited(message) => {
                warn!(symbol, %message, "provider rate limited, update deferred");
                result.rate_limited = true;
                result.error = Some(message);
            }
            PrimaryOutcome::Failed(message) => {
                warn!(symbol, %message, "provider failed, trying document fallback");
                self.run_fallback(&mut result, Some(message)).await;
            }
            PrimaryOutcome::Empty => {
                info!(symbol, "provider returned nothing new, trying document fallback");
                self.run_fallback(&mut result, None).await;
            }
        }

        result
    }

    /// Primary-only update, used when replaying deferred symbols. The
    /// fallback already had its chance on the original attempt.
    pub async fn update_via_provider(
        &self,
        symbol: &str,
        period_type: PeriodType,
        years: i32,
        lang: Option<&str>,
    ) -> UpdateResult {
        let lang = lang.unwrap_or(&self.lang);
        let mut result = UpdateResult::new(symbol);

        match self.run_primary(symbol, period_type, years, lang).await {
            PrimaryOutcome::Stored(counts) => {
                result.success = true;
                result.source = Some(UpdateSource::Provider);
                result.counts = counts;
            }
            PrimaryOutcome::RateLimited(message) => {
                result.rate_limited = true;
                result.error = Some(message);
            }
            PrimaryOutcome::Failed(message) => {
                result.error = Some(message);
            }
            PrimaryOutcome::Empty => {
                // Nothing new is still a clean replay
                result.success = true;
                result.source = Some(UpdateSource::Provider);
            }
        }

        result
    }

    async fn run_primary(
        &self,
        symbol: &str,
        period_type: PeriodType,
        years: i32,
        lang: &str,
    ) -> PrimaryOutcome {
        let stock = match self.store.get_or_create_stock(symbol).await {
            Ok(stock) => stock,
            Err(err) => return PrimaryOutcome::Failed(err.to_string()),
        };
        let stock_id = match stock.id {
            Some(id) => id,
            None => return PrimaryOutcome::Failed(format!("stock {} has no row id", symbol)),
        };

        let mut counts = StatementCounts::default();
        let mut last_error: Option<String> = None;
        let mut any_succeeded = false;

        for kind in StatementKind::ALL {
            match self
                .provider
                .fetch_statements(&stock.symbol, kind, period_type, lang)
                .await
            {
                Ok(records) => {
                    any_succeeded = true;
                    match self.store.store_within_horizon(stock_id, &records, years).await {
                        Ok(added) => counts = counts.merge(added),
                        Err(err) => {
                            return PrimaryOutcome::Failed(format!(
                                "storing {} for {}: {}",
                                kind.as_str(),
                                stock.symbol,
                                err
                            ))
                        }
                    }
                }
                Err(err) if err.is_rate_limited() => {
                    return PrimaryOutcome::RateLimited(err.to_string());
                }
                Err(err) => {
                    warn!(symbol = %stock.symbol, kind = kind.as_str(), error = %err,
                          "statement fetch failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        if counts.total() > 0 {
            PrimaryOutcome::Stored(counts)
        } else if any_succeeded {
            PrimaryOutcome::Empty
        } else {
            PrimaryOutcome::Failed(
                last_error.unwrap_or_else(|| "all statement fetches failed".to_string()),
            )
        }
    }

    async fn run_fallback(&self, result: &mut UpdateResult, primary_error: Option<String>) {
        match self.fallback.fetch_reports(&result.symbol).await {
            Ok(counts) if counts.total() > 0 => {
                result.success = true;
                result.source = Some(UpdateSource::Documents);
                result.counts = counts;
                result.error = None;
            }
            Ok(_) => {
                result.error = primary_error
                    .or_else(|| Some("no statements available from any source".to_string()));
            }
            Err(err) => {
                warn!(symbol = %result.symbol, error = %err, "document fallback failed");
                result.error = Some(match primary_error {
                    Some(primary) => format!("{}; fallback: {}", primary, err),
                    None => err.to_string(),
                });
            }
        }
    }
}

