//! Symbol search over the local database with provider top-up.
//!
//! Database hits come first, ranked prefix before substring. When they
//! do not fill the result cap, the provider's full listing tops the
//! list up, and those discoveries are backfilled into the database so
//! the next search finds them locally. Both the per-query results and
//! the provider listing are cached for a short TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::Database;
use crate::provider::{FinancialDataProvider, SymbolListing};

const QUERY_CACHE_MAX: usize = 256;

/// Candidates gathered per query; callers cap their own slice of these
const CANDIDATE_MAX: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
}

struct CachedQuery {
    results: Vec<SymbolMatch>,
    cached_at: Instant,
}

struct CachedListing {
    symbols: Vec<SymbolListing>,
    fetched_at: Instant,
}

pub struct SymbolSearch {
    db: Database,
    provider: Arc<dyn FinancialDataProvider>,
    ttl: Duration,
    queries: Mutex<HashMap<String, CachedQuery>>,
    listing: Mutex<Option<CachedListing>>,
}

impl SymbolSearch {
    pub fn new(db: Database, provider: Arc<dyn FinancialDataProvider>, ttl: Duration) -> Self {
        SymbolSearch {
            db,
            provider,
            ttl,
            queries: Mutex::new(HashMap::new()),
            listing: Mutex::new(None),
        }
    }

    /// The cache holds the full candidate list per query, so hits with a
    /// different `limit` still answer without touching the provider.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SymbolMatch>> {
        let normalized = query.trim().to_uppercase();
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        {
            let queries = self.queries.lock().await;
            if let Some(cached) = queries.get(&normalized) {
                if cached.cached_at.elapsed() < self.ttl {
                    debug!(query = %normalized, "search cache hit");
                    let mut results = cached.results.clone();
                    results.truncate(limit);
                    return Ok(results);
                }
            }
        }

        let mut results: Vec<SymbolMatch> = self
            .db
            .search_stocks(&normalized, CANDIDATE_MAX)
            .await?
            .into_iter()
            .map(|stock| SymbolMatch {
                symbol: stock.symbol,
                name: stock.name,
                exchange: stock.exchange,
            })
            .collect();

        if results.len() < CANDIDATE_MAX {
            self.top_up_from_provider(&normalized, &mut results).await;
        }

        let mut queries = self.queries.lock().await;
        if queries.len() >= QUERY_CACHE_MAX {
            queries.retain(|_, cached| cached.cached_at.elapsed() < self.ttl);
        }
        queries.insert(
            normalized,
            CachedQuery {
                results: results.clone(),
                cached_at: Instant::now(),
            },
        );
        drop(queries);

        results.truncate(limit);
        Ok(results)
    }

    /// Fill remaining slots from the provider listing and backfill new
    /// discoveries into the database. Provider trouble degrades to
    /// database-only results.
    async fn top_up_from_provider(&self, query: &str, results: &mut Vec<SymbolMatch>) {
        let listing = self.provider_listing().await;
        for entry in &listing {
            if results.len() >= CANDIDATE_MAX {
                break;
            }
            if !listing_matches(entry, query) {
                continue;
            }
            if results.iter().any(|hit| hit.symbol == entry.symbol) {
                continue;
            }
            self.backfill(entry).await;
            results.push(SymbolMatch {
                symbol: entry.symbol.clone(),
                name: entry.name.clone(),
                exchange: entry.exchange.clone(),
            });
        }
    }

    /// The provider's full listing, refreshed at most once per TTL.
    /// A stale copy is better than none when the refresh fails.
    async fn provider_listing(&self) -> Vec<SymbolListing> {
        let mut listing = self.listing.lock().await;
        let fresh = listing
            .as_ref()
            .map(|cached| cached.fetched_at.elapsed() < self.ttl)
            .unwrap_or(false);
        if !fresh {
            match self.provider.all_symbols().await {
                Ok(symbols) => {
                    *listing = Some(CachedListing {
                        symbols,
                        fetched_at: Instant::now(),
                    });
                }
                Err(err) => {
                    warn!(error = %err, "symbol listing refresh failed");
                }
            }
        }
        listing
            .as_ref()
            .map(|cached| cached.symbols.clone())
            .unwrap_or_default()
    }

    async fn backfill(&self, entry: &SymbolListing) {
        match self.db.get_stock_by_symbol(&entry.symbol).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(err) = self
                    .db
                    .insert_stock(&entry.symbol, entry.name.as_deref(), entry.exchange.as_deref())
                    .await
                {
                    debug!(symbol = %entry.symbol, error = %err, "symbol backfill failed");
                }
            }
            Err(err) => {
                debug!(symbol = %entry.symbol, error = %err, "symbol lookup failed");
            }
        }
    }
}

fn listing_matches(entry: &SymbolListing, query: &str) -> bool {
    if entry.symbol.contains(query) {
        return true;
    }
    entry
        .name
        .as_deref()
        .map(|name| name.to_uppercase().contains(query))
        .unwrap_or(false)
}
