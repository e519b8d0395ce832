//! Deferred symbols waiting for a rate-limit retry.
//!
//! The queue is a plain map guarded by the scheduler's lock; entries
//! remember the request that was throttled so the replay asks for the
//! same thing. One entry per symbol no matter how many times it gets
//! re-queued, only the attempt counter moves.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PeriodType;

#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub attempts: u32,
    pub period_type: PeriodType,
    pub years: i32,
    pub lang: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: HashMap<String, RetryEntry>,
}

/// Snapshot of the queue for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct RetryQueueStatus {
    pub size: usize,
    pub entries: Vec<RetryEntryStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryEntryStatus {
    pub symbol: String,
    pub attempts: u32,
    pub added_at: DateTime<Utc>,
}

impl RetryQueue {
    pub fn new() -> Self {
        RetryQueue::default()
    }

    /// Queue a symbol for replay, or bump its attempt counter if it is
    /// already waiting. Returns the attempt count after the bump.
    pub fn enqueue(
        &mut self,
        symbol: &str,
        period_type: PeriodType,
        years: i32,
        lang: Option<&str>,
    ) -> u32 {
        let entry = self
            .entries
            .entry(symbol.to_string())
            .and_modify(|entry| entry.attempts += 1)
            .or_insert_with(|| RetryEntry {
                attempts: 1,
                period_type,
                years,
                lang: lang.map(str::to_string),
                added_at: Utc::now(),
            });
        entry.attempts
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        self.entries.remove(symbol).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Stable snapshot for a drain pass, oldest entries first
    pub fn snapshot(&self) -> Vec<(String, RetryEntry)> {
        let mut entries: Vec<(String, RetryEntry)> = self
            .entries
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.clone()))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.added_at);
        entries
    }

    pub fn status(&self) -> RetryQueueStatus {
        let mut entries: Vec<RetryEntryStatus> = self
            .entries
            .iter()
            .map(|(symbol, entry)| RetryEntryStatus {
                symbol: symbol.clone(),
                attempts: entry.attempts,
                added_at: entry.added_at,
            })
            .collect();
        entries.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        RetryQueueStatus {
            size: entries.len(),
            entries,
        }
    }
}
