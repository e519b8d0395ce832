//! Timer bookkeeping for scheduled work.
//!
//! Every registered job is a timer task: it sleeps until its due time
//! and then spawns the actual body as a detached task. Cancelling the
//! registry therefore only kills pending timers, never work that has
//! already started.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct ScheduledJob {
    description: String,
    next_run: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub description: String,
    pub next_run: DateTime<Utc>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry::default()
    }

    /// Schedule `body` to run once after `delay`. Returns false without
    /// scheduling when a job with the same id is still pending.
    pub async fn schedule_once<F>(
        &self,
        id: &str,
        description: &str,
        delay: Duration,
        body: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().await;
        if let Some(existing) = jobs.get(id) {
            if !existing.handle.is_finished() {
                return false;
            }
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(body);
        });
        jobs.insert(
            id.to_string(),
            ScheduledJob {
                description: description.to_string(),
                next_run: Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
                handle,
            },
        );
        true
    }

    /// Adopt a long-lived task, such as a recurring loop, under an id
    pub async fn track(
        &self,
        id: &str,
        description: &str,
        next_run: DateTime<Utc>,
        handle: JoinHandle<()>,
    ) {
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(
            id.to_string(),
            ScheduledJob {
                description: description.to_string(),
                next_run,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    pub async fn set_next_run(&self, id: &str, next_run: DateTime<Utc>) {
        if let Some(job) = self.jobs.lock().await.get_mut(id) {
            job.next_run = next_run;
        }
    }

    pub async fn statuses(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().await;
        let mut statuses: Vec<JobStatus> = jobs
            .iter()
            .map(|(id, job)| JobStatus {
                id: id.clone(),
                description: job.description.clone(),
                next_run: job.next_run,
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Abort every pending timer and forget all jobs
    pub async fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_id_is_rejected_while_pending() {
        let registry = JobRegistry::new();
        let long = Duration::from_secs(3600);
        assert!(registry.schedule_once("drain", "d", long, async {}).await);
        assert!(!registry.schedule_once("drain", "d", long, async {}).await);
    }

    #[tokio::test]
    async fn job_body_runs_after_delay() {
        let registry = JobRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        registry
            .schedule_once("tick", "t", Duration::from_millis(10), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_stops_pending_timers() {
        let registry = JobRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        registry
            .schedule_once("tick", "t", Duration::from_millis(50), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        registry.cancel_all().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(registry.statuses().await.is_empty());
    }
}
