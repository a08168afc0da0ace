use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::models::Report;

/// Shows at most one report at a time. Every request takes a sequence
/// token; a response is applied only while its token is still the newest
/// one issued, so a slow earlier fetch can never replace a later one.
#[derive(Default)]
pub struct ReportViewer {
    issued: AtomicU64,
    displayed: Mutex<Option<Report>>,
}

impl ReportViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a token for a new request and clears the current report.
    pub async fn begin(&self) -> u64 {
        let token = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        *self.displayed.lock().await = None;
        token
    }

    /// Applies a fetched report if `token` is still the latest. Returns
    /// whether it was applied.
    pub async fn settle(&self, token: u64, report: Option<Report>) -> bool {
        let mut displayed = self.displayed.lock().await;
        if self.issued.load(Ordering::SeqCst) != token {
            tracing::debug!(token, "discarding stale report response");
            return false;
        }
        *displayed = report;
        true
    }

    /// Runs one fetch through [`begin`](Self::begin) and
    /// [`settle`](Self::settle). Errors degrade to an empty report.
    pub async fn open<F>(&self, fetch: F) -> Option<Report>
    where
        F: Future<Output = anyhow::Result<Option<Report>>>,
    {
        let token = self.begin().await;
        let report = match fetch.await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch report");
                None
            }
        };
        if self.settle(token, report).await {
            self.current().await
        } else {
            None
        }
    }

    pub async fn current(&self) -> Option<Report> {
        self.displayed.lock().await.clone()
    }
}
