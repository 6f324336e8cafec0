//! # Spreadsheet Gateway Module
//!
//! Typed, retrying access to the spreadsheet document. Every mutating call
//! retries a bounded number of times with an increasing, jittered delay; a
//! rate-limit signal trips the [`QuotaGuard`] instead of being retried, and
//! while the guard is open every call fails fast. Exhausted retries surface
//! as an `Err` the caller must treat as "operation failed, row state
//! unknown" — never as a panic.
//!
//! The gateway also locates the two functional sheets (tasks and driver
//! roster) by inspecting header rows; when they cannot be found it reports
//! unready and the rest of the system keeps running without task delivery
//! or roster updates.

use futures::future::BoxFuture;
use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::quota_guard::QuotaGuard;
use crate::records::{header_matches, ROSTER_SHEET_MARKERS, TASK_SHEET_MARKERS};
use crate::sheets::{CellWrite, SheetError, SheetsApi};

/// Gateway-level failures, reported to callers as soft errors.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// The quota guard is open or a rate limit was just signalled
    RateLimited,
    /// Retries exhausted without success
    Unavailable(String),
    /// A required functional sheet has not been discovered
    NotReady(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::RateLimited => write!(f, "Rate limited: backing off"),
            GatewayError::Unavailable(msg) => write!(f, "Datastore unavailable: {msg}"),
            GatewayError::NotReady(what) => write!(f, "Sheet not discovered: {what}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Default, Clone)]
struct DiscoveredSheets {
    tasks: Option<String>,
    roster: Option<String>,
}

/// Retrying wrapper over a [`SheetsApi`] implementation.
pub struct SheetGateway<A: SheetsApi> {
    api: A,
    retry: RetryConfig,
    quota: QuotaGuard,
    discovered: Mutex<DiscoveredSheets>,
}

impl<A: SheetsApi> SheetGateway<A> {
    pub fn new(api: A, retry: RetryConfig) -> Self {
        let quota = QuotaGuard::new(Duration::from_secs(retry.rate_limit_backoff_secs));
        Self {
            api,
            retry,
            quota,
            discovered: Mutex::new(DiscoveredSheets::default()),
        }
    }

    /// Title of the discovered tasks sheet, if any.
    pub fn tasks_sheet(&self) -> Option<String> {
        self.discovered.lock().expect("discovery lock poisoned").tasks.clone()
    }

    /// Title of the discovered driver roster sheet, if any.
    pub fn roster_sheet(&self) -> Option<String> {
        self.discovered.lock().expect("discovery lock poisoned").roster.clone()
    }

    /// Task delivery requires a discovered tasks sheet.
    pub fn is_ready(&self) -> bool {
        self.tasks_sheet().is_some()
    }

    /// Inspect header rows to locate the tasks and roster sheets.
    ///
    /// Unrecognized or unreadable sheets are skipped; absence is not an
    /// error here — the gateway simply stays unready.
    pub async fn discover_functional_sheets(&self) -> Result<(), GatewayError> {
        let titles = self
            .with_retry("sheet_titles", || self.api.sheet_titles())
            .await?;

        let mut found = DiscoveredSheets::default();
        for title in titles {
            let header = match self.with_retry("read_header", || self.api.read_row(&title, 1)).await
            {
                Ok(h) => h,
                Err(e) => {
                    debug!(sheet = %title, error = %e, "skipping unreadable sheet header");
                    continue;
                }
            };
            if found.tasks.is_none() && header_matches(&header, &TASK_SHEET_MARKERS) {
                info!(sheet = %title, "tasks sheet discovered");
                found.tasks = Some(title);
            } else if found.roster.is_none() && header_matches(&header, &ROSTER_SHEET_MARKERS) {
                info!(sheet = %title, "driver roster sheet discovered");
                found.roster = Some(title);
            }
        }
        if found.tasks.is_none() {
            warn!("no tasks sheet recognized; task delivery disabled until one appears");
        }

        *self.discovered.lock().expect("discovery lock poisoned") = found;
        Ok(())
    }

    /// All rows of a sheet, header included.
    pub async fn read_all(&self, sheet: &str) -> Result<Vec<Vec<String>>, GatewayError> {
        self.with_retry("read_all", || self.api.read_sheet(sheet)).await
    }

    /// One row, 1-based; missing rows come back empty.
    pub async fn read_row(&self, sheet: &str, row: usize) -> Result<Vec<String>, GatewayError> {
        self.with_retry("read_row", || self.api.read_row(sheet, row)).await
    }

    /// One cell, 1-based row and column; `None` for an absent cell.
    pub async fn read_cell(
        &self,
        sheet: &str,
        row: usize,
        col: usize,
    ) -> Result<Option<String>, GatewayError> {
        let cells = self.read_row(sheet, row).await?;
        Ok(cells.get(col - 1).cloned().filter(|v| !v.is_empty()))
    }

    /// Values of one column, header excluded, blanks skipped.
    pub async fn column_values(&self, sheet: &str, col: usize) -> Result<Vec<String>, GatewayError> {
        let rows = self.read_all(sheet).await?;
        Ok(rows
            .iter()
            .skip(1)
            .filter_map(|r| r.get(col - 1))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect())
    }

    pub async fn append_row(&self, sheet: &str, values: Vec<String>) -> Result<(), GatewayError> {
        self.with_retry("append_row", || self.api.append_row(sheet, values.clone()))
            .await
    }

    pub async fn write_cell(
        &self,
        sheet: &str,
        row: usize,
        col: usize,
        value: impl Into<String>,
    ) -> Result<(), GatewayError> {
        self.write_cells(sheet, vec![CellWrite::new(row, col, value)]).await
    }

    /// Batch of single-cell writes in one request.
    pub async fn write_cells(&self, sheet: &str, writes: Vec<CellWrite>) -> Result<(), GatewayError> {
        self.with_retry("write_cells", || self.api.write_cells(sheet, writes.clone()))
            .await
    }

    /// Create a sheet with a header row unless it already exists.
    pub async fn ensure_sheet(&self, title: &str, header: &[&str]) -> Result<(), GatewayError> {
        let titles = self
            .with_retry("sheet_titles", || self.api.sheet_titles())
            .await?;
        if titles.iter().any(|t| t == title) {
            return Ok(());
        }
        info!(sheet = %title, "creating missing sheet");
        self.with_retry("add_sheet", || self.api.add_sheet(title)).await?;
        self.append_row(title, header.iter().map(|h| h.to_string()).collect())
            .await
    }

    async fn with_retry<'a, T, F>(&'a self, op: &'static str, f: F) -> Result<T, GatewayError>
    where
        F: Fn() -> BoxFuture<'a, Result<T, SheetError>>,
    {
        if self.quota.is_open() {
            debug!(op, "quota guard open; failing fast");
            return Err(GatewayError::RateLimited);
        }

        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(SheetError::RateLimited) => {
                    // Protect the shared quota: no immediate retry, long cooldown
                    warn!(
                        op,
                        backoff_secs = self.retry.rate_limit_backoff_secs,
                        "rate limited; tripping quota guard"
                    );
                    self.quota.trip();
                    return Err(GatewayError::RateLimited);
                }
                Err(SheetError::Api(msg)) => {
                    attempt += 1;
                    if attempt > self.retry.max_retries {
                        error!(op, error = %msg, "operation failed after exhausting retries");
                        return Err(GatewayError::Unavailable(msg));
                    }
                    let delay = self.retry_delay(attempt);
                    warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %msg, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .retry
            .base_retry_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16))
            .min(self.retry.max_retry_delay_ms);
        let jitter = if self.retry.retry_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.retry.retry_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Minimal fake: fails a configurable number of times, then succeeds.
    struct FlakyApi {
        calls: AtomicU32,
        fail_first: u32,
        rate_limit: bool,
    }

    impl FlakyApi {
        fn failing(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                rate_limit: false,
            }
        }

        fn rate_limited() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: u32::MAX,
                rate_limit: true,
            }
        }

        fn outcome(&self) -> Result<(), SheetError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limit {
                return Err(SheetError::RateLimited);
            }
            if n < self.fail_first {
                Err(SheetError::Api("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SheetsApi for FlakyApi {
        async fn read_sheet(&self, _sheet: &str) -> Result<Vec<Vec<String>>, SheetError> {
            self.outcome().map(|_| Vec::new())
        }
        async fn read_row(&self, _sheet: &str, _row: usize) -> Result<Vec<String>, SheetError> {
            self.outcome().map(|_| Vec::new())
        }
        async fn append_row(&self, _sheet: &str, _values: Vec<String>) -> Result<(), SheetError> {
            self.outcome()
        }
        async fn write_cells(
            &self,
            _sheet: &str,
            _writes: Vec<CellWrite>,
        ) -> Result<(), SheetError> {
            self.outcome()
        }
        async fn sheet_titles(&self) -> Result<Vec<String>, SheetError> {
            self.outcome().map(|_| Vec::new())
        }
        async fn add_sheet(&self, _title: &str) -> Result<(), SheetError> {
            self.outcome()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
            retry_jitter_ms: 0,
            rate_limit_backoff_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let gw = SheetGateway::new(FlakyApi::failing(2), fast_retry());
        assert!(gw.append_row("Trips", vec![]).await.is_ok());
        assert_eq!(gw.api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_soft_failure() {
        let gw = SheetGateway::new(FlakyApi::failing(u32::MAX), fast_retry());
        let err = gw.append_row("Trips", vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        // initial attempt + max_retries
        assert_eq!(gw.api.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rate_limit_trips_guard_and_fails_fast() {
        let gw = SheetGateway::new(FlakyApi::rate_limited(), fast_retry());
        let err = gw.append_row("Trips", vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited));
        assert_eq!(gw.api.calls.load(Ordering::SeqCst), 1);

        // Guard is open: the next call never reaches the API
        let err = gw.read_all("Trips").await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited));
        assert_eq!(gw.api.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let gw = SheetGateway::new(
            FlakyApi::failing(0),
            RetryConfig {
                max_retries: 5,
                base_retry_delay_ms: 100,
                max_retry_delay_ms: 350,
                retry_jitter_ms: 0,
                rate_limit_backoff_secs: 60,
            },
        );
        assert_eq!(gw.retry_delay(1), Duration::from_millis(100));
        assert_eq!(gw.retry_delay(2), Duration::from_millis(200));
        assert_eq!(gw.retry_delay(3), Duration::from_millis(350));
        assert_eq!(gw.retry_delay(4), Duration::from_millis(350));
    }
}
