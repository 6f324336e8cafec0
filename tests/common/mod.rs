//! Shared test fixtures: an in-memory sheets API and a test configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::FixedOffset;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use teloxide::types::ChatId;

use fleetbot::config::{BotConfig, RetryConfig};
use fleetbot::sheets::{CellWrite, SheetError, SheetsApi};

pub const PHOTO_CHANNEL: ChatId = ChatId(-100111);
pub const PARCEL_CHANNEL: ChatId = ChatId(-100222);

#[derive(Default)]
struct Inner {
    sheets: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
    fail_all: AtomicBool,
    fail_writes: AtomicBool,
    calls: AtomicU32,
}

/// In-memory spreadsheet standing in for the Google document. Clones share
/// state, so a test can keep one handle while the gateway owns another.
#[derive(Clone, Default)]
pub struct FakeSheets {
    inner: Arc<Inner>,
}

impl FakeSheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(self, title: &str, rows: Vec<Vec<&str>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(|c| c.to_string()).collect())
            .collect();
        self.inner
            .sheets
            .lock()
            .unwrap()
            .insert(title.to_string(), rows);
        self
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.inner.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        self.inner
            .sheets
            .lock()
            .unwrap()
            .get(sheet)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self, sheet: &str) -> usize {
        self.rows(sheet).len()
    }

    /// 1-based cell accessor; absent cells come back empty.
    pub fn cell(&self, sheet: &str, row: usize, col: usize) -> String {
        self.rows(sheet)
            .get(row - 1)
            .and_then(|r| r.get(col - 1))
            .cloned()
            .unwrap_or_default()
    }

    fn check(&self, mutating: bool) -> Result<(), SheetError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_all.load(Ordering::SeqCst)
            || (mutating && self.inner.fail_writes.load(Ordering::SeqCst))
        {
            return Err(SheetError::Api("fake outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SheetsApi for FakeSheets {
    async fn read_sheet(&self, sheet: &str) -> Result<Vec<Vec<String>>, SheetError> {
        self.check(false)?;
        Ok(self.rows(sheet))
    }

    async fn read_row(&self, sheet: &str, row: usize) -> Result<Vec<String>, SheetError> {
        self.check(false)?;
        Ok(self.rows(sheet).get(row - 1).cloned().unwrap_or_default())
    }

    async fn append_row(&self, sheet: &str, values: Vec<String>) -> Result<(), SheetError> {
        self.check(true)?;
        let mut sheets = self.inner.sheets.lock().unwrap();
        let rows = sheets
            .get_mut(sheet)
            .ok_or_else(|| SheetError::Api(format!("no such sheet: {sheet}")))?;
        rows.push(values);
        Ok(())
    }

    async fn write_cells(&self, sheet: &str, writes: Vec<CellWrite>) -> Result<(), SheetError> {
        self.check(true)?;
        let mut sheets = self.inner.sheets.lock().unwrap();
        let rows = sheets
            .get_mut(sheet)
            .ok_or_else(|| SheetError::Api(format!("no such sheet: {sheet}")))?;
        for w in writes {
            while rows.len() < w.row {
                rows.push(Vec::new());
            }
            let row = &mut rows[w.row - 1];
            while row.len() < w.col {
                row.push(String::new());
            }
            row[w.col - 1] = w.value;
        }
        Ok(())
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, SheetError> {
        self.check(false)?;
        Ok(self.inner.sheets.lock().unwrap().keys().cloned().collect())
    }

    async fn add_sheet(&self, title: &str) -> Result<(), SheetError> {
        self.check(true)?;
        self.inner
            .sheets
            .lock()
            .unwrap()
            .entry(title.to_string())
            .or_default();
        Ok(())
    }
}

/// Retry settings with millisecond delays so failure tests stay fast.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_retry_delay_ms: 1,
        max_retry_delay_ms: 2,
        retry_jitter_ms: 0,
        rate_limit_backoff_secs: 60,
    }
}

pub fn test_config() -> BotConfig {
    BotConfig {
        token: "TEST_TOKEN".to_string(),
        webhook_url: None,
        port: 0,
        spreadsheet_id: "test-spreadsheet".to_string(),
        credentials_path: "creds.json".to_string(),
        invite_code: None,
        photo_channel: PHOTO_CHANNEL,
        parcel_channel: PARCEL_CHANNEL,
        trip_sheet: "Trips".to_string(),
        tz: FixedOffset::east_opt(3 * 3600).expect("valid offset"),
        task_poll_secs: 5,
        subtask_poll_secs: 10,
        locale: "en".to_string(),
        strict_sheets: false,
        retry: fast_retry(),
    }
}

/// Tasks sheet header recognized by discovery.
pub fn tasks_header() -> Vec<&'static str> {
    vec![
        "Date", "Driver", "Machine", "Planned", "Accepted", "ETA", "Status", "Completed",
        "Comment", "Subtask 1", "Status 1", "Subtask 2", "Status 2", "Subtask 3", "Status 3",
    ]
}

/// Today's date in the test timezone, formatted the way the sheets use it.
pub fn today() -> String {
    let cfg = test_config();
    fleetbot::records::date_string(&fleetbot::records::now_local(&cfg.tz))
}
