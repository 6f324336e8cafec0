//! # Sheets API Module
//!
//! The raw spreadsheet operations behind an async trait, so the gateway and
//! the tests never depend on the Google client directly. The real
//! implementation wraps `google-sheets4`; tests substitute an in-memory
//! fake.

use async_trait::async_trait;
use google_sheets4::api::{
    AddSheetRequest, BatchUpdateSpreadsheetRequest, BatchUpdateValuesRequest, Request,
    SheetProperties, ValueRange,
};
use google_sheets4::{Error as ApiError, Sheets};
use tracing::debug;

/// Errors surfaced by the raw API layer.
#[derive(Debug, Clone)]
pub enum SheetError {
    /// The datastore signalled a rate limit (shared quota exhausted)
    RateLimited,
    /// Any other API failure
    Api(String),
}

impl std::fmt::Display for SheetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetError::RateLimited => write!(f, "Rate limited by the datastore"),
            SheetError::Api(msg) => write!(f, "Sheets API error: {msg}"),
        }
    }
}

impl std::error::Error for SheetError {}

/// One cell assignment, 1-based row and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub row: usize,
    pub col: usize,
    pub value: String,
}

impl CellWrite {
    pub fn new(row: usize, col: usize, value: impl Into<String>) -> Self {
        Self {
            row,
            col,
            value: value.into(),
        }
    }
}

/// Raw row-oriented operations against one spreadsheet document.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// All rows of a sheet, header included.
    async fn read_sheet(&self, sheet: &str) -> Result<Vec<Vec<String>>, SheetError>;
    /// A single row (1-based). Missing rows come back empty.
    async fn read_row(&self, sheet: &str, row: usize) -> Result<Vec<String>, SheetError>;
    /// Append one row after the last data row.
    async fn append_row(&self, sheet: &str, values: Vec<String>) -> Result<(), SheetError>;
    /// Write a batch of single cells in one request.
    async fn write_cells(&self, sheet: &str, writes: Vec<CellWrite>) -> Result<(), SheetError>;
    /// Titles of every sheet in the document.
    async fn sheet_titles(&self) -> Result<Vec<String>, SheetError>;
    /// Create a new sheet with the given title.
    async fn add_sheet(&self, title: &str) -> Result<(), SheetError>;
}

/// Column number (1-based) to its A1 letter form.
pub fn col_letter(mut col: usize) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Quote a sheet title for A1 notation.
fn quote_sheet(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

fn cell_range(sheet: &str, row: usize, col: usize) -> String {
    let a1 = format!("{}{row}", col_letter(col));
    format!("{}!{a1}:{a1}", quote_sheet(sheet))
}

/// Real implementation over the Google Sheets API.
pub struct GoogleSheetsApi {
    hub: Sheets,
    spreadsheet_id: String,
}

impl GoogleSheetsApi {
    /// Authenticate with a service-account key and bind to one document.
    pub async fn connect(key_path: &str, spreadsheet_id: &str) -> anyhow::Result<Self> {
        debug!(key_path, "reading service account credentials");
        let key = yup_oauth2::read_service_account_key(key_path).await?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await?;

        debug!("creating sheets hub");
        let hub = Sheets::new(
            hyper::Client::builder().build(
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_native_roots()
                    .https_or_http()
                    .enable_http1()
                    .build(),
            ),
            auth,
        );
        Ok(Self {
            hub,
            spreadsheet_id: spreadsheet_id.to_string(),
        })
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let (_, value_range) = self
            .hub
            .spreadsheets()
            .values_get(&self.spreadsheet_id, range)
            .doit()
            .await
            .map_err(classify)?;
        Ok(value_range.values.unwrap_or_default())
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsApi {
    async fn read_sheet(&self, sheet: &str) -> Result<Vec<Vec<String>>, SheetError> {
        self.get_values(&quote_sheet(sheet)).await
    }

    async fn read_row(&self, sheet: &str, row: usize) -> Result<Vec<String>, SheetError> {
        let range = format!("{}!{row}:{row}", quote_sheet(sheet));
        let mut rows = self.get_values(&range).await?;
        Ok(if rows.is_empty() {
            Vec::new()
        } else {
            rows.swap_remove(0)
        })
    }

    async fn append_row(&self, sheet: &str, values: Vec<String>) -> Result<(), SheetError> {
        let req = ValueRange {
            values: Some(vec![values]),
            ..Default::default()
        };
        self.hub
            .spreadsheets()
            .values_append(req, &self.spreadsheet_id, &format!("{}!A1", quote_sheet(sheet)))
            .value_input_option("RAW")
            .doit()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn write_cells(&self, sheet: &str, writes: Vec<CellWrite>) -> Result<(), SheetError> {
        let data = writes
            .into_iter()
            .map(|w| ValueRange {
                range: Some(cell_range(sheet, w.row, w.col)),
                values: Some(vec![vec![w.value]]),
                ..Default::default()
            })
            .collect();
        let req = BatchUpdateValuesRequest {
            value_input_option: Some("RAW".to_string()),
            data: Some(data),
            ..Default::default()
        };
        self.hub
            .spreadsheets()
            .values_batch_update(req, &self.spreadsheet_id)
            .doit()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, SheetError> {
        let (_, doc) = self
            .hub
            .spreadsheets()
            .get(&self.spreadsheet_id)
            .doit()
            .await
            .map_err(classify)?;
        Ok(doc
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.properties.and_then(|p| p.title))
            .collect())
    }

    async fn add_sheet(&self, title: &str) -> Result<(), SheetError> {
        let req = BatchUpdateSpreadsheetRequest {
            requests: Some(vec![Request {
                add_sheet: Some(AddSheetRequest {
                    properties: Some(SheetProperties {
                        title: Some(title.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };
        self.hub
            .spreadsheets()
            .batch_update(req, &self.spreadsheet_id)
            .doit()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Map an API error onto the small taxonomy the gateway cares about.
fn classify(err: ApiError) -> SheetError {
    match err {
        ApiError::Failure(res) if res.status().as_u16() == 429 => SheetError::RateLimited,
        ApiError::Failure(res) => SheetError::Api(format!("HTTP {}", res.status())),
        ApiError::BadRequest(value) => {
            let code = value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(|c| c.as_i64());
            let status = value
                .get("error")
                .and_then(|e| e.get("status"))
                .and_then(|s| s.as_str())
                .unwrap_or_default();
            if code == Some(429) || status == "RESOURCE_EXHAUSTED" {
                SheetError::RateLimited
            } else {
                SheetError::Api(value.to_string())
            }
        }
        other => SheetError::Api(format!("{other:?}")),
    }
}
