use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::info;

use crate::auth::Credential;
use crate::error::{Result, TrackerError};

const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// One collected sample, appended to the sheet as a row.
#[derive(Debug, Clone)]
pub struct MetricRow {
    pub time: String,
    pub count: usize,
}

impl MetricRow {
    /// Row for `count` online members, stamped with the current time.
    pub fn now(count: usize) -> Self {
        Self {
            time: format_timestamp(Utc::now()),
            count,
        }
    }

    // RAW value input keeps strings literal, so the count goes out as a
    // JSON number or the cell would hold text.
    fn values(&self) -> Vec<serde_json::Value> {
        vec![self.time.clone().into(), self.count.into()]
    }
}

/// ISO-8601 with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Spreadsheet metadata, reduced to what sheet lookup needs.
#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

impl SpreadsheetMeta {
    fn titles(self) -> Vec<String> {
        self.sheets.into_iter().map(|s| s.properties.title).collect()
    }
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Append-only Google Sheets client for a single spreadsheet document.
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    sheet_tab: String,
    credential: Credential,
}

impl SheetsClient {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        sheet_tab: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: SHEETS_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_tab: sheet_tab.into(),
            credential,
        }
    }

    /// Create the target sheet with its header row, unless a sheet with
    /// that title already exists. Safe to call on every startup.
    pub async fn ensure_sheet(&self, headers: &[&str]) -> Result<()> {
        let titles = self.sheet_titles().await?;
        if titles.iter().any(|t| t == &self.sheet_tab) {
            return Ok(());
        }

        info!("Creating sheet '{}'", self.sheet_tab);
        let token = self.credential.bearer_token(&self.http).await?;
        let url = format!("{}/{}:batchUpdate", self.base_url, self.spreadsheet_id);
        let body = serde_json::json!({
            "requests": [{
                "addSheet": { "properties": { "title": self.sheet_tab } }
            }]
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        self.check_response(response).await?;

        let header_row = headers.iter().map(|h| serde_json::Value::from(*h)).collect();
        self.append_values(vec![header_row]).await
    }

    /// Append one metric row. No dedup by timestamp; rows are never
    /// updated or deleted.
    pub async fn append_row(&self, row: &MetricRow) -> Result<()> {
        self.append_values(vec![row.values()]).await
    }

    /// Titles of every sheet in the document.
    async fn sheet_titles(&self) -> Result<Vec<String>> {
        let token = self.credential.bearer_token(&self.http).await?;
        let url = format!(
            "{}/{}?fields=sheets.properties",
            self.base_url, self.spreadsheet_id
        );

        let response = self.http.get(&url).bearer_auth(&token).send().await?;
        let meta: SpreadsheetMeta = self.check_response_json(response).await?;
        Ok(meta.titles())
    }

    async fn append_values(&self, rows: Vec<Vec<serde_json::Value>>) -> Result<()> {
        let token = self.credential.bearer_token(&self.http).await?;
        let range = format!("{}!A1", self.sheet_tab);
        let url = format!(
            "{}/{}/values/{}:append?valueInputOption=RAW",
            self.base_url,
            self.spreadsheet_id,
            urlencoding::encode(&range)
        );
        let body = serde_json::json!({ "values": rows });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        self.check_response(response).await
    }

    /// Check response status and return error if not successful.
    async fn check_response(&self, response: reqwest::Response) -> Result<()> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(TrackerError::Sheets {
            message: format!("HTTP {}: {}", status, body),
        })
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Sheets {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        response.json().await.map_err(|e| TrackerError::Sheets {
            message: format!("JSON parse error: {}", e),
        })
    }
}
