//! Google Sheets API v4 クライアント

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::error::SheetError;

use super::auth::{ServiceAccountKey, TokenProvider};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// batchUpdate の1範囲分
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    pub range: String,
    pub major_dimension: String,
    pub values: Vec<Vec<String>>,
}

impl ValueRange {
    pub fn rows(range: impl Into<String>, values: Vec<Vec<String>>) -> Self {
        Self {
            range: range.into(),
            major_dimension: "ROWS".to_string(),
            values,
        }
    }
}

/// Sheets API の境界（テストでは差し替える）
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// スプレッドシート内のタブ名一覧
    async fn tab_titles(&self) -> Result<Vec<String>, SheetError>;

    /// A1 範囲の値（空セルは空文字、末尾の空行は含まれない）
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError>;

    /// 1回の values:batchUpdate（valueInputOption=RAW）。更新行数を返す
    async fn batch_update(&self, data: &[ValueRange]) -> Result<usize, SheetError>;
}

/// HTTP ステータスをシートエラーへ
pub fn status_error(status: u16, body: String) -> SheetError {
    match status {
        401 | 403 => SheetError::Auth(format!("status {}: {}", status, body)),
        404 => SheetError::NotFound(body),
        429 => SheetError::Throttled,
        _ => SheetError::Api {
            status,
            message: body,
        },
    }
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateResponse {
    #[serde(default)]
    total_updated_rows: usize,
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// サービスアカウントで認証する本番クライアント
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    spreadsheet_id: String,
    base_url: String,
}

impl GoogleSheetsClient {
    pub fn new(
        http: reqwest::Client,
        key: ServiceAccountKey,
        spreadsheet_id: impl Into<String>,
    ) -> Self {
        Self {
            tokens: TokenProvider::new(http.clone(), key),
            http,
            spreadsheet_id: spreadsheet_id.into(),
            base_url: SHEETS_BASE_URL.to_string(),
        }
    }

    /// 鍵ファイルを読み込んで生成
    pub fn from_service_account(
        key_path: &Path,
        spreadsheet_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SheetError> {
        let key = ServiceAccountKey::from_file(key_path)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SheetError::Network(e.to_string()))?;
        Ok(Self::new(http, key, spreadsheet_id))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SheetError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SheetError::InvalidRange(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::InvalidRange(self.base_url.clone()))?
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SheetError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SheetError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, "Sheets API error");
        Err(status_error(status.as_u16(), body))
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn tab_titles(&self) -> Result<Vec<String>, SheetError> {
        let mut url = self.endpoint(&[])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties.title");
        let meta: SpreadsheetMeta = self
            .send(self.http.get(url))
            .await?
            .json()
            .await
            .map_err(|e| SheetError::Network(e.to_string()))?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.endpoint(&["values", range])?;
        let body: ValuesResponse = self
            .send(self.http.get(url))
            .await?
            .json()
            .await
            .map_err(|e| SheetError::Network(e.to_string()))?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn batch_update(&self, data: &[ValueRange]) -> Result<usize, SheetError> {
        let url = Url::parse(&format!(
            "{}/{}/values:batchUpdate",
            self.base_url, self.spreadsheet_id
        ))
        .map_err(|e| SheetError::InvalidRange(e.to_string()))?;
        let payload = json!({
            "valueInputOption": "RAW",
            "data": data,
        });
        debug!("batchUpdate: {} range(s)", data.len());
        let body: BatchUpdateResponse = self
            .send(self.http.post(url).json(&payload))
            .await?
            .json()
            .await
            .map_err(|e| SheetError::Network(e.to_string()))?;
        Ok(body.total_updated_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(401, String::new()), SheetError::Auth(_)));
        assert!(matches!(status_error(403, String::new()), SheetError::Auth(_)));
        assert!(matches!(status_error(404, String::new()), SheetError::NotFound(_)));
        assert!(matches!(status_error(429, String::new()), SheetError::Throttled));
        assert!(matches!(status_error(500, String::new()), SheetError::Api { status: 500, .. }));
    }

    #[test]
    fn test_value_range_json() {
        let range = ValueRange::rows("'Prospects'!C5:E5", vec![vec!["A".into(), "B".into(), "C".into()]]);
        let value = serde_json::to_value(&range).unwrap();
        assert_eq!(value["majorDimension"], "ROWS");
        assert_eq!(value["range"], "'Prospects'!C5:E5");
        assert_eq!(value["values"][0][2], "C");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(json!("x")), "x");
        assert_eq!(cell_text(json!(42)), "42");
        assert_eq!(cell_text(serde_json::Value::Null), "");
    }

    #[test]
    fn test_values_endpoint_encodes_range() {
        let key = ServiceAccountKey {
            client_email: "a@b".into(),
            private_key: String::new(),
            token_uri: "https://oauth2.example/token".into(),
        };
        let client = GoogleSheetsClient::new(reqwest::Client::new(), key, "sheet-123");
        let url = client.endpoint(&["values", "'My Tab'!C5:E"]).unwrap();
        assert!(url.as_str().starts_with("https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/"));
        assert!(!url.as_str().contains(' '));
    }
}
