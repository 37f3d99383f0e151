//! 採用行のスプレッドシート書き込み
//!
//! - 指定タブの `start_column` 列から、`start_row` 以降で最後に値がある行の次に追記
//! - 全行を1回の batchUpdate で送る（1範囲あたり最大500行）
//! - 429 のみバックオフ付きで再試行し、それ以外は即座に失敗

pub mod auth;
pub mod client;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{backoff_ms, SheetLayout};
use crate::error::SheetError;
use crate::traits::RowSink;
use crate::types::OutputRow;

pub use client::{GoogleSheetsClient, SheetsApi, ValueRange};

/// 1つの範囲に含める最大行数
pub const MAX_ROWS_PER_RANGE: usize = 500;
/// プレビュー表示する行数
pub const PREVIEW_ROWS: usize = 25;
/// Company Name | Industry | Website
const ROW_WIDTH: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Sheets の最終列 ZZZ
pub const MAX_COLUMN: u32 = 18278;

/// 列名 → 列番号（A=1、ZZZ まで）
pub fn column_index(letters: &str) -> Result<u32, SheetError> {
    let letters = letters.trim();
    let invalid = || SheetError::InvalidRange(format!("列名が不正: '{}'", letters));
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }
    let mut index: u32 = 0;
    for b in letters.to_ascii_uppercase().bytes() {
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(u32::from(b - b'A' + 1)))
            .filter(|i| *i <= MAX_COLUMN)
            .ok_or_else(invalid)?;
    }
    Ok(index)
}

/// 列番号 → 列名（1=A）
pub fn column_letter(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// A1 表記用にタブ名をクォート
pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

/// 書き込み先の列範囲
#[derive(Debug, Clone, PartialEq, Eq)]
struct Columns {
    first: String,
    last: String,
    start_row: u32,
}

impl Columns {
    fn from_layout(layout: &SheetLayout) -> Result<Self, SheetError> {
        let first = column_index(&layout.start_column)?;
        if layout.start_row == 0 {
            return Err(SheetError::InvalidRange("start_row は1以上".into()));
        }
        let last = first + ROW_WIDTH - 1;
        if last > MAX_COLUMN {
            return Err(SheetError::InvalidRange(format!(
                "start_column {} からでは3列が収まりません",
                layout.start_column
            )));
        }
        Ok(Self {
            first: column_letter(first),
            last: column_letter(last),
            start_row: layout.start_row,
        })
    }
}

/// Google Sheets への追記
pub struct SheetWriter<A> {
    api: A,
    tab: String,
    layout: SheetLayout,
    retry_count: u32,
    backoff_base_ms: u64,
}

impl<A: SheetsApi> SheetWriter<A> {
    pub fn new(api: A, tab: impl Into<String>, layout: SheetLayout, retry_count: u32) -> Self {
        Self {
            api,
            tab: tab.into(),
            layout,
            retry_count,
            backoff_base_ms: INITIAL_BACKOFF_MS,
        }
    }

    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    /// 429 のみ再試行し、使い切ったら `RateLimitExhausted`
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SheetError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SheetError>> + Send,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if attempt >= self.retry_count {
                        return Err(SheetError::RateLimitExhausted {
                            attempts: attempt + 1,
                        });
                    }
                    let backoff = backoff_ms(self.backoff_base_ms, attempt);
                    warn!(
                        "Sheets {} throttled (attempt {}), retrying in {}ms",
                        what,
                        attempt + 1,
                        backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 最後に値がある行の次の行番号（`start_row` 以上）
    async fn next_empty_row(&self, columns: &Columns) -> Result<u32, SheetError> {
        let range = format!(
            "{}!{}{}:{}",
            quote_tab(&self.tab),
            columns.first,
            columns.start_row,
            columns.last
        );
        let values = self.with_retry("read", || self.api.read_range(&range)).await?;
        let filled = values
            .iter()
            .rposition(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|i| i as u32 + 1)
            .unwrap_or(0);
        Ok(columns.start_row + filled)
    }

    /// 書き込み範囲（500行ごとに分割）
    fn value_ranges(&self, columns: &Columns, first_row: u32, rows: &[OutputRow]) -> Vec<ValueRange> {
        let tab = quote_tab(&self.tab);
        rows.chunks(MAX_ROWS_PER_RANGE)
            .enumerate()
            .map(|(i, chunk)| {
                let top = first_row + (i * MAX_ROWS_PER_RANGE) as u32;
                let bottom = top + chunk.len() as u32 - 1;
                ValueRange::rows(
                    format!("{}!{}{}:{}{}", tab, columns.first, top, columns.last, bottom),
                    chunk.iter().map(OutputRow::cells).collect(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl<A: SheetsApi> RowSink for SheetWriter<A> {
    /// 認証とタブの存在確認（タブは自動作成しない）
    async fn preflight(&self) -> Result<(), SheetError> {
        Columns::from_layout(&self.layout)?;
        let titles = self.with_retry("metadata", || self.api.tab_titles()).await?;
        if !titles.iter().any(|t| t == &self.tab) {
            return Err(SheetError::MissingTab(self.tab.clone()));
        }
        info!("Sheet tab '{}' is ready", self.tab);
        Ok(())
    }

    async fn append(&self, rows: &[OutputRow]) -> Result<usize, SheetError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = Columns::from_layout(&self.layout)?;
        let first_row = self.next_empty_row(&columns).await?;
        let data = self.value_ranges(&columns, first_row, rows);

        info!(
            "Writing {} row(s) to '{}' starting at {}{}",
            rows.len(),
            self.tab,
            columns.first,
            first_row
        );
        let updated = self.with_retry("write", || self.api.batch_update(&data)).await?;
        if updated != rows.len() {
            warn!("Sheets reported {} updated rows, expected {}", updated, rows.len());
        }
        Ok(rows.len())
    }
}

/// 書き込まずにログへ出すだけのシンク（dry-run / シート無効時）
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewWriter;

#[async_trait]
impl RowSink for PreviewWriter {
    async fn append(&self, rows: &[OutputRow]) -> Result<usize, SheetError> {
        info!("Preview: {} row(s) would be written", rows.len());
        for (i, row) in rows.iter().take(PREVIEW_ROWS).enumerate() {
            info!(
                "  {:>2}. {} | {} | {}",
                i + 1,
                row.company_name,
                row.industry,
                row.website
            );
        }
        if rows.len() > PREVIEW_ROWS {
            info!("  ... and {} more", rows.len() - PREVIEW_ROWS);
        }
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSheets {
        tabs: Vec<String>,
        existing: Vec<Vec<String>>,
        read_ranges: Mutex<Vec<String>>,
        batches: Mutex<Vec<Vec<ValueRange>>>,
        batch_failures: Mutex<VecDeque<SheetError>>,
    }

    impl FakeSheets {
        fn with_tab(tab: &str) -> Self {
            Self {
                tabs: vec!["Other".into(), tab.into()],
                ..Default::default()
            }
        }

        fn batch_calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SheetsApi for FakeSheets {
        async fn tab_titles(&self) -> Result<Vec<String>, SheetError> {
            Ok(self.tabs.clone())
        }

        async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
            self.read_ranges.lock().unwrap().push(range.to_string());
            Ok(self.existing.clone())
        }

        async fn batch_update(&self, data: &[ValueRange]) -> Result<usize, SheetError> {
            self.batches.lock().unwrap().push(data.to_vec());
            if let Some(err) = self.batch_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(data.iter().map(|r| r.values.len()).sum())
        }
    }

    fn row(n: usize) -> OutputRow {
        OutputRow {
            company_name: format!("Company {}", n),
            industry: "HVAC services".into(),
            website: format!("https://c{}.example/", n),
        }
    }

    fn writer(api: FakeSheets) -> SheetWriter<FakeSheets> {
        SheetWriter::new(api, "Prospects", SheetLayout::default(), 2).with_backoff_base_ms(0)
    }

    #[test]
    fn test_column_conversions() {
        assert_eq!(column_index("C").unwrap(), 3);
        assert_eq!(column_index("aa").unwrap(), 27);
        assert_eq!(column_letter(3), "C");
        assert_eq!(column_letter(5), "E");
        assert_eq!(column_letter(28), "AB");
        assert!(column_index("C1").is_err());
        assert_eq!(quote_tab("Bob's list"), "'Bob''s list'");
    }

    #[test]
    fn test_column_out_of_range() {
        assert_eq!(column_index("ZZZ").unwrap(), MAX_COLUMN);
        assert!(matches!(column_index("AAAA"), Err(SheetError::InvalidRange(_))));
        assert!(matches!(column_index("ZZZZZZZ"), Err(SheetError::InvalidRange(_))));
        assert!(matches!(column_index(&"Z".repeat(40)), Err(SheetError::InvalidRange(_))));

        let layout = |column: &str| SheetLayout {
            start_column: column.to_string(),
            start_row: 5,
        };
        assert!(Columns::from_layout(&layout("ZZX")).is_ok());
        assert!(matches!(Columns::from_layout(&layout("ZZY")), Err(SheetError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_preflight_rejects_oversized_column() {
        let w = SheetWriter::new(
            FakeSheets::with_tab("Prospects"),
            "Prospects",
            SheetLayout {
                start_column: "ZZZZZZZ".into(),
                start_row: 5,
            },
            2,
        );
        assert!(matches!(w.preflight().await, Err(SheetError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_preflight_missing_tab() {
        let w = writer(FakeSheets::with_tab("Leads"));
        assert!(matches!(w.preflight().await, Err(SheetError::MissingTab(tab)) if tab == "Prospects"));

        let ok = writer(FakeSheets::with_tab("Prospects"));
        assert!(ok.preflight().await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let w = writer(FakeSheets::with_tab("Prospects"));
        assert_eq!(w.append(&[]).await.unwrap(), 0);
        assert_eq!(w.api.batch_calls(), 0);
        assert!(w.api.read_ranges.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_after_existing_rows_in_order() {
        let mut api = FakeSheets::with_tab("Prospects");
        api.existing = vec![
            vec!["Old A".into(), "x".into(), "y".into()],
            vec![],
            vec!["".into(), "Old C".into()],
        ];
        let w = writer(api);
        let rows = vec![row(1), row(2)];
        assert_eq!(w.append(&rows).await.unwrap(), 2);

        assert_eq!(w.api.read_ranges.lock().unwrap()[0], "'Prospects'!C5:E");
        let batches = w.api.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].range, "'Prospects'!C8:E9");
        assert_eq!(batches[0][0].values[0], row(1).cells());
        assert_eq!(batches[0][0].values[1], row(2).cells());
    }

    #[tokio::test]
    async fn test_large_batch_split_into_ranges_in_one_call() {
        let w = writer(FakeSheets::with_tab("Prospects"));
        let rows: Vec<_> = (0..1201).map(row).collect();
        assert_eq!(w.append(&rows).await.unwrap(), 1201);

        let batches = w.api.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let ranges: Vec<_> = batches[0].iter().map(|r| r.range.as_str()).collect();
        assert_eq!(
            ranges,
            vec!["'Prospects'!C5:E504", "'Prospects'!C505:E1004", "'Prospects'!C1005:E1205"]
        );
        assert_eq!(batches[0][2].values.last().unwrap()[0], "Company 1200");
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_exhausted() {
        let api = FakeSheets::with_tab("Prospects");
        api.batch_failures
            .lock()
            .unwrap()
            .extend([SheetError::Throttled, SheetError::Throttled, SheetError::Throttled]);
        let w = writer(api);
        let err = w.append(&[row(1)]).await.unwrap_err();
        assert!(matches!(err, SheetError::RateLimitExhausted { attempts: 3 }));
        assert_eq!(w.api.batch_calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_recovers() {
        let api = FakeSheets::with_tab("Prospects");
        api.batch_failures.lock().unwrap().push_back(SheetError::Throttled);
        let w = writer(api);
        assert_eq!(w.append(&[row(1)]).await.unwrap(), 1);
        assert_eq!(w.api.batch_calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let api = FakeSheets::with_tab("Prospects");
        api.batch_failures
            .lock()
            .unwrap()
            .push_back(SheetError::Auth("status 401".into()));
        let w = writer(api);
        assert!(matches!(w.append(&[row(1)]).await, Err(SheetError::Auth(_))));
        assert_eq!(w.api.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_preview_reports_all_rows() {
        let rows: Vec<_> = (0..30).map(row).collect();
        assert_eq!(PreviewWriter.append(&rows).await.unwrap(), 30);
    }
}
