//! 取得 → 判定 → 追記 のオーケストレータ
//!
//! カタログ固有の処理は [`SourceAdapter`] 側に閉じており、ここは
//! どのカタログでも同じ手順で動く。

use futures::StreamExt;
use tracing::{error, info, warn};

use crate::config::CatalogSettings;
use crate::error::PipelineError;
use crate::traits::{Classifier, RowSink, SourceAdapter};
use crate::types::{OutputRow, RunSummary};

/// 1回の実行に必要なコンポーネント
pub struct Pipeline {
    classifier: Box<dyn Classifier>,
    sink: Box<dyn RowSink>,
    max_companies: Option<usize>,
}

impl Pipeline {
    pub fn new(classifier: Box<dyn Classifier>, sink: Box<dyn RowSink>) -> Self {
        Self {
            classifier,
            sink,
            max_companies: None,
        }
    }

    /// 取り出す候補数の上限（取得エラーも1件と数える）
    pub fn with_max_companies(mut self, max: Option<usize>) -> Self {
        self.max_companies = max;
        self
    }

    /// 1カタログ分を実行する
    ///
    /// エントリ単位の失敗は集計のみで続行する。追記は最後に1回だけ行い、
    /// 失敗した場合は集計済みのサマリを `SheetWrite` に載せて返す。
    pub async fn run(
        &self,
        adapter: &mut dyn SourceAdapter,
        settings: &CatalogSettings,
    ) -> Result<RunSummary, PipelineError> {
        let catalog = adapter.catalog_key();
        let mut summary = RunSummary::new(catalog);

        self.sink.preflight().await.map_err(|e| {
            error!("Sink preflight failed: {}", e);
            PipelineError::Sheet(e)
        })?;

        info!("Initializing source '{}'", catalog);
        adapter.initialize().await.map_err(|e| {
            error!("Source initialization failed: {}", e);
            PipelineError::Source(e)
        })?;

        let rows = self.collect_rows(&*adapter, settings, &mut summary).await;

        if let Err(e) = adapter.close().await {
            warn!("Failed to close source '{}': {}", catalog, e);
        }

        info!(
            "Classified {} candidate(s): accepted={} excluded={} errors={}",
            summary.processed, summary.accepted, summary.excluded, summary.errors
        );

        match self.sink.append(&rows).await {
            Ok(written) => {
                summary.rows_written = written;
                info!("Wrote {} row(s)", written);
                Ok(summary)
            }
            Err(source) => {
                error!("Sheet write failed after {} accepted row(s): {}", summary.accepted, source);
                Err(PipelineError::SheetWrite { summary, source })
            }
        }
    }

    async fn collect_rows(
        &self,
        adapter: &dyn SourceAdapter,
        settings: &CatalogSettings,
        summary: &mut RunSummary,
    ) -> Vec<OutputRow> {
        let mut candidates = adapter.fetch(settings);
        if let Some(max) = self.max_companies {
            info!("Limiting run to {} candidate(s)", max);
            candidates = candidates.take(max).boxed();
        }

        let mut rows = Vec::new();
        while let Some(item) = candidates.next().await {
            summary.processed += 1;
            let candidate = match item {
                Ok(candidate) => candidate,
                Err(e) => {
                    summary.errors += 1;
                    warn!("[{}] Skipping entry: {}", summary.processed, e);
                    continue;
                }
            };

            info!("[{}] {} ({})", summary.processed, candidate.name, candidate.website);
            match self.classifier.classify(&candidate).await {
                Ok(result) => match OutputRow::from_accepted(candidate, result) {
                    Some(row) => {
                        info!("  -> accepted: {}", row.industry);
                        summary.accepted += 1;
                        rows.push(row);
                    }
                    None => {
                        info!("  -> excluded");
                        summary.excluded += 1;
                    }
                },
                Err(e) => {
                    summary.errors += 1;
                    warn!("  -> classification failed, excluding: {}", e);
                }
            }
        }
        rows
    }
}
