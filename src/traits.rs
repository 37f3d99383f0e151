use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::CatalogSettings;
use crate::error::{ClassificationError, FetchError, SheetError};
use crate::types::{ClassificationResult, OutputRow, RawCandidate};

/// 候補の遅延ストリーム。取得エラーはエントリ単位で流れる
pub type CandidateStream<'a> = BoxStream<'a, Result<RawCandidate, FetchError>>;

/// カタログ1つ分の取得・抽出
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// レジストリ上のキー（例: "uspaacc"）
    fn catalog_key(&self) -> &'static str;

    /// ブラウザ起動など（不要なら何もしない）
    async fn initialize(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// 先頭ページから取得し直すストリームを返す
    fn fetch<'a>(&'a self, settings: &'a CatalogSettings) -> CandidateStream<'a>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// 候補1件の採用判定
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        candidate: &RawCandidate,
    ) -> Result<ClassificationResult, ClassificationError>;
}

/// 採用行の出力先
#[async_trait]
pub trait RowSink: Send + Sync {
    /// 取得開始前の確認（認証・タブ存在など）
    async fn preflight(&self) -> Result<(), SheetError> {
        Ok(())
    }

    /// 入力順のまま追記し、書き込んだ行数を返す
    async fn append(&self, rows: &[OutputRow]) -> Result<usize, SheetError>;
}
