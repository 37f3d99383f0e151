//! 見込み企業リスト作成パイプライン
//!
//! - 会員ディレクトリ（カタログ）から企業名・業種・Webサイトを取得
//! - GPT で投資方針に合う企業だけを選別
//! - 採用した行を Google Sheets の指定タブへ追記
//!
//! # 使用例
//!
//! ```rust,ignore
//! use prospect_scraper::{AppConfig, PipelineService, RunRequest, Secrets};
//! use tower::Service;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let secrets = Secrets::from_env();
//!     let config = AppConfig::load("config.yaml".as_ref()).unwrap();
//!     let mut service = PipelineService::new(config, secrets);
//!
//!     let request = RunRequest::new("uspaacc").with_dry_run(true);
//!     let summary = service.call(request).await.unwrap();
//!     println!("accepted: {}", summary.accepted);
//! }
//! ```

pub mod catalog;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod search;
pub mod service;
pub mod sheets;
pub mod traits;
pub mod types;
pub mod website;

// 主要な型をリエクスポート
pub use catalog::{AdapterContext, CatalogRegistry};
pub use config::{AppConfig, CatalogSettings, Secrets};
pub use error::{ClassificationError, FetchError, PipelineError, SheetError};
pub use pipeline::Pipeline;
pub use service::{PipelineService, RunRequest};
pub use traits::{Classifier, RowSink, SourceAdapter};
pub use types::{ClassificationResult, OutputRow, RawCandidate, RunSummary};
