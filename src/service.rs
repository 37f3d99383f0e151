use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::catalog::{AdapterContext, CatalogRegistry};
use crate::classifier::{GptClassifier, PassThroughClassifier};
use crate::config::{AppConfig, Secrets};
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::search::SearchResolver;
use crate::sheets::client::GoogleSheetsClient;
use crate::sheets::{PreviewWriter, SheetWriter};
use crate::traits::{Classifier, RowSink};
use crate::types::RunSummary;
use crate::website::{LinkChecker, WebsiteFinisher, USER_AGENT};

/// 実行リクエスト
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub catalog_key: String,
    /// シートに書かずプレビューのみ
    pub dry_run: bool,
    /// 設定ファイルの `max_companies` より優先
    pub max_companies: Option<usize>,
}

impl RunRequest {
    pub fn new(catalog_key: impl Into<String>) -> Self {
        Self {
            catalog_key: catalog_key.into(),
            dry_run: false,
            max_companies: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_companies(mut self, max: Option<usize>) -> Self {
        self.max_companies = max;
        self
    }
}

/// tower::Service を実装したパイプラインサービス
///
/// 設定とシークレットは生成時に一度だけ受け取り、リクエストごとに
/// アダプタ・分類器・出力先を組み立てる。
#[derive(Clone)]
pub struct PipelineService {
    config: Arc<AppConfig>,
    secrets: Arc<Secrets>,
    registry: Arc<CatalogRegistry>,
}

impl PipelineService {
    pub fn new(config: AppConfig, secrets: Secrets) -> Self {
        Self::with_registry(config, secrets, CatalogRegistry::builtin())
    }

    pub fn with_registry(config: AppConfig, secrets: Secrets, registry: CatalogRegistry) -> Self {
        Self {
            config: Arc::new(config),
            secrets: Arc::new(secrets),
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }
}

fn build_classifier(config: &AppConfig, secrets: &Secrets) -> Result<Box<dyn Classifier>, PipelineError> {
    if !config.enable_gpt {
        info!("GPT disabled: accepting every candidate");
        return Ok(Box::new(PassThroughClassifier));
    }
    let api_key = secrets.openai_api_key.as_deref().ok_or_else(|| {
        PipelineError::Config("OPENAI_API_KEY が未設定です（ENABLE_GPT=0 で無効化可）".into())
    })?;
    info!("Classifier: {} ({} mode)", config.llm_model, config.inclusion_mode);
    Ok(Box::new(GptClassifier::from_config(config, api_key)?))
}

fn build_sink(
    config: &AppConfig,
    secrets: &Secrets,
    dry_run: bool,
) -> Result<Box<dyn RowSink>, PipelineError> {
    if dry_run || !config.enable_sheets {
        info!("Sheets output disabled: preview only");
        return Ok(Box::new(PreviewWriter));
    }
    let spreadsheet_id = config
        .spreadsheet_id
        .as_deref()
        .ok_or_else(|| PipelineError::Config("spreadsheet_id (GOOGLE_SHEET_ID) が未設定です".into()))?;
    let key_path = secrets.service_account_path.as_deref().ok_or_else(|| {
        PipelineError::Config("GOOGLE_APPLICATION_CREDENTIALS が未設定です".into())
    })?;
    let client = GoogleSheetsClient::from_service_account(key_path, spreadsheet_id, config.timeout())?;
    info!("Sheets output: tab '{}'", config.target_tab);
    Ok(Box::new(SheetWriter::new(
        client,
        config.target_tab.clone(),
        config.sheet.clone(),
        config.retry_count,
    )))
}

fn build_finisher(config: &AppConfig, secrets: &Secrets) -> Result<WebsiteFinisher, PipelineError> {
    let mut finisher = WebsiteFinisher::new(config.links.clone());
    if let Some(search) = &config.search {
        finisher = finisher.with_resolver(SearchResolver::from_settings(search, secrets, config.timeout())?);
    }
    if config.links.check_live {
        finisher = finisher.with_probe(Box::new(LinkChecker::new(config.timeout())?));
    }
    Ok(finisher)
}

/// `run` 用の設定読み込み。カタログキーの確認を設定ファイルより先に行う
pub fn load_config_for_run(
    registry: &CatalogRegistry,
    catalog_key: &str,
    path: &Path,
) -> Result<AppConfig, PipelineError> {
    registry.ensure_known(catalog_key)?;
    AppConfig::load(path)
}

/// 1回分の実行（レジストリ解決 → 設定確認 → 組み立て → 実行）
pub async fn execute(
    config: &AppConfig,
    secrets: &Secrets,
    registry: &CatalogRegistry,
    request: RunRequest,
) -> Result<RunSummary, PipelineError> {
    let key = request.catalog_key.as_str();
    registry.ensure_known(key)?;

    let settings = config
        .catalog(key)
        .filter(|s| !s.url.trim().is_empty())
        .ok_or_else(|| PipelineError::Config(format!("catalogs.{}.url が設定されていません", key)))?;
    settings.validate(key)?;

    let classifier = build_classifier(config, secrets)?;
    let sink = build_sink(config, secrets, request.dry_run)?;

    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PipelineError::Config(format!("HTTPクライアント生成失敗: {}", e)))?;
    let ctx = AdapterContext::new(build_finisher(config, secrets)?, http, config.timeout())
        .with_chrome_path(secrets.chrome_path.clone());
    let mut adapter = registry.resolve(key, settings, &ctx)?;

    let pipeline = Pipeline::new(classifier, sink)
        .with_max_companies(request.max_companies.or(config.max_companies));
    pipeline.run(adapter.as_mut(), settings).await
}

impl Service<RunRequest> for PipelineService {
    type Response = RunSummary;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RunRequest) -> Self::Future {
        info!(
            "Run requested: catalog={} dry_run={}",
            req.catalog_key, req.dry_run
        );

        let config = Arc::clone(&self.config);
        let secrets = Arc::clone(&self.secrets);
        let registry = Arc::clone(&self.registry);
        Box::pin(async move {
            let summary = execute(&config, &secrets, &registry, req).await?;
            info!(
                "Run finished: catalog={} processed={} rows_written={}",
                summary.catalog, summary.processed, summary.rows_written
            );
            Ok(summary)
        })
    }
}
