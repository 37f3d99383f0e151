//! 公式サイト検索
//!
//! カタログに Web サイトが載っていない企業について、検索API
//! （Google Custom Search / SerpAPI）の結果をスコアリングして公式サイトを推定する。
//! 回答は JSON キャッシュに保存され、次回以降の実行で再利用される。

pub mod cache;
pub mod score;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{backoff_ms, SearchProvider, SearchSettings, Secrets};
use crate::error::{FetchError, PipelineError};

pub use cache::SearchCache;
pub use score::{normalize_company_name, registrable_host, score_hit};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 800;
const RESULTS_PER_QUERY: u32 = 10;

const GOOGLE_CSE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";

/// 検索結果1件
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

impl SearchHit {
    pub fn new(title: impl Into<String>, link: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            snippet: snippet.into(),
        }
    }
}

/// Web 検索バックエンド
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError>;
}

#[derive(Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    organic_results: Vec<SearchHit>,
}

/// Google Custom Search JSON API
pub struct GoogleCse {
    http: reqwest::Client,
    api_key: String,
    cx: String,
}

impl GoogleCse {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, cx: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            cx: cx.into(),
        }
    }
}

#[async_trait]
impl WebSearch for GoogleCse {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError> {
        let num = RESULTS_PER_QUERY.to_string();
        let response = self
            .http
            .get(GOOGLE_CSE_ENDPOINT)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;
        let body: CseResponse = check_status(response, GOOGLE_CSE_ENDPOINT)?
            .json()
            .await
            .map_err(|e| FetchError::Search(format!("CSE レスポンス解析失敗: {}", e)))?;
        Ok(body.items)
    }
}

/// SerpAPI（Google エンジン）
pub struct SerpApi {
    http: reqwest::Client,
    api_key: String,
}

impl SerpApi {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl WebSearch for SerpApi {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError> {
        let num = RESULTS_PER_QUERY.to_string();
        let response = self
            .http
            .get(SERPAPI_ENDPOINT)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("api_key", self.api_key.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await?;
        let body: SerpApiResponse = check_status(response, SERPAPI_ENDPOINT)?
            .json()
            .await
            .map_err(|e| FetchError::Search(format!("SerpAPI レスポンス解析失敗: {}", e)))?;
        Ok(body.organic_results)
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

fn is_transient(error: &FetchError) -> bool {
    match error {
        FetchError::Network(_) | FetchError::Timeout(_) => true,
        FetchError::Http { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// 検索結果から公式サイトを選ぶリゾルバ
pub struct SearchResolver {
    backend: Box<dyn WebSearch>,
    min_score: f64,
    extra_query: bool,
    cache_path: Option<PathBuf>,
    cache: Mutex<SearchCache>,
    backoff_base_ms: u64,
}

impl SearchResolver {
    pub fn new(backend: Box<dyn WebSearch>, settings: &SearchSettings) -> Self {
        Self {
            backend,
            min_score: settings.min_score,
            extra_query: settings.extra_query,
            cache_path: None,
            cache: Mutex::new(SearchCache::default()),
            backoff_base_ms: INITIAL_BACKOFF_MS,
        }
    }

    /// 設定のプロバイダとシークレットからリゾルバを組み立て、キャッシュを読み込む
    pub fn from_settings(
        settings: &SearchSettings,
        secrets: &Secrets,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTPクライアント生成失敗: {}", e)))?;

        let backend: Box<dyn WebSearch> = match settings.provider {
            SearchProvider::GoogleCse => {
                let (key, cx) = secrets
                    .google_cse_api_key
                    .clone()
                    .zip(secrets.google_cse_cx.clone())
                    .ok_or_else(|| {
                        PipelineError::Config(
                            "google_cse には GOOGLE_CSE_API_KEY と GOOGLE_CSE_CX が必要です".into(),
                        )
                    })?;
                Box::new(GoogleCse::new(http, key, cx))
            }
            SearchProvider::Serpapi => {
                let key = secrets.serpapi_api_key.clone().ok_or_else(|| {
                    PipelineError::Config("serpapi には SERPAPI_API_KEY が必要です".into())
                })?;
                Box::new(SerpApi::new(http, key))
            }
        };

        info!("Website resolver enabled (provider={:?})", settings.provider);
        Ok(Self::new(backend, settings).with_cache_file(settings.cache_path.clone()))
    }

    /// キャッシュファイルを読み込み、以後の回答をそこへ保存する
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.cache = Mutex::new(SearchCache::load(&path));
        self.cache_path = Some(path);
        self
    }

    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    /// 会社名から公式サイトURLを推定（見つからなければ `None`）
    pub async fn resolve(&self, company: &str) -> Result<Option<String>, FetchError> {
        let key = company.trim();
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.cached(key) {
            debug!("Search cache hit for {}", key);
            return Ok(cached);
        }

        let mut queries = vec![format!("{} official site", key)];
        if self.extra_query {
            queries.push(format!("{} company", key));
        }

        let mut hits = Vec::new();
        for query in &queries {
            hits.extend(self.search_with_retry(query).await?);
        }

        let best = best_hit(key, &hits, self.min_score);
        match &best {
            Some(url) => info!("Resolved website for {}: {}", key, url),
            None => debug!("No confident website for {} ({} hits)", key, hits.len()),
        }
        self.remember(key, best.clone());
        Ok(best)
    }

    fn cached(&self, key: &str) -> Option<Option<String>> {
        let cache = self.cache.lock().ok()?;
        cache.get(key).map(|url| url.map(str::to_string))
    }

    fn remember(&self, key: &str, url: Option<String>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        cache.insert(key, url);
        if let Some(path) = &self.cache_path {
            if let Err(e) = cache.save(path) {
                warn!("Failed to persist search cache {}: {}", path.display(), e);
            }
        }
    }

    async fn search_with_retry(&self, query: &str) -> Result<Vec<SearchHit>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.backend.search(query).await {
                Ok(hits) => return Ok(hits),
                Err(e) if is_transient(&e) && attempt + 1 < MAX_RETRIES => {
                    let backoff = backoff_ms(self.backoff_base_ms, attempt);
                    warn!(
                        "Search attempt {} failed, retrying in {}ms: {}",
                        attempt + 1,
                        backoff,
                        e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(FetchError::Search(format!("'{}': {}", query, e))),
            }
        }
    }
}

/// スコアが最も高く、閾値以上の検索結果の URL
pub fn best_hit(company: &str, hits: &[SearchHit], min_score: f64) -> Option<String> {
    let company_norm = normalize_company_name(company);
    hits.iter()
        .filter(|hit| hit.link.starts_with("http"))
        .map(|hit| {
            let score = score_hit(&company_norm, &hit.title, &hit.link, &hit.snippet);
            debug!("  score {:.1} {}", score, hit.link);
            (score, hit)
        })
        .filter(|(score, _)| *score >= min_score)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, hit)| hit.link.clone())
}
