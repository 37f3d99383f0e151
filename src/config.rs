//! 設定ファイル (YAML) と環境変数から読む実行設定
//!
//! プロセス開始時に一度だけ読み込み、以後は不変の値として各コンポーネントに渡す。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::Selector;
use serde::Deserialize;

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// `retry_count` の上限
pub const MAX_RETRY_COUNT: u32 = 10;

/// `attempt` 回目（0始まり）の再試行前の待機ミリ秒。指数は `MAX_RETRY_COUNT` で頭打ち
pub fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.min(MAX_RETRY_COUNT)))
}

/// 実行設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub target_tab: String,
    pub spreadsheet_id: Option<String>,
    pub catalogs: BTreeMap<String, CatalogSettings>,
    pub llm_model: String,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    pub max_companies: Option<usize>,
    pub enable_gpt: bool,
    pub enable_sheets: bool,
    pub inclusion_mode: InclusionMode,
    /// プロンプトに埋め込む投資方針（任意の構造）
    pub search_thesis: serde_json::Value,
    pub sheet: SheetLayout,
    pub links: LinkPolicy,
    pub search: Option<SearchSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_tab: "Prospects".to_string(),
            spreadsheet_id: None,
            catalogs: BTreeMap::new(),
            llm_model: "gpt-4o-mini".to_string(),
            retry_count: 2,
            timeout_seconds: 30,
            max_companies: None,
            enable_gpt: true,
            enable_sheets: true,
            inclusion_mode: InclusionMode::Balanced,
            search_thesis: serde_json::Value::Object(Default::default()),
            sheet: SheetLayout::default(),
            links: LinkPolicy::default(),
            search: None,
        }
    }
}

impl AppConfig {
    /// 設定ファイルを読み込み、環境変数で上書きする
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("設定ファイルを読めません {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PipelineError> {
        let config: AppConfig = serde_yaml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("YAMLパースエラー: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 環境変数による上書き（.env 由来を含む）
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("OPENAI_MODEL").filter(|v| !v.trim().is_empty()) {
            self.llm_model = model.trim().to_string();
        }
        if let Some(v) = lookup("ENABLE_GPT") {
            self.enable_gpt = parse_flag("ENABLE_GPT", &v)?;
        }
        if let Some(v) = lookup("ENABLE_SHEETS") {
            self.enable_sheets = parse_flag("ENABLE_SHEETS", &v)?;
        }
        if let Some(v) = lookup("MAX_COMPANIES").filter(|v| !v.trim().is_empty()) {
            let n = v.trim().parse::<usize>().map_err(|_| {
                PipelineError::Config(format!("MAX_COMPANIES は整数で指定してください: {}", v))
            })?;
            self.max_companies = Some(n);
        }
        if let Some(id) = lookup("GOOGLE_SHEET_ID").filter(|v| !v.trim().is_empty()) {
            self.spreadsheet_id = Some(id.trim().to_string());
        }
        if let Some(tab) = lookup("GOOGLE_SHEET_TAB").filter(|v| !v.trim().is_empty()) {
            self.target_tab = tab.trim().to_string();
        }
        if let Some(mode) = lookup("GPT_INCLUSION_MODE") {
            self.inclusion_mode = InclusionMode::from(mode);
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.timeout_seconds == 0 {
            return Err(PipelineError::Config(
                "timeout_seconds は1以上を指定してください".into(),
            ));
        }
        if self.target_tab.trim().is_empty() {
            return Err(PipelineError::Config("target_tab が空です".into()));
        }
        if self.sheet.start_row == 0 {
            return Err(PipelineError::Config("sheet.start_row は1以上です".into()));
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(PipelineError::Config(format!(
                "retry_count は{}以下を指定してください: {}",
                MAX_RETRY_COUNT, self.retry_count
            )));
        }
        for (key, catalog) in &self.catalogs {
            catalog.validate(key)?;
        }
        Ok(())
    }

    /// ネットワーク呼び出し1回あたりのタイムアウト
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn catalog(&self, key: &str) -> Option<&CatalogSettings> {
        self.catalogs.get(key)
    }

    pub fn with_catalog(mut self, key: impl Into<String>, settings: CatalogSettings) -> Self {
        self.catalogs.insert(key.into(), settings);
        self
    }

    pub fn with_spreadsheet(mut self, id: impl Into<String>, tab: impl Into<String>) -> Self {
        self.spreadsheet_id = Some(id.into());
        self.target_tab = tab.into();
        self
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, PipelineError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PipelineError::Config(format!(
            "{} は 1/0 で指定してください: {}",
            name, other
        ))),
    }
}

/// 採用判定の厳しさ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum InclusionMode {
    #[default]
    Balanced,
    Strict,
}

impl From<String> for InclusionMode {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => InclusionMode::Strict,
            _ => InclusionMode::Balanced,
        }
    }
}

impl fmt::Display for InclusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InclusionMode::Balanced => write!(f, "balanced"),
            InclusionMode::Strict => write!(f, "strict"),
        }
    }
}

/// カタログごとの設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub url: String,
    pub name_selector: Option<String>,
    /// 名前要素からカード要素まで遡る階層数
    pub container_ancestors: Option<usize>,
    pub industry_selector: Option<String>,
    pub external_link_keywords: Vec<String>,
    pub blacklist_domains: Vec<String>,
    pub max_pages: u32,
    pub scroll_rounds: u32,
    pub request_delay_ms: u64,
    pub headless: bool,
    pub debug: bool,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            name_selector: None,
            container_ancestors: None,
            industry_selector: None,
            external_link_keywords: Vec::new(),
            blacklist_domains: Vec::new(),
            max_pages: 50,
            scroll_rounds: 20,
            request_delay_ms: 200,
            headless: true,
            debug: false,
        }
    }
}

impl CatalogSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_name_selector(mut self, selector: impl Into<String>) -> Self {
        self.name_selector = Some(selector.into());
        self
    }

    pub fn with_container_ancestors(mut self, depth: usize) -> Self {
        self.container_ancestors = Some(depth);
        self
    }

    pub fn with_industry_selector(mut self, selector: impl Into<String>) -> Self {
        self.industry_selector = Some(selector.into());
        self
    }

    pub fn with_blacklist(mut self, domains: Vec<String>) -> Self {
        self.blacklist_domains = domains;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// 設定ファイル由来の CSS セレクタが解釈できるか
    pub fn validate(&self, key: &str) -> Result<(), PipelineError> {
        let configured = [
            ("name_selector", &self.name_selector),
            ("industry_selector", &self.industry_selector),
        ];
        for (field, css) in configured {
            if let Some(css) = css {
                Selector::parse(css).map_err(|e| {
                    PipelineError::Config(format!(
                        "catalogs.{}.{} が不正なセレクタです '{}': {:?}",
                        key, field, css, e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// 書き込み位置（ヘッダー行は既存前提）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetLayout {
    pub start_column: String,
    pub start_row: u32,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            start_column: "C".to_string(),
            start_row: 5,
        }
    }
}

/// Webサイト URL の扱い
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkPolicy {
    pub allow_http: bool,
    pub check_live: bool,
    pub drop_dead_links: bool,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            allow_http: false,
            check_live: true,
            drop_dead_links: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchProvider {
    GoogleCse,
    Serpapi,
}

/// 検索による Webサイト解決
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub provider: SearchProvider,
    pub min_score: f64,
    pub extra_query: bool,
    pub cache_path: PathBuf,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            provider: SearchProvider::GoogleCse,
            min_score: 35.0,
            extra_query: false,
            cache_path: PathBuf::from(".search_cache.json"),
        }
    }
}

/// APIキーなどの秘密情報
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    /// サービスアカウント JSON のパス
    pub service_account_path: Option<PathBuf>,
    pub google_cse_api_key: Option<String>,
    pub google_cse_cx: Option<String>,
    pub serpapi_api_key: Option<String>,
    pub chrome_path: Option<String>,
}

impl Secrets {
    /// `.env` を読み込んだ上で環境変数から取得
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            service_account_path: get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            google_cse_api_key: get("GOOGLE_CSE_API_KEY"),
            google_cse_cx: get("GOOGLE_CSE_CX"),
            serpapi_api_key: get("SERPAPI_API_KEY"),
            chrome_path: get("CHROME_PATH").or_else(|| get("CHROMIUM_PATH")),
        }
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("service_account_path", &self.service_account_path)
            .field("google_cse_api_key", &mask(&self.google_cse_api_key))
            .field("google_cse_cx", &mask(&self.google_cse_cx))
            .field("serpapi_api_key", &mask(&self.serpapi_api_key))
            .field("chrome_path", &self.chrome_path)
            .finish()
    }
}
