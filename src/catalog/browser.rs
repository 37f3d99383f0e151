//! ヘッドレスブラウザでの描画と、描画結果を抽出するアダプタ

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::CatalogSettings;
use crate::error::FetchError;
use crate::traits::{CandidateStream, SourceAdapter};
use crate::types::Listing;
use crate::website::WebsiteFinisher;

use super::extract::{extract_listings, CardDefaults, CardLayout};
use super::{finish_listings, AdapterContext};

/// スクロール1回ごとの待機（遅延読み込み用）
const SCROLL_WAIT_MS: u64 = 700;
/// ページ安定待機のタイムアウト（ミリ秒）
const PAGE_STABLE_TIMEOUT_MS: u64 = 6000;
const STABLE_CHECK_INTERVAL_MS: u64 = 300;
const REQUIRED_STABLE_CHECKS: u32 = 3;
const READY_STATE_POLLS: u32 = 30;

/// 起動済みブラウザ
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl BrowserSession {
    /// ブラウザを起動し、CDP イベントハンドラを同じランタイム上で動かす
    pub async fn launch(
        chrome_path: Option<&str>,
        headless: bool,
        debug_logging: bool,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        info!("Launching browser (headless={})", headless);

        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("prospect-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(1280, 900)
            .no_sandbox()
            .request_timeout(request_timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if let Some(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !headless {
            builder = builder.with_head();
        }
        if debug_logging {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let config = builder.build().map_err(FetchError::BrowserInit)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::BrowserInit(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {:?}", e);
                }
            }
        });

        info!("Browser launched");
        Ok(Self {
            browser,
            handler,
            timeout: request_timeout,
        })
    }

    /// ページを開き、遅延読み込みが止まるまでスクロールした後の HTML を返す
    pub async fn render(&self, url: &str, settings: &CatalogSettings) -> Result<String, FetchError> {
        info!("Rendering {}", url);
        let page = timeout(self.timeout, self.browser.new_page(url))
            .await
            .map_err(|_| FetchError::Timeout(format!("ページ読み込み: {}", url)))?
            .map_err(|e| FetchError::Navigation(format!("{}: {}", url, e)))?;

        let result = self.load_fully(&page, settings).await;
        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }
        result
    }

    async fn load_fully(&self, page: &Page, settings: &CatalogSettings) -> Result<String, FetchError> {
        wait_ready(page).await;
        scroll_to_end(page, settings.scroll_rounds).await;
        wait_stable(page).await;

        if settings.debug {
            if let Ok(screenshot) = page
                .screenshot(ScreenshotParams::builder().full_page(true).build())
                .await
            {
                use base64::Engine;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
                debug!("Rendered page screenshot: data:image/png;base64,{}", encoded);
            }
        }

        let html = timeout(self.timeout, page.content())
            .await
            .map_err(|_| FetchError::Timeout("HTML取得".into()))?
            .map_err(|e| FetchError::Navigation(format!("HTML取得失敗: {}", e)))?;
        debug!("Rendered HTML: {} bytes", html.len());
        Ok(html)
    }

    pub async fn close(mut self) -> Result<(), FetchError> {
        info!("Closing browser");
        let closed = self.browser.close().await;
        self.handler.abort();
        closed
            .map(|_| ())
            .map_err(|e| FetchError::BrowserInit(format!("ブラウザ終了エラー: {}", e)))
    }
}

async fn wait_ready(page: &Page) {
    for i in 0..READY_STATE_POLLS {
        let state = match page.evaluate("document.readyState").await {
            Ok(v) => v.into_value::<String>().unwrap_or_default(),
            Err(e) => {
                debug!("readyState check error: {}", e);
                String::new()
            }
        };
        if state == "complete" || state == "interactive" {
            debug!("Document {} after {} polls", state, i + 1);
            return;
        }
        sleep(Duration::from_millis(500)).await;
    }
    warn!("Document never reached ready state, proceeding anyway");
}

async fn scroll_to_end(page: &Page, rounds: u32) {
    let mut previous: u64 = 0;
    for round in 0..rounds {
        if let Err(e) = page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
        {
            debug!("Scroll failed: {}", e);
            return;
        }
        sleep(Duration::from_millis(SCROLL_WAIT_MS)).await;

        let height = page
            .evaluate("document.body.scrollHeight")
            .await
            .ok()
            .and_then(|v| v.into_value::<u64>().ok())
            .unwrap_or(0);
        if height == previous {
            debug!("Scroll height settled at {} after {} rounds", height, round + 1);
            return;
        }
        previous = height;
    }
}

/// HTML の長さが連続して変わらなくなるまで待機
async fn wait_stable(page: &Page) {
    let start = std::time::Instant::now();
    let limit = Duration::from_millis(PAGE_STABLE_TIMEOUT_MS);
    let mut last_len: Option<usize> = None;
    let mut stable_count = 0;

    while start.elapsed() < limit {
        match page.evaluate("document.documentElement.outerHTML.length").await {
            Ok(val) => {
                let current = val.into_value::<usize>().unwrap_or(0);
                if last_len == Some(current) {
                    stable_count += 1;
                    if stable_count >= REQUIRED_STABLE_CHECKS {
                        debug!("Page stable after {:?}", start.elapsed());
                        return;
                    }
                } else {
                    stable_count = 0;
                }
                last_len = Some(current);
            }
            Err(e) => {
                debug!("Page stable check error: {}", e);
                stable_count = 0;
            }
        }
        sleep(Duration::from_millis(STABLE_CHECK_INTERVAL_MS)).await;
    }
    warn!("Page stable timeout after {:?}, proceeding anyway", start.elapsed());
}

/// 1ページを描画してカードを抽出するカタログ
pub struct BrowserCatalog {
    key: &'static str,
    defaults: CardDefaults,
    finisher: Arc<WebsiteFinisher>,
    chrome_path: Option<String>,
    timeout: Duration,
    headless: bool,
    debug: bool,
    session: Option<BrowserSession>,
}

impl BrowserCatalog {
    pub fn new(
        key: &'static str,
        defaults: CardDefaults,
        settings: &CatalogSettings,
        ctx: &AdapterContext,
    ) -> Self {
        Self {
            key,
            defaults,
            finisher: ctx.finisher.clone(),
            chrome_path: ctx.chrome_path.clone(),
            timeout: ctx.timeout,
            headless: settings.headless,
            debug: settings.debug,
            session: None,
        }
    }

    async fn load(&self, settings: &CatalogSettings) -> Result<Vec<Result<Listing, FetchError>>, FetchError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| FetchError::BrowserInit("ブラウザが初期化されていません".into()))?;
        let html = session.render(&settings.url, settings).await?;
        let layout = CardLayout::from_settings(settings, &self.defaults);
        let entries = extract_listings(&html, &layout)?;
        info!("{}: extracted {} entries", self.key, entries.len());
        Ok(entries)
    }
}

#[async_trait]
impl SourceAdapter for BrowserCatalog {
    fn catalog_key(&self) -> &'static str {
        self.key
    }

    async fn initialize(&mut self) -> Result<(), FetchError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = BrowserSession::launch(
            self.chrome_path.as_deref(),
            self.headless,
            self.debug,
            self.timeout,
        )
        .await?;
        self.session = Some(session);
        Ok(())
    }

    fn fetch<'a>(&'a self, settings: &'a CatalogSettings) -> CandidateStream<'a> {
        let listings = stream::once(self.load(settings))
            .flat_map(|loaded| match loaded {
                Ok(entries) => stream::iter(entries),
                Err(e) => stream::iter(vec![Err(e)]),
            })
            .boxed();
        finish_listings(listings, &self.finisher, settings)
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}
