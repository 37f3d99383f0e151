//! AACCIL ビジネスディレクトリ（静的 HTML、`sf_paged` によるページ送り）

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::CatalogSettings;
use crate::error::FetchError;
use crate::traits::{CandidateStream, SourceAdapter};
use crate::types::Listing;
use crate::website::WebsiteFinisher;

use super::extract::{detect_last_page, extract_listings, page_url, CardDefaults, CardLayout, PAGE_PARAM};
use super::{finish_listings, AdapterContext};

pub const KEY: &str = "aaccil";

pub const DEFAULTS: CardDefaults = CardDefaults {
    name_selectors: &[r#"a[href*="/business/"]"#],
    container_ancestors: 0,
    excluded_href_fragments: &[PAGE_PARAM],
};

type PageEntries = Vec<Result<Listing, FetchError>>;

pub struct AaccilCatalog {
    http: reqwest::Client,
    finisher: Arc<WebsiteFinisher>,
}

pub fn adapter(_settings: &CatalogSettings, ctx: &AdapterContext) -> Box<dyn SourceAdapter> {
    Box::new(AaccilCatalog {
        http: ctx.http.clone(),
        finisher: ctx.finisher.clone(),
    })
}

/// ページ取得失敗は1件のエラーとして流す
fn page_items(result: Result<PageEntries, FetchError>) -> PageEntries {
    result.unwrap_or_else(|e| vec![Err(e)])
}

impl AaccilCatalog {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }

    async fn fetch_page(&self, settings: &CatalogSettings, page: u32) -> Result<PageEntries, FetchError> {
        sleep(settings.request_delay()).await;
        let url = page_url(&settings.url, page)?;
        let html = self.fetch_html(&url).await?;
        let layout = CardLayout::from_settings(settings, &DEFAULTS);
        let entries = extract_listings(&html, &layout)?;
        debug!("page {}: {} entries", page, entries.len());
        Ok(entries)
    }

    /// 1ページ目を取得し、その抽出結果と巡回する最終ページ番号を返す
    async fn first_page(&self, settings: &CatalogSettings) -> Result<(PageEntries, u32), FetchError> {
        let html = self.fetch_html(&settings.url).await?;
        let detected = detect_last_page(&html).unwrap_or(1);
        let last = detected.min(settings.max_pages).max(1);
        if last < detected {
            warn!("{} pages detected, capped at {}", detected, last);
        }
        info!("{}: crawling {} page(s)", KEY, last);

        let layout = CardLayout::from_settings(settings, &DEFAULTS);
        let entries = extract_listings(&html, &layout)?;
        Ok((entries, last))
    }
}

#[async_trait]
impl SourceAdapter for AaccilCatalog {
    fn catalog_key(&self) -> &'static str {
        KEY
    }

    fn fetch<'a>(&'a self, settings: &'a CatalogSettings) -> CandidateStream<'a> {
        let listings = stream::once(self.first_page(settings))
            .flat_map(move |first| match first {
                Ok((entries, last)) => {
                    let rest = stream::iter(2..=last)
                        .then(move |page| self.fetch_page(settings, page))
                        .flat_map(|result| stream::iter(page_items(result)));
                    stream::iter(entries).chain(rest).boxed()
                }
                Err(e) => stream::iter(vec![Err(e)]).boxed(),
            })
            .boxed();
        finish_listings(listings, &self.finisher, settings)
    }
}
