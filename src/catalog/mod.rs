//! カタログ（会員ディレクトリサイト）ごとのソースアダプタ
//!
//! 新しいカタログは [`CatalogRegistry::register`] でファクトリを登録するだけで追加でき、
//! オーケストレータ側の変更は不要。

pub mod aacc;
pub mod aaccil;
pub mod browser;
pub mod extract;
pub mod uspaacc;

use std::collections::{BTreeMap, HashSet};
use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};

use crate::config::CatalogSettings;
use crate::error::{FetchError, PipelineError};
use crate::traits::{CandidateStream, SourceAdapter};
use crate::types::Listing;
use crate::website::WebsiteFinisher;

/// アダプタ生成時に渡す共有リソース
#[derive(Clone)]
pub struct AdapterContext {
    pub finisher: Arc<WebsiteFinisher>,
    /// 静的ページ取得用（タイムアウト設定済み）
    pub http: reqwest::Client,
    pub chrome_path: Option<String>,
    pub timeout: Duration,
}

impl AdapterContext {
    pub fn new(finisher: WebsiteFinisher, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            finisher: Arc::new(finisher),
            http,
            chrome_path: None,
            timeout,
        }
    }

    pub fn with_chrome_path(mut self, path: Option<String>) -> Self {
        self.chrome_path = path;
        self
    }
}

pub type AdapterFactory =
    Box<dyn Fn(&CatalogSettings, &AdapterContext) -> Box<dyn SourceAdapter> + Send + Sync>;

/// カタログキー → アダプタファクトリ
#[derive(Default)]
pub struct CatalogRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 組み込みカタログを登録済みのレジストリ
    pub fn builtin() -> Self {
        Self::new()
            .register(uspaacc::KEY, uspaacc::adapter)
            .register(aacc::KEY, aacc::adapter)
            .register(aaccil::KEY, aaccil::adapter)
    }

    pub fn register<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&CatalogSettings, &AdapterContext) -> Box<dyn SourceAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
        self
    }

    /// 登録済みキー（昇順）
    pub fn keys(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// 未登録キーは `UnknownCatalog`（利用可能なキー一覧付き）
    pub fn resolve(
        &self,
        key: &str,
        settings: &CatalogSettings,
        ctx: &AdapterContext,
    ) -> Result<Box<dyn SourceAdapter>, PipelineError> {
        let factory = self.factories.get(key).ok_or_else(|| self.unknown(key))?;
        Ok(factory(settings, ctx))
    }

    pub fn ensure_known(&self, key: &str) -> Result<(), PipelineError> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(self.unknown(key))
        }
    }

    fn unknown(&self, key: &str) -> PipelineError {
        PipelineError::UnknownCatalog {
            key: key.to_string(),
            available: self.keys(),
        }
    }
}

/// 会社名（大文字小文字無視）の重複を除き、Webサイト確定処理を通して候補にする
pub fn finish_listings<'a>(
    listings: BoxStream<'a, Result<Listing, FetchError>>,
    finisher: &'a WebsiteFinisher,
    settings: &'a CatalogSettings,
) -> CandidateStream<'a> {
    let mut seen = HashSet::new();
    listings
        .filter(move |item| {
            let keep = match item {
                Ok(listing) => seen.insert(listing.name.trim().to_lowercase()),
                Err(_) => true,
            };
            future::ready(keep)
        })
        .then(move |item| async move {
            match item {
                Ok(listing) => finisher.finish(listing, settings).await,
                Err(e) => Err(e),
            }
        })
        .boxed()
}
