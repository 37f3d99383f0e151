//! AACC 法人会員ディレクトリ
//!
//! 会社名のリンクはサイト内のモーダルを開くだけなので、Webサイトは検索で補完する。

use crate::config::CatalogSettings;
use crate::traits::SourceAdapter;

use super::browser::BrowserCatalog;
use super::extract::CardDefaults;
use super::AdapterContext;

pub const KEY: &str = "aacc";

pub const DEFAULTS: CardDefaults = CardDefaults {
    name_selectors: &[
        r#"a.popup-modal[href*="/membership-directory/"]"#,
        r#"a[href*="/membership-directory/"]"#,
    ],
    container_ancestors: 0,
    excluded_href_fragments: &[],
};

pub fn adapter(settings: &CatalogSettings, ctx: &AdapterContext) -> Box<dyn SourceAdapter> {
    Box::new(BrowserCatalog::new(KEY, DEFAULTS, settings, ctx))
}
