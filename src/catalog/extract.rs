//! レンダリング済み HTML からのエントリ抽出
//!
//! `scraper::Html` は `Send` ではないため、ここの関数はすべて同期関数とし、
//! 呼び出し側は await を跨いで HTML ツリーを保持しない。

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::CatalogSettings;
use crate::error::FetchError;
use crate::types::Listing;

/// 会社名ではないリンクラベル（小文字比較）
pub const IGNORE_LABELS: &[&str] = &[
    "more info",
    "more information",
    "learn more",
    "view more",
    "view details",
    "details",
    "view profile",
    "profile",
];

/// ページ番号のクエリパラメータ
pub const PAGE_PARAM: &str = "sf_paged";

/// カタログごとの既定レイアウト
#[derive(Debug, Clone, Copy)]
pub struct CardDefaults {
    /// 優先順の会社名セレクタ
    pub name_selectors: &'static [&'static str],
    /// 会社名ノードからカードまで遡る階層数
    pub container_ancestors: usize,
    /// この文字列を href に含むノードはエントリではない
    pub excluded_href_fragments: &'static [&'static str],
}

/// 抽出に使うレイアウト（既定値 + 設定ファイルの上書き）
#[derive(Debug, Clone)]
pub struct CardLayout {
    pub name_selectors: Vec<String>,
    pub container_ancestors: usize,
    pub industry_selector: Option<String>,
    pub external_link_keywords: Vec<String>,
    pub excluded_href_fragments: Vec<String>,
    /// 相対リンク解決と自サイト判定に使う
    pub base_url: Option<Url>,
}

impl CardLayout {
    pub fn from_settings(settings: &CatalogSettings, defaults: &CardDefaults) -> Self {
        let mut name_selectors: Vec<String> = Vec::new();
        let configured = settings.name_selector.iter().map(String::as_str);
        for css in configured.chain(defaults.name_selectors.iter().copied()) {
            let css = css.trim();
            if !css.is_empty() && !name_selectors.iter().any(|s| s == css) {
                name_selectors.push(css.to_string());
            }
        }

        Self {
            name_selectors,
            container_ancestors: settings
                .container_ancestors
                .unwrap_or(defaults.container_ancestors),
            industry_selector: settings.industry_selector.clone(),
            external_link_keywords: settings
                .external_link_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            excluded_href_fragments: defaults
                .excluded_href_fragments
                .iter()
                .map(|f| f.to_string())
                .collect(),
            base_url: Url::parse(&settings.url).ok(),
        }
    }
}

fn parse_selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Selector(format!("{}: {:?}", css, e)))
}

/// 要素のテキスト（空白は1つに詰める）
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn host_key(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
}

/// 会社名ノードから `levels` 階層上の要素（足りなければ最上位）
fn card_of(node: ElementRef<'_>, levels: usize) -> ElementRef<'_> {
    node.ancestors()
        .filter_map(ElementRef::wrap)
        .take(levels)
        .last()
        .unwrap_or(node)
}

/// カード内の外部リンク。キーワード一致を優先し、なければ最初の外部リンク
fn pick_website(card: ElementRef<'_>, anchor: &Selector, layout: &CardLayout) -> Option<String> {
    let own_host = layout.base_url.as_ref().and_then(host_key);
    let mut first_external = None;

    for a in card.select(anchor) {
        let Some(href) = a.value().attr("href").map(str::trim) else {
            continue;
        };
        let resolved = match &layout.base_url {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        };
        let Some(url) = resolved else { continue };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if host_key(&url).is_none() || host_key(&url) == own_host {
            continue;
        }

        let label = element_text(&a).to_lowercase();
        let href_lower = href.to_lowercase();
        if layout
            .external_link_keywords
            .iter()
            .any(|k| label.contains(k.as_str()) || href_lower.contains(k.as_str()))
        {
            return Some(url.to_string());
        }
        if first_external.is_none() {
            first_external = Some(url.to_string());
        }
    }
    first_external
}

/// 1ページ分の HTML からエントリを抽出
///
/// セレクタは優先順に試し、最初に1件以上一致したものを使う。
/// 会社名が短すぎるエントリは `MalformedEntry` として結果に含める。
pub fn extract_listings(
    html: &str,
    layout: &CardLayout,
) -> Result<Vec<Result<Listing, FetchError>>, FetchError> {
    let document = Html::parse_document(html);
    let anchor = parse_selector("a[href]")?;
    let industry = layout
        .industry_selector
        .as_deref()
        .map(parse_selector)
        .transpose()?;

    let mut nodes = Vec::new();
    let mut used: &str = "";
    for css in &layout.name_selectors {
        let selector = parse_selector(css)?;
        nodes = document.select(&selector).collect::<Vec<_>>();
        if !nodes.is_empty() {
            used = css.as_str();
            break;
        }
    }
    debug!("name nodes found: {} using selector '{}'", nodes.len(), used);

    let mut entries = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Some(href) = node.value().attr("href") {
            if layout
                .excluded_href_fragments
                .iter()
                .any(|f| href.contains(f.as_str()))
            {
                continue;
            }
        }

        let name = element_text(&node);
        if IGNORE_LABELS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        if name.chars().count() < 2 {
            entries.push(Err(FetchError::MalformedEntry(format!(
                "会社名が不正: '{}'",
                name
            ))));
            continue;
        }

        let card = card_of(node, layout.container_ancestors);
        let industry_text = industry
            .as_ref()
            .and_then(|sel| card.select(sel).next())
            .map(|el| element_text(&el))
            .unwrap_or_default();

        let mut listing = Listing::new(name).with_industry_text(industry_text);
        if let Some(url) = pick_website(card, &anchor, layout) {
            listing = listing.with_website(url);
        }
        entries.push(Ok(listing));
    }
    Ok(entries)
}

fn page_param(href: &str) -> Option<u32> {
    let base = Url::parse("https://localhost/").ok()?;
    let url = base.join(href).ok()?;
    let value = url
        .query_pairs()
        .find(|(k, _)| k == PAGE_PARAM)
        .map(|(_, v)| v.into_owned())?;
    value.trim().parse().ok()
}

/// 最終ページ番号を推定
///
/// 1. "Page X of Y" 表示
/// 2. `a.last` の `sf_paged`
/// 3. 数字のページリンクの最大値
pub fn detect_last_page(html: &str) -> Result<u32, FetchError> {
    let document = Html::parse_document(html);

    let pages = parse_selector(".wp-pagenavi .pages")?;
    if let Some(el) = document.select(&pages).next() {
        let text = element_text(&el).to_lowercase();
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.first() == Some(&"page") {
            if let Some(total) = words
                .windows(2)
                .find(|w| w[0] == "of")
                .and_then(|w| w[1].parse::<u32>().ok())
            {
                return Ok(total.max(1));
            }
        }
    }

    let last = parse_selector(".wp-pagenavi a.last, .pagination a.last")?;
    if let Some(n) = document
        .select(&last)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(page_param)
    {
        return Ok(n.max(1));
    }

    let numbered = parse_selector(".wp-pagenavi a.page, .wp-pagenavi a.larger")?;
    let max = document
        .select(&numbered)
        .filter_map(|a| element_text(&a).parse::<u32>().ok())
        .max()
        .unwrap_or(1);
    Ok(max.max(1))
}

/// N ページ目の URL（1ページ目はそのまま）
pub fn page_url(base: &str, page: u32) -> Result<String, FetchError> {
    if page <= 1 {
        return Ok(base.to_string());
    }
    let mut url =
        Url::parse(base).map_err(|e| FetchError::Navigation(format!("{}: {}", base, e)))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != PAGE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(PAGE_PARAM, &page.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: CardDefaults = CardDefaults {
        name_selectors: &["h3.member-name", "h3"],
        container_ancestors: 1,
        excluded_href_fragments: &[],
    };

    const CARDS: &str = r#"
        <html><body>
          <div class="card">
            <h3 class="member-name">Acme Robotics</h3>
            <span class="industry"> industrial   automation </span>
            <a href="/members/acme">View Profile</a>
            <a href="https://twitter.com/acme">Twitter</a>
            <a href="https://acme.example/">Visit Website</a>
          </div>
          <div class="card">
            <h3 class="member-name">Blue Sky LLC</h3>
            <a href="https://blue.example">blue.example</a>
          </div>
          <div class="card">
            <h3 class="member-name">X</h3>
          </div>
          <div class="card">
            <h3 class="member-name">More Info</h3>
          </div>
        </body></html>
    "#;

    fn settings() -> CatalogSettings {
        let mut settings = CatalogSettings::new("https://directory.example/members")
            .with_industry_selector("span.industry");
        settings.external_link_keywords = vec!["Website".into()];
        settings
    }

    #[test]
    fn test_layout_merges_configured_selector_first() {
        let layout = CardLayout::from_settings(
            &CatalogSettings::new("https://d.example").with_name_selector("h3"),
            &DEFAULTS,
        );
        assert_eq!(layout.name_selectors, vec!["h3", "h3.member-name"]);
        assert_eq!(layout.container_ancestors, 1);
    }

    #[test]
    fn test_extract_cards() {
        let layout = CardLayout::from_settings(&settings(), &DEFAULTS);
        let entries = extract_listings(CARDS, &layout).unwrap();
        assert_eq!(entries.len(), 3);

        let acme = entries[0].as_ref().unwrap();
        assert_eq!(acme.name, "Acme Robotics");
        assert_eq!(acme.industry_text, "industrial automation");
        assert_eq!(acme.website.as_deref(), Some("https://acme.example/"));

        let blue = entries[1].as_ref().unwrap();
        assert_eq!(blue.industry_text, "");
        assert_eq!(blue.website.as_deref(), Some("https://blue.example/"));

        assert!(matches!(entries[2], Err(FetchError::MalformedEntry(_))));
    }

    #[test]
    fn test_falls_back_to_alternate_selector() {
        let html = r#"<div><h3>Only Plain Heading Co</h3></div>"#;
        let layout = CardLayout::from_settings(&settings(), &DEFAULTS);
        let entries = extract_listings(html, &layout).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_ref().unwrap().name, "Only Plain Heading Co");
    }

    #[test]
    fn test_own_host_links_are_not_websites() {
        let html = r#"
            <div><h3>Inside Only Inc</h3><a href="https://www.directory.example/x">site</a></div>
        "#;
        let layout = CardLayout::from_settings(&settings(), &DEFAULTS);
        let entries = extract_listings(html, &layout).unwrap();
        assert_eq!(entries[0].as_ref().unwrap().website, None);
    }

    #[test]
    fn test_invalid_selector() {
        let layout = CardLayout::from_settings(
            &CatalogSettings::new("https://d.example").with_name_selector("[[["),
            &DEFAULTS,
        );
        assert!(matches!(extract_listings(CARDS, &layout), Err(FetchError::Selector(_))));
    }

    #[test]
    fn test_detect_last_page_from_text() {
        let html = r#"<div class="wp-pagenavi"><span class="pages">Page 1 of 39</span>
            <a class="last" href="?sf_paged=12">Last</a></div>"#;
        assert_eq!(detect_last_page(html).unwrap(), 39);
    }

    #[test]
    fn test_detect_last_page_from_last_link() {
        let html = r#"<div class="wp-pagenavi">
            <a class="last" href="https://d.example/dir/?sf_paged=12">Last &raquo;</a></div>"#;
        assert_eq!(detect_last_page(html).unwrap(), 12);
    }

    #[test]
    fn test_detect_last_page_from_numbers() {
        let html = r#"<div class="wp-pagenavi">
            <a class="page" href="?sf_paged=2">2</a>
            <a class="larger" href="?sf_paged=3">3</a>
            <a class="page" href="?sf_paged=4">next</a></div>"#;
        assert_eq!(detect_last_page(html).unwrap(), 3);
        assert_eq!(detect_last_page("<p>no pager</p>").unwrap(), 1);
    }

    #[test]
    fn test_page_url() {
        let base = "https://aaccil.example/business-directory/";
        assert_eq!(page_url(base, 1).unwrap(), base);
        assert_eq!(
            page_url(base, 3).unwrap(),
            "https://aaccil.example/business-directory/?sf_paged=3"
        );
        assert_eq!(
            page_url("https://aaccil.example/dir/?cat=food&sf_paged=2", 5).unwrap(),
            "https://aaccil.example/dir/?cat=food&sf_paged=5"
        );
    }
}
