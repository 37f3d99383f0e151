//! Webサイトの確定処理
//!
//! 抽出した `Listing` の URL を正規化し、必要なら検索で補完し、
//! 除外ドメインとリンク切れを弾いて `RawCandidate` にする。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CatalogSettings, LinkPolicy};
use crate::error::{FetchError, PipelineError};
use crate::search::SearchResolver;
use crate::types::{Listing, RawCandidate};

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HEAD を受け付けないサーバが返しがちなステータス（GET で再確認する）
const HEAD_FALLBACK_STATUSES: &[u16] = &[400, 401, 403, 405, 500];

const REJECTED_SCHEMES: &[&str] = &["mailto:", "tel:", "javascript:", "data:", "about:"];

/// URL を正規化。Webサイトとして使えないものは `None`
pub fn normalize_url(raw: &str, allow_http: bool) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if REJECTED_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
        return None;
    }

    let with_scheme = if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else if !trimmed.contains("://") {
        format!("https://{}", trimmed)
    } else {
        trimmed.to_string()
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => url.set_scheme("https").ok()?,
        _ => return None,
    }
    let host = url.host_str()?;
    if !host.contains('.') {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// ホスト名に除外ドメインが含まれるか
pub fn is_blacklisted(url: &str, domains: &[String]) -> bool {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
        Some(h) => h,
        None => return false,
    };
    domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| !d.is_empty() && host.contains(&d))
}

/// リンクの生存確認
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// 到達できればリダイレクト後の URL を返す
    async fn probe(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest による生存確認（HEAD、必要に応じて GET）
pub struct LinkChecker {
    http: reqwest::Client,
}

impl LinkChecker {
    pub fn new(timeout: Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTPクライアント生成失敗: {}", e)))?;
        Ok(Self { http })
    }
}

fn dead(url: &str, status: Option<StatusCode>) -> FetchError {
    FetchError::DeadLink {
        url: url.to_string(),
        status: status.map(|s| s.as_u16()),
    }
}

#[async_trait]
impl LinkProbe for LinkChecker {
    async fn probe(&self, url: &str) -> Result<String, FetchError> {
        let head = self.http.head(url).send().await;
        let response = match head {
            Ok(resp) if !HEAD_FALLBACK_STATUSES.contains(&resp.status().as_u16()) => resp,
            Ok(resp) => {
                debug!("HEAD {} returned {}, retrying with GET", url, resp.status());
                self.http.get(url).send().await.map_err(|e| {
                    debug!("GET {} failed: {}", url, e);
                    dead(url, e.status())
                })?
            }
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                return Err(dead(url, e.status()));
            }
        };

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(response.url().to_string())
        } else {
            Err(dead(url, Some(status)))
        }
    }
}

/// `Listing` → `RawCandidate` の仕上げ
pub struct WebsiteFinisher {
    policy: LinkPolicy,
    resolver: Option<SearchResolver>,
    probe: Option<Box<dyn LinkProbe>>,
}

impl WebsiteFinisher {
    pub fn new(policy: LinkPolicy) -> Self {
        Self {
            policy,
            resolver: None,
            probe: None,
        }
    }

    pub fn with_resolver(mut self, resolver: SearchResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn LinkProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// URL 正規化 → 検索補完 → 除外ドメイン判定 → 生存確認
    pub async fn finish(
        &self,
        listing: Listing,
        settings: &CatalogSettings,
    ) -> Result<RawCandidate, FetchError> {
        let name = listing.name.trim().to_string();
        if name.is_empty() {
            return Err(FetchError::MalformedEntry("会社名が空です".into()));
        }

        let mut website = listing
            .website
            .as_deref()
            .and_then(|raw| normalize_url(raw, self.policy.allow_http));

        if website.is_none() {
            if let Some(resolver) = &self.resolver {
                website = resolver
                    .resolve(&name)
                    .await?
                    .and_then(|raw| normalize_url(&raw, self.policy.allow_http));
            }
        }

        let mut website = website.ok_or_else(|| FetchError::MissingWebsite(name.clone()))?;

        if is_blacklisted(&website, &settings.blacklist_domains) {
            return Err(FetchError::Blacklisted(website));
        }

        if self.policy.check_live {
            if let Some(probe) = &self.probe {
                match probe.probe(&website).await {
                    Ok(final_url) => {
                        website = normalize_url(&final_url, self.policy.allow_http)
                            .unwrap_or(website);
                    }
                    Err(e) if self.policy.drop_dead_links => return Err(e),
                    Err(e) => warn!("Keeping unreachable website for {}: {}", name, e),
                }
            }
        }

        Ok(RawCandidate::new(name, listing.industry_text.trim(), website))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeProbe(HashMap<String, Result<String, u16>>);

    #[async_trait]
    impl LinkProbe for FakeProbe {
        async fn probe(&self, url: &str) -> Result<String, FetchError> {
            match self.0.get(url) {
                Some(Ok(final_url)) => Ok(final_url.clone()),
                Some(Err(status)) => Err(FetchError::DeadLink {
                    url: url.into(),
                    status: Some(*status),
                }),
                None => Ok(url.to_string()),
            }
        }
    }

    fn settings() -> CatalogSettings {
        CatalogSettings::new("https://directory.example").with_blacklist(vec!["eventbrite.com".into()])
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("acme.example", false).as_deref(), Some("https://acme.example/"));
        assert_eq!(
            normalize_url(" http://acme.example/about#team ", false).as_deref(),
            Some("https://acme.example/about")
        );
        assert_eq!(
            normalize_url("http://acme.example/", true).as_deref(),
            Some("http://acme.example/")
        );
        assert_eq!(normalize_url("//cdn.acme.example/x", false).as_deref(), Some("https://cdn.acme.example/x"));
        assert_eq!(normalize_url("mailto:info@acme.example", false), None);
        assert_eq!(normalize_url("tel:+15555550100", false), None);
        assert_eq!(normalize_url("javascript:void(0)", false), None);
        assert_eq!(normalize_url("ftp://acme.example", false), None);
        assert_eq!(normalize_url("localhost", false), None);
        assert_eq!(normalize_url("   ", false), None);
    }

    #[test]
    fn test_is_blacklisted() {
        let domains = vec!["eventbrite.com".to_string(), " LinkedIn.com ".to_string()];
        assert!(is_blacklisted("https://www.eventbrite.com/e/123", &domains));
        assert!(is_blacklisted("https://linkedin.com/company/acme", &domains));
        assert!(!is_blacklisted("https://acme.example/eventbrite.com", &domains));
        assert!(!is_blacklisted("https://acme.example", &[]));
    }

    #[tokio::test]
    async fn test_finish_normalizes_and_follows_redirect() {
        let probe = FakeProbe(HashMap::from([(
            "https://acme.example/".to_string(),
            Ok("https://www.acme.example/home".to_string()),
        )]));
        let finisher = WebsiteFinisher::new(LinkPolicy::default()).with_probe(Box::new(probe));

        let listing = Listing::new(" Acme Robotics ")
            .with_industry_text(" industrial automation ")
            .with_website("http://acme.example");
        let candidate = finisher.finish(listing, &settings()).await.unwrap();

        assert_eq!(
            candidate,
            RawCandidate::new(
                "Acme Robotics",
                "industrial automation",
                "https://www.acme.example/home"
            )
        );
    }

    #[tokio::test]
    async fn test_finish_rejects_missing_and_blacklisted() {
        let finisher = WebsiteFinisher::new(LinkPolicy::default());

        let err = finisher.finish(Listing::new("No Site LLC"), &settings()).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingWebsite(name) if name == "No Site LLC"));

        let listing = Listing::new("Expo").with_website("https://www.eventbrite.com/e/1");
        let err = finisher.finish(listing, &settings()).await.unwrap_err();
        assert!(matches!(err, FetchError::Blacklisted(_)));

        let err = finisher.finish(Listing::new("  "), &settings()).await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedEntry(_)));
    }

    #[tokio::test]
    async fn test_dead_link_policy() {
        let probe = || {
            Box::new(FakeProbe(HashMap::from([(
                "https://gone.example/".to_string(),
                Err(404),
            )])))
        };
        let listing = || Listing::new("Gone Inc").with_website("gone.example");

        let dropping = WebsiteFinisher::new(LinkPolicy::default()).with_probe(probe());
        let err = dropping.finish(listing(), &settings()).await.unwrap_err();
        assert!(matches!(err, FetchError::DeadLink { status: Some(404), .. }));

        let keeping = WebsiteFinisher::new(LinkPolicy {
            drop_dead_links: false,
            ..LinkPolicy::default()
        })
        .with_probe(probe());
        let candidate = keeping.finish(listing(), &settings()).await.unwrap();
        assert_eq!(candidate.website, "https://gone.example/");
    }

    #[tokio::test]
    async fn test_check_live_disabled_skips_probe() {
        let probe = FakeProbe(HashMap::from([("https://gone.example/".to_string(), Err(404))]));
        let finisher = WebsiteFinisher::new(LinkPolicy {
            check_live: false,
            ..LinkPolicy::default()
        })
        .with_probe(Box::new(probe));
        let listing = Listing::new("Gone Inc").with_website("gone.example");
        assert!(finisher.finish(listing, &settings()).await.is_ok());
    }
}
