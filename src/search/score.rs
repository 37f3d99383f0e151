//! 検索結果のスコアリング
//!
//! 会社名と検索結果（ホスト名・タイトル・スニペット）の類似度から
//! 公式サイトらしさを点数化する。

use url::Url;

/// 公式サイトではない（優先度を下げる）ホスト
const SOCIAL_HOSTS: &[&str] = &[
    "linkedin.com",
    "facebook.com",
    "instagram.com",
    "x.com",
    "twitter.com",
    "youtube.com",
    "crunchbase.com",
    "bloomberg.com",
    "zoominfo.com",
    "manta.com",
    "yelp.com",
    "glassdoor.com",
    "indeed.com",
    "angel.co",
    "wikipedia.org",
    "google.com",
    "goo.gl",
];

const BLACKLIST_SUBSTR: &[&str] = &["eventbrite", "hubspot", "forms.gle", "zoom.us"];

const LEGAL_SUFFIXES: &[&str] = &[
    "incorporated",
    "inc",
    "co",
    "corp",
    "corporation",
    "llc",
    "l.l.c",
    "ltd",
    "limited",
    "group",
    "holdings",
    "partners",
    "technologies",
    "technology",
    "tech",
    "systems",
    "solutions",
    "services",
    "company",
];

/// 2階層の公開サフィックス（簡易判定）
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu", "ne", "or"];

/// 会社名を比較用に正規化（小文字化、記号除去、法人格などの除去）
pub fn normalize_company_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let spaced: String = lowered
        .chars()
        .map(|c| match c {
            ',' | '.' | '-' | '&' | '/' | '|' => ' ',
            _ => c,
        })
        .collect();
    spaced
        .split_whitespace()
        .filter(|token| !LEGAL_SUFFIXES.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 登録可能ドメイン（例: `www.shop.acme.co.uk` → `acme.co.uk`）
pub fn registrable_host(url: &str) -> String {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(h) => h.to_ascii_lowercase(),
        None => return String::new(),
    };
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return host;
    }
    let n = labels.len();
    let take = if n >= 3
        && labels[n - 1].len() == 2
        && SECOND_LEVEL_SUFFIXES.contains(&labels[n - 2])
    {
        3
    } else {
        2
    };
    labels[n - take..].join(".")
}

/// トークン集合比（0〜100）
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let mut ta: Vec<&str> = a.split_whitespace().collect();
    let mut tb: Vec<&str> = b.split_whitespace().collect();
    ta.sort_unstable();
    ta.dedup();
    tb.sort_unstable();
    tb.dedup();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = ta.iter().filter(|t| tb.contains(t)).copied().collect();
    let only_a: Vec<&str> = ta.iter().filter(|t| !tb.contains(t)).copied().collect();
    let only_b: Vec<&str> = tb.iter().filter(|t| !ta.contains(t)).copied().collect();

    let base = common.join(" ");
    let with_a = join_nonempty(&base, &only_a.join(" "));
    let with_b = join_nonempty(&base, &only_b.join(" "));

    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    ratio(&base, &with_a)
        .max(ratio(&base, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

/// 編集距離ベースの類似度（0〜100）
fn ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    let distance = levenshtein_distance(a, b);
    (1.0 - distance as f64 / max_len as f64) * 100.0
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// SNS・集約サイト・深いパスなどへの減点
pub fn penalty_for_url(url: &str) -> f64 {
    let lowered = url.to_lowercase();
    let host = registrable_host(url);
    if SOCIAL_HOSTS.contains(&host.as_str()) {
        return -60.0;
    }
    if BLACKLIST_SUBSTR.iter().any(|s| lowered.contains(s)) {
        return -40.0;
    }
    let depth = lowered.matches('/').count().saturating_sub(2) as f64;
    let query = lowered.contains('?') as u8 + lowered.contains('#') as u8;
    -(depth * 4.0 + query as f64 * 5.0)
}

/// 正規化済み会社名に対する検索結果1件のスコア
pub fn score_hit(company_norm: &str, title: &str, url: &str, snippet: &str) -> f64 {
    let title = title.to_lowercase();
    let snippet = snippet.to_lowercase();
    let host = registrable_host(url);
    let host_core = host.split('.').next().unwrap_or_default();

    let mut score = 0.7 * token_set_ratio(company_norm, host_core)
        + 0.3 * token_set_ratio(company_norm, &title);
    if title.contains("official") || title.contains("home") {
        score += 5.0;
    }
    score += (token_set_ratio(company_norm, &snippet) / 12.0).min(8.0);
    score + penalty_for_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_company_name() {
        assert_eq!(normalize_company_name("Acme Robotics, Inc."), "acme robotics");
        assert_eq!(normalize_company_name("A&A Tax & Accounting Group LLC"), "a a tax accounting");
        assert_eq!(normalize_company_name("  Blue-Sky  Solutions "), "blue sky");
    }

    #[test]
    fn test_registrable_host() {
        assert_eq!(registrable_host("https://www.acme.com/about"), "acme.com");
        assert_eq!(registrable_host("https://shop.acme.co.uk"), "acme.co.uk");
        assert_eq!(registrable_host("not a url"), "");
    }

    #[test]
    fn test_token_set_ratio() {
        assert_eq!(token_set_ratio("acme robotics", "robotics acme"), 100.0);
        assert_eq!(token_set_ratio("acme", "acme robotics official"), 100.0);
        assert_eq!(token_set_ratio("", "acme"), 0.0);
        let partial = token_set_ratio("acme robotics", "acme widgets");
        assert!(partial > 0.0 && partial < 100.0);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("acme", "acme"), 0);
    }

    #[test]
    fn test_social_hosts_penalized() {
        assert_eq!(penalty_for_url("https://www.linkedin.com/company/acme"), -60.0);
        assert_eq!(penalty_for_url("https://acme.eventbrite.com/"), -40.0);
        assert_eq!(penalty_for_url("https://acme.com"), 0.0);
    }

    #[test]
    fn test_official_site_outscores_directory() {
        let norm = normalize_company_name("Acme Robotics Inc");
        let official = score_hit(&norm, "Acme Robotics | Official Site", "https://acmerobotics.com", "Acme builds robots");
        let listing = score_hit(&norm, "Acme Robotics - LinkedIn", "https://www.linkedin.com/company/acme-robotics", "Acme Robotics");
        assert!(official > listing);
        assert!(official >= 35.0);
    }
}
