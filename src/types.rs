//! パイプラインを流れるデータ型

use serde::{Deserialize, Serialize};

/// カタログから抽出したまま、Webサイト確定前のエントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub name: String,
    pub industry_text: String,
    pub website: Option<String>,
}

impl Listing {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            industry_text: String::new(),
            website: None,
        }
    }

    pub fn with_industry_text(mut self, text: impl Into<String>) -> Self {
        self.industry_text = text.into();
        self
    }

    pub fn with_website(mut self, url: impl Into<String>) -> Self {
        self.website = Some(url.into());
        self
    }
}

/// 分類前の候補企業
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub name: String,
    /// 自由記述の業種テキスト（空の場合あり）
    #[serde(default)]
    pub industry_text: String,
    pub website: String,
}

impl RawCandidate {
    pub fn new(
        name: impl Into<String>,
        industry_text: impl Into<String>,
        website: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            industry_text: industry_text.into(),
            website: website.into(),
        }
    }
}

/// LLM の判定結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub include: bool,
    pub industry_short: String,
}

/// シートに追記する1行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    pub company_name: String,
    pub industry: String,
    pub website: String,
}

impl OutputRow {
    /// 採用された候補からのみ行を作る。業種は必ず `industry_short` を使う
    pub fn from_accepted(candidate: RawCandidate, result: ClassificationResult) -> Option<Self> {
        if !result.include {
            return None;
        }
        Some(Self {
            company_name: candidate.name,
            industry: result.industry_short,
            website: candidate.website,
        })
    }

    /// 列順: Company Name | Industry (few words) | Website (direct link)
    pub fn cells(&self) -> Vec<String> {
        vec![
            self.company_name.clone(),
            self.industry.clone(),
            self.website.clone(),
        ]
    }
}

/// 1回の実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub catalog: String,
    /// アダプタから取り出した件数（取得エラーを含む）
    pub processed: usize,
    pub accepted: usize,
    pub excluded: usize,
    pub errors: usize,
    pub rows_written: usize,
}

impl RunSummary {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            ..Default::default()
        }
    }
}
