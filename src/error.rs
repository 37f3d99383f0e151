use thiserror::Error;

use crate::types::RunSummary;

/// ディレクトリ取得・抽出エラー（エントリ単位、致命的ではない）
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("HTTPエラー: {status} {url}")]
    Http { status: u16, url: String },

    #[error("ネットワークエラー: {0}")]
    Network(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("セレクタが不正です: {0}")]
    Selector(String),

    #[error("不正なエントリ: {0}")]
    MalformedEntry(String),

    #[error("Webサイトが見つかりません: {0}")]
    MissingWebsite(String),

    #[error("除外ドメイン: {0}")]
    Blacklisted(String),

    #[error("リンク切れ: {url} (status={status:?})")]
    DeadLink { url: String, status: Option<u16> },

    #[error("検索エラー: {0}")]
    Search(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// LLM 分類エラー（エントリ単位、除外扱い）
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("LLMネットワークエラー: {0}")]
    Network(String),

    #[error("LLMタイムアウト: {0}秒")]
    Timeout(u64),

    #[error("LLM認証エラー: {0}")]
    Auth(String),

    #[error("LLMレート制限: {0}")]
    RateLimited(String),

    #[error("LLM APIエラー ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLMレスポンスがJSONではありません: {0}")]
    Malformed(String),

    #[error("LLMレスポンスの形式が不正: {0}")]
    InvalidShape(String),
}

impl ClassificationError {
    /// 再試行で回復しうるエラーか
    pub fn is_retryable(&self) -> bool {
        match self {
            ClassificationError::Network(_)
            | ClassificationError::Timeout(_)
            | ClassificationError::RateLimited(_)
            | ClassificationError::Malformed(_)
            | ClassificationError::InvalidShape(_) => true,
            ClassificationError::Api { status, .. } => *status >= 500,
            ClassificationError::Auth(_) => false,
        }
    }
}

/// スプレッドシート書き込みエラー（致命的）
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("認証情報ファイルエラー: {0}")]
    Credentials(String),

    #[error("Sheets認証エラー: {0}")]
    Auth(String),

    #[error("シートタブが存在しません: {0}")]
    MissingTab(String),

    #[error("スプレッドシートが見つかりません: {0}")]
    NotFound(String),

    #[error("Sheetsレート制限")]
    Throttled,

    #[error("Sheetsレート制限: {attempts}回試行して失敗")]
    RateLimitExhausted { attempts: u32 },

    #[error("Sheets APIエラー ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Sheetsネットワークエラー: {0}")]
    Network(String),

    #[error("セル範囲が不正: {0}")]
    InvalidRange(String),
}

impl SheetError {
    /// 書き込みが適用されていないことが確実なエラーのみ再試行対象
    pub fn is_retryable(&self) -> bool {
        matches!(self, SheetError::Throttled)
    }
}

/// 実行全体を中断するエラー
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("未登録のカタログ '{key}'（利用可能: {}）", .available.join(", "))]
    UnknownCatalog { key: String, available: Vec<String> },

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ソース初期化エラー: {0}")]
    Source(#[source] FetchError),

    #[error("シート準備エラー: {0}")]
    Sheet(#[from] SheetError),

    #[error("シート書き込み失敗 (accepted={}): {source}", .summary.accepted)]
    SheetWrite {
        summary: RunSummary,
        #[source]
        source: SheetError,
    },

    #[error("ファイル操作エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// プロセス終了コード
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::UnknownCatalog { .. } => 2,
            _ => 1,
        }
    }
}
