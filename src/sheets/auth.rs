//! サービスアカウント認証（JWT bearer フロー）
//!
//! サービスアカウント鍵で RS256 署名した JWT をトークンエンドポイントに渡し、
//! アクセストークンを得る。トークンは期限の少し前までキャッシュする。

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SheetError;

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// 署名する JWT の有効期間（秒）
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// 期限切れ直前のトークンは使わない
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// サービスアカウント JSON 鍵（必要なフィールドのみ）
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, SheetError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SheetError::Credentials(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, SheetError> {
        serde_json::from_str(content)
            .map_err(|e| SheetError::Credentials(format!("サービスアカウントJSONが不正: {}", e)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(key: &ServiceAccountKey, scope: &str, now: DateTime<Utc>) -> Self {
        Self {
            iss: key.client_email.clone(),
            scope: scope.to_string(),
            aud: key.token_uri.clone(),
            iat: now.timestamp(),
            exp: (now + ChronoDuration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        }
    }
}

/// RS256 署名済みのアサーション
pub fn signed_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, SheetError> {
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| SheetError::Credentials(format!("秘密鍵が不正: {}", e)))?;
    let claims = Claims::new(key, SPREADSHEETS_SCOPE, now);
    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| SheetError::Credentials(format!("JWT署名失敗: {}", e)))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// アクセストークンの取得とキャッシュ
pub struct TokenProvider {
    http: reqwest::Client,
    key: ServiceAccountKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, key: ServiceAccountKey) -> Self {
        Self {
            http,
            key,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String, SheetError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        let assertion = signed_assertion(&self.key, now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SheetError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Auth(format!("トークン取得失敗 ({}): {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetError::Auth(format!("トークン応答が不正: {}", e)))?;
        debug!("Obtained access token for {} ({}s)", self.key.client_email, token.expires_in);

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: now + ChronoDuration::seconds(token.expires_in),
        });
        Ok(value)
    }
}
