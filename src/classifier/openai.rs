//! OpenAI chat completions クライアント（structured output のみ）

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClassificationError, PipelineError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// チャットメッセージ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

/// JSON スキーマ指定付きのリクエスト
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

impl StructuredRequest {
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
        schema_name: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: schema_name.into(),
                    strict: true,
                    schema,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// 補完 API の境界（テストでは差し替える）
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 1回の呼び出しで応答本文を返す
    async fn complete(&self, request: &StructuredRequest) -> Result<String, ClassificationError>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTPクライアント生成失敗: {}", e)))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// HTTP ステータスを分類エラーへ
pub fn status_error(status: u16, body: String) -> ClassificationError {
    match status {
        401 | 403 => ClassificationError::Auth(format!("status {}", status)),
        429 => ClassificationError::RateLimited(body),
        _ => ClassificationError::Api {
            status,
            message: body,
        },
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &StructuredRequest) -> Result<String, ClassificationError> {
        let start = std::time::Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassificationError::Timeout(self.timeout.as_secs())
                } else {
                    ClassificationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "OpenAI API error");
            return Err(status_error(status.as_u16(), body));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| ClassificationError::Malformed(format!("応答の解析失敗: {}", e)))?;

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "OpenAI chat completion"
        );

        raw.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassificationError::Malformed("応答が空です".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = StructuredRequest::new("gpt-4o-mini", "sys", "usr", "Decision", json!({"type": "object"}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["temperature"], json!(0.0));
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "usr");
        assert_eq!(value["response_format"]["type"], "json_schema");
        assert_eq!(value["response_format"]["json_schema"]["strict"], json!(true));
        assert_eq!(value["response_format"]["json_schema"]["name"], "Decision");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(401, String::new()), ClassificationError::Auth(_)));
        assert!(matches!(status_error(403, String::new()), ClassificationError::Auth(_)));
        assert!(matches!(status_error(429, String::new()), ClassificationError::RateLimited(_)));
        assert!(matches!(
            status_error(502, "bad gateway".into()),
            ClassificationError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn test_response_parsing() {
        let raw: ChatResponseRaw = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"include\":true}"}}]}"#,
        )
        .unwrap();
        assert_eq!(raw.choices[0].message.content.as_deref(), Some(r#"{"include":true}"#));
    }
}
