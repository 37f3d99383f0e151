//! 候補企業の採用判定（LLM）
//!
//! LLM の応答は外部プロトコルとして扱い、`{include, industry_short}` の
//! 厳密な形だけを受け付ける。

pub mod openai;
pub mod prompt;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::{backoff_ms, AppConfig};
use crate::error::{ClassificationError, PipelineError};
use crate::traits::Classifier;
use crate::types::{ClassificationResult, RawCandidate};

pub use openai::{CompletionClient, OpenAiClient, StructuredRequest};

const INITIAL_BACKOFF_MS: u64 = 1000;

/// GPT 無効時の業種
pub const PASS_THROUGH_INDUSTRY: &str = "TBD";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Decision {
    include: bool,
    industry_short: String,
}

/// 応答本文から JSON 部分を取り出す（```json フェンスにも対応）
pub fn extract_json(content: &str) -> &str {
    for marker in ["```json", "```"] {
        if let Some(pos) = content.find(marker) {
            let start = pos + marker.len();
            if let Some(end) = content[start..].find("```") {
                return content[start..start + end].trim();
            }
        }
    }
    content.trim()
}

/// 応答本文を検証して判定結果にする
pub fn parse_decision(content: &str) -> Result<ClassificationResult, ClassificationError> {
    let json = extract_json(content);
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ClassificationError::Malformed(format!("{}: {}", e, preview(content))))?;
    if !value.is_object() {
        return Err(ClassificationError::InvalidShape(format!(
            "オブジェクトではありません: {}",
            preview(content)
        )));
    }

    let decision: Decision = serde_json::from_value(value)
        .map_err(|e| ClassificationError::InvalidShape(e.to_string()))?;
    let industry_short = decision.industry_short.trim();
    if industry_short.is_empty() {
        return Err(ClassificationError::InvalidShape("industry_short が空です".into()));
    }

    Ok(ClassificationResult {
        include: decision.include,
        industry_short: industry_short.to_string(),
    })
}

fn preview(content: &str) -> String {
    content.chars().take(80).collect()
}

/// OpenAI による判定
pub struct GptClassifier<C> {
    client: C,
    model: String,
    system_prompt: String,
    thesis: serde_json::Value,
    retry_count: u32,
    timeout: Duration,
    backoff_base_ms: u64,
}

impl GptClassifier<OpenAiClient> {
    /// 設定から OpenAI クライアント付きで生成
    pub fn from_config(config: &AppConfig, api_key: &str) -> Result<Self, PipelineError> {
        let client = OpenAiClient::new(api_key, config.timeout())?;
        Ok(Self::new(client, config))
    }
}

impl<C: CompletionClient> GptClassifier<C> {
    pub fn new(client: C, config: &AppConfig) -> Self {
        Self {
            client,
            model: config.llm_model.clone(),
            system_prompt: prompt::system_prompt(config.inclusion_mode),
            thesis: config.search_thesis.clone(),
            retry_count: config.retry_count,
            timeout: config.timeout(),
            backoff_base_ms: INITIAL_BACKOFF_MS,
        }
    }

    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    /// 1回の呼び出しの上限時間（既定は `timeout_seconds`）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 候補1件分のリクエスト（同じ候補・設定なら常に同一）
    pub fn request_for(&self, candidate: &RawCandidate) -> StructuredRequest {
        StructuredRequest::new(
            self.model.clone(),
            self.system_prompt.clone(),
            prompt::user_prompt(&self.thesis, candidate),
            prompt::SCHEMA_NAME,
            prompt::decision_schema(),
        )
    }

    async fn attempt(&self, request: &StructuredRequest) -> Result<ClassificationResult, ClassificationError> {
        let content = timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout.as_secs()))??;
        debug!("LLM response: {} bytes", content.len());
        parse_decision(&content)
    }
}

#[async_trait]
impl<C: CompletionClient> Classifier for GptClassifier<C> {
    async fn classify(&self, candidate: &RawCandidate) -> Result<ClassificationResult, ClassificationError> {
        let request = self.request_for(candidate);
        let mut attempt = 0;
        loop {
            match self.attempt(&request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.retry_count => {
                    let backoff = backoff_ms(self.backoff_base_ms, attempt);
                    warn!(
                        "Classification attempt {} for {} failed, retrying in {}ms: {}",
                        attempt + 1,
                        candidate.name,
                        backoff,
                        e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// GPT 無効時: 全件採用、業種は `TBD`
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughClassifier;

#[async_trait]
impl Classifier for PassThroughClassifier {
    async fn classify(&self, _candidate: &RawCandidate) -> Result<ClassificationResult, ClassificationError> {
        Ok(ClassificationResult {
            include: true,
            industry_short: PASS_THROUGH_INDUSTRY.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 応答を順番に返すクライアント
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, ClassificationError>>>,
        requests: Mutex<Vec<StructuredRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, ClassificationError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: &StructuredRequest) -> Result<String, ClassificationError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClassificationError::Network("no more replies".into())))
        }
    }

    fn classifier(replies: Vec<Result<String, ClassificationError>>) -> GptClassifier<ScriptedClient> {
        GptClassifier::new(ScriptedClient::new(replies), &AppConfig::default()).with_backoff_base_ms(0)
    }

    fn acme() -> RawCandidate {
        RawCandidate::new("Acme Robotics", "industrial automation", "https://acme.example")
    }

    #[test]
    fn test_parse_plain_and_fenced() {
        let plain = parse_decision(r#"{"include": true, "industry_short": "robotics"}"#).unwrap();
        assert_eq!(plain, ClassificationResult { include: true, industry_short: "robotics".into() });

        let fenced = parse_decision("Sure:\n```json\n{\"include\": false, \"industry_short\": \" Events \"}\n```").unwrap();
        assert!(!fenced.include);
        assert_eq!(fenced.industry_short, "Events");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(matches!(parse_decision("not json"), Err(ClassificationError::Malformed(_))));
        assert!(matches!(parse_decision("[1, 2]"), Err(ClassificationError::InvalidShape(_))));
        assert!(matches!(
            parse_decision(r#"{"include": "yes", "industry_short": "x"}"#),
            Err(ClassificationError::InvalidShape(_))
        ));
        assert!(matches!(
            parse_decision(r#"{"include": true}"#),
            Err(ClassificationError::InvalidShape(_))
        ));
        assert!(matches!(
            parse_decision(r#"{"include": true, "industry_short": "x", "score": 9}"#),
            Err(ClassificationError::InvalidShape(_))
        ));
        assert!(matches!(
            parse_decision(r#"{"include": true, "industry_short": "   "}"#),
            Err(ClassificationError::InvalidShape(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_acme_robotics() {
        let c = classifier(vec![Ok(r#"{"include": true, "industry_short": "robotics"}"#.into())]);
        let result = c.classify(&acme()).await.unwrap();
        assert_eq!(result, ClassificationResult { include: true, industry_short: "robotics".into() });
        assert_eq!(c.client.calls(), 1);

        let requests = c.client.requests.lock().unwrap();
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert!(requests[0].messages[1].content.contains("Acme Robotics"));
    }

    #[tokio::test]
    async fn test_malformed_output_retried_then_fails() {
        let c = classifier(vec![
            Ok("I think yes".into()),
            Ok("still not json".into()),
            Ok("nope".into()),
        ]);
        let err = c.classify(&acme()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Malformed(_)));
        // 初回 + retry_count(2)
        assert_eq!(c.client.calls(), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_error() {
        let c = classifier(vec![
            Err(ClassificationError::RateLimited("slow down".into())),
            Ok(r#"{"include": false, "industry_short": "Trade association"}"#.into()),
        ]);
        let result = c.classify(&acme()).await.unwrap();
        assert!(!result.include);
        assert_eq!(c.client.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let c = classifier(vec![Err(ClassificationError::Auth("status 401".into()))]);
        assert!(matches!(c.classify(&acme()).await, Err(ClassificationError::Auth(_))));
        assert_eq!(c.client.calls(), 1);
    }

    /// 応答を返さないクライアント
    #[derive(Default)]
    struct StalledClient {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for StalledClient {
        async fn complete(&self, _request: &StructuredRequest) -> Result<String, ClassificationError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_call_times_out_after_retries() {
        let c = GptClassifier::new(StalledClient::default(), &AppConfig::default())
            .with_backoff_base_ms(0)
            .with_timeout(Duration::from_millis(20));
        let err = c.classify(&acme()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Timeout(_)));
        // 初回 + retry_count(2)
        assert_eq!(c.client.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_same_input_same_request() {
        let c = classifier(Vec::new());
        assert_eq!(c.request_for(&acme()), c.request_for(&acme()));
    }

    #[tokio::test]
    async fn test_pass_through() {
        let result = PassThroughClassifier.classify(&acme()).await.unwrap();
        assert!(result.include);
        assert_eq!(result.industry_short, "TBD");
    }
}
