//! 완성(chat completion) 모듈 - 스트리밍 답변 생성
//!
//! 프롬프트를 보내고 생성된 텍스트를 토큰 조각 단위로 받습니다.

mod sse;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::config::Config;
use crate::embedding::api_error_message;
use crate::error::{RagError, Result};

pub use sse::{token_stream, SseDecoder, SseEvent};

/// 생성 텍스트 조각 스트림
pub type TokenStream = BoxStream<'static, Result<String>>;

/// 연결 타임아웃 (스트림 전체가 아닌 연결 수립까지)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 완성 요청
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 완성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 스트리밍 완성 시작
    ///
    /// 요청 자체가 실패하면 `Err`, 스트리밍 도중 실패는 스트림 항목의 `Err` 입니다.
    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream>;

    /// 호출 가능한 상태인지 확인 (자격 증명 등)
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Completion
// ============================================================================

/// OpenAI 호환 chat completions 구현체
#[derive(Debug)]
pub struct OpenAiCompletion {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

impl OpenAiCompletion {
    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.api_key.clone(), &config.base_url, &config.chat_model)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream> {
        let api_key = self.api_key.as_deref().ok_or(RagError::MissingApiKey)?;

        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Upstream(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Upstream(api_error_message(status, &text)));
        }

        tracing::debug!("Streaming completion from {}", self.model);
        Ok(token_stream(Box::pin(response.bytes_stream())))
    }

    fn ensure_ready(&self) -> Result<()> {
        self.api_key.as_ref().map(|_| ()).ok_or(RagError::MissingApiKey)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Test Doubles
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
