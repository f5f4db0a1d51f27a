//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! 인덱스 빌드 시 모든 청크 텍스트를 **한 번의 배치 요청**으로 보냅니다.
//! 응답 벡터 `i` 는 입력 텍스트 `i` 에 대응해야 하므로, 응답의 `index`
//! 필드로 정렬한 뒤 개수를 검증합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_config(&config)?;
//! let vectors = embedder.embed_batch(&texts).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{RagError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩 (출력 순서 = 입력 순서)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 단일 텍스트 임베딩 (기본 구현: 크기 1 배치)
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Upstream(format!("{} returned no embedding", self.name())))
    }

    /// 호출 가능한 상태인지 확인 (자격 증명 등)
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// 429 / 전송 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;
/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI 호환 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEmbedding {
    /// 새 인스턴스 생성
    ///
    /// `api_key` 가 없어도 생성은 되며, 호출 시 [`RagError::MissingApiKey`] 를 반환합니다.
    pub fn new(api_key: Option<String>, base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.api_key.clone(), &config.base_url, &config.embed_model)
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

/// 임베딩 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// 임베딩 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// 에러 응답 본문을 사람이 읽을 메시지로 변환
pub(crate) fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => match err.error.kind {
            Some(kind) => format!("API error {} ({}): {}", status, kind, err.error.message),
            None => format!("API error {}: {}", status, err.error.message),
        },
        Err(_) => format!("API error {}: {}", status, body.trim()),
    }
}

/// 응답을 입력 순서대로 정렬된 벡터 목록으로 변환
fn parse_embed_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| RagError::Upstream(format!("Failed to parse embedding response: {}", e)))?;

    response.data.sort_by_key(|d| d.index);

    let indices_ok = response
        .data
        .iter()
        .enumerate()
        .all(|(i, d)| d.index == i);

    if response.data.len() != expected || !indices_ok {
        return Err(RagError::Upstream(format!(
            "Embedding response has {} vectors for {} inputs",
            response.data.len(),
            expected
        )));
    }

    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key.as_deref().ok_or(RagError::MissingApiKey)?;

        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let url = self.endpoint();

        let mut last_error: Option<RagError> = None;

        // 재시도 루프 (429 / 전송 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(RagError::Upstream(format!(
                        "Failed to send embedding request: {}",
                        e
                    )));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                RagError::Upstream(format!("Failed to read embedding response: {}", e))
            })?;

            if status.is_success() {
                let vectors = parse_embed_response(&body, texts.len())?;
                tracing::debug!(
                    "Embedded {} texts with {} (dimension: {})",
                    vectors.len(),
                    self.model,
                    vectors.first().map(Vec::len).unwrap_or(0)
                );
                return Ok(vectors);
            }

            // 429 Rate Limit - 재시도
            if status.as_u16() == 429 {
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(RagError::Upstream(api_error_message(status, &body)));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                return Err(RagError::Upstream(api_error_message(status, &body)));
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RagError::Upstream(format!("Embedding failed after {} retries", MAX_RETRIES))
        }))
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

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// 단어 해시 기반 결정적 임베딩 (bag-of-words)
    pub struct FakeEmbedding {
        dimension: usize,
        fail: bool,
        drop_last: bool,
        calls: Arc<AtomicUsize>,
    }

    impl FakeEmbedding {
        pub fn new() -> Self {
            Self {
                dimension: 256,
                fail: false,
                drop_last: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        /// 입력보다 벡터를 하나 적게 반환
        pub fn dropping_last(self) -> Self {
            Self {
                drop_last: true,
                ..self
            }
        }

        pub fn batch_calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }

        pub fn vectorize(&self, text: &str) -> Vec<f32> {
            let mut vector = vec![0.0; self.dimension];
            for word in text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
            {
                let word = word.to_lowercase();
                // FNV-1a
                let hash = word
                    .bytes()
                    .fold(0xcbf29ce484222325u64, |h, b| {
                        (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
                    });
                vector[(hash % self.dimension as u64) as usize] += 1.0;
            }
            vector
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedding {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RagError::Upstream("API error 500: quota exceeded".into()));
            }
            let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vectorize(t)).collect();
            if self.drop_last {
                vectors.pop();
            }
            Ok(vectors)
        }

        fn name(&self) -> &str {
            "fake-embedding"
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
