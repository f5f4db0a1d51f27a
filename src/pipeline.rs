//! RAG 파이프라인 - 질문 하나를 스트리밍 답변으로
//!
//! 질문 검증 → 인덱스 로드 → 질의 임베딩 → top-k 검색 → 프롬프트 → 완성 스트림
//!
//! 인덱스가 없거나 질의 임베딩이 실패하면 컨텍스트 없는 폴백 모드로 답변합니다.
//! 자격 증명 누락은 폴백하지 않고 그대로 에러로 반환합니다.

use std::sync::Arc;

use crate::completion::{ChatMessage, ChatRequest, CompletionProvider, OpenAiCompletion, TokenStream};
use crate::config::Config;
use crate::embedding::{EmbeddingProvider, OpenAiEmbedding};
use crate::error::{RagError, Result};
use crate::knowledge::{sentence_chunker, IndexManager, IndexOrigin, RetrievalHit};
use crate::prompt::{fit_context, system_prompt, user_prompt, GENERAL_KNOWLEDGE_SOURCE};
use crate::stream::{encode_answer, EncodedStream, Framing};

// ============================================================================
// Types
// ============================================================================

/// 검색 결과와 사용한 인덱스
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub hits: Vec<RetrievalHit>,
    pub origin: IndexOrigin,
}

/// 스트리밍 답변
///
/// 토큰 스트림을 drop 하면 완성 요청(HTTP 연결)도 함께 취소됩니다.
pub struct AnswerStream {
    pub tokens: TokenStream,
    /// 트레일러에 실릴 출처 (순위 순, 중복 제거)
    pub sources: Vec<String>,
    /// 근거로 사용한 인덱스 (폴백 모드면 `None`)
    pub origin: Option<IndexOrigin>,
}

impl AnswerStream {
    pub fn is_grounded(&self) -> bool {
        self.origin.is_some()
    }

    /// 와이어 포맷으로 인코딩
    pub fn encode(self, framing: Framing) -> EncodedStream {
        encode_answer(self.tokens, self.sources, framing)
    }
}

// ============================================================================
// RagPipeline
// ============================================================================

/// 질의 파이프라인
pub struct RagPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    index: Arc<IndexManager>,
    top_k: usize,
    max_context_chars: usize,
    temperature: f32,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        index: Arc<IndexManager>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            completer,
            index,
            top_k: config.top_k,
            max_context_chars: config.max_context_chars,
            temperature: config.temperature,
        }
    }

    /// 설정으로 OpenAI 프로바이더와 인덱스 관리자를 구성
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedding::from_config(config)?);
        let completer: Arc<dyn CompletionProvider> =
            Arc::new(OpenAiCompletion::from_config(config)?);

        let index = Arc::new(IndexManager::new(
            config.snapshot_path(),
            sentence_chunker(config.chunk_size),
            Arc::clone(&embedder),
        ));

        Ok(Self::new(embedder, completer, index, config))
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    /// 관련 청크 검색
    ///
    /// 인덱스가 없거나 질의 임베딩에 실패하면 `Ok(None)` (폴백 모드).
    pub async fn retrieve(&self, question: &str) -> Result<Option<Retrieval>> {
        let loaded = match self.index.load().await {
            Ok(loaded) => loaded,
            Err(RagError::IndexUnavailable) => {
                tracing::warn!("No index available, answering without context");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!("Failed to load index, answering without context: {}", e);
                return Ok(None);
            }
        };

        let query_embedding = match self.embedder.embed(question).await {
            Ok(embedding) => embedding,
            Err(RagError::MissingApiKey) => return Err(RagError::MissingApiKey),
            Err(e) => {
                tracing::warn!("Query embedding failed, answering without context: {}", e);
                return Ok(None);
            }
        };

        let hits = loaded.index.top_k(&query_embedding, self.top_k);
        if hits.is_empty() {
            return Ok(None);
        }

        for hit in &hits {
            tracing::debug!("Retrieved {} [{}] score={:.4}", hit.id, hit.source, hit.score);
        }

        Ok(Some(Retrieval {
            hits,
            origin: loaded.origin,
        }))
    }

    /// 질문에 대한 스트리밍 답변 시작
    pub async fn ask(&self, question: &str) -> Result<AnswerStream> {
        let question = validate_question(question)?;

        self.embedder.ensure_ready()?;
        self.completer.ensure_ready()?;

        let retrieval = self.retrieve(question).await?;

        let (prompt, sources, origin) = match retrieval {
            Some(retrieval) => {
                let snippets = fit_context(&retrieval.hits, self.max_context_chars);
                let sources = source_attribution(&snippets);
                (
                    user_prompt(question, Some(&snippets)),
                    sources,
                    Some(retrieval.origin),
                )
            }
            None => (
                user_prompt(question, None),
                vec![GENERAL_KNOWLEDGE_SOURCE.to_string()],
                None,
            ),
        };

        let request = ChatRequest {
            messages: vec![ChatMessage::system(system_prompt()), ChatMessage::user(prompt)],
            temperature: self.temperature,
        };

        let tokens = self.completer.stream(&request).await?;

        tracing::info!(
            "Answering with {} ({} sources, {})",
            self.completer.name(),
            sources.len(),
            match origin {
                Some(IndexOrigin::Session) => "session index",
                Some(IndexOrigin::Durable) => "durable index",
                None => "no context",
            }
        );

        Ok(AnswerStream {
            tokens,
            sources,
            origin,
        })
    }
}

/// 질문 검증 (trim 후 비어있으면 거부)
pub fn validate_question(question: &str) -> Result<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::InvalidInput("Question is required".to_string()));
    }
    Ok(question)
}

/// 순위 순서를 유지하며 출처 중복 제거
pub fn source_attribution(hits: &[RetrievalHit]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        if !sources.contains(&hit.source) {
            sources.push(hit.source.clone());
        }
    }
    sources
}

// ============================================================================
// Tests
// ============================================================================
