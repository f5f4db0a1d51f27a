//! Text Chunking Module
//!
//! 문장 경계(`.` `!` `?` + 공백)로 나눈 뒤, 목표 크기까지 탐욕적으로 묶어
//! 청크를 만듭니다. 완전한 문장 토크나이저가 아닌 휴리스틱입니다.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use super::vector::Chunk;

/// 기본 청크 목표 크기 (문자 수)
pub const DEFAULT_TARGET_SIZE: usize = 700;

// ============================================================================
// Source Document
// ============================================================================

/// 청킹 입력 문서
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// 문서 식별자 (파일명 stem)
    pub source: String,
    /// 원문
    pub text: String,
    /// 분류 (resume / project)
    pub category: Option<String>,
}

impl SourceDocument {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할 (각 청크는 trim 되고 비어있지 않음)
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 단위 탐욕 청커
///
/// - 문장 사이를 공백 하나로 이어 붙입니다
/// - 다음 문장을 붙이면 `target_size` 를 넘을 때 현재 버퍼를 내보냅니다
/// - `target_size` 보다 긴 단일 문장은 더 나누지 않고 그대로 한 청크가 됩니다
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    target_size: usize,
}

impl SentenceChunker {
    pub fn new(target_size: usize) -> Self {
        Self {
            target_size: target_size.max(1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TARGET_SIZE)
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut buf = String::new();
        let mut buf_chars = 0;

        for segment in split_sentences(text) {
            let seg_chars = segment.chars().count();

            if buf.is_empty() {
                buf.push_str(segment);
                buf_chars = seg_chars;
                continue;
            }

            if buf_chars + 1 + seg_chars > self.target_size {
                chunks.push(std::mem::take(&mut buf));
                buf.push_str(segment);
                buf_chars = seg_chars;
            } else {
                buf.push(' ');
                buf.push_str(segment);
                buf_chars += 1 + seg_chars;
            }
        }

        if !buf.is_empty() {
            chunks.push(buf);
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

/// 문장 경계로 분할 (구두점은 앞 문장에 남고, 뒤따르는 공백은 버림)
///
/// 빈 세그먼트는 반환하지 않습니다.
pub fn split_sentences(text: &str) -> Vec<&str> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary =
        BOUNDARY.get_or_init(|| Regex::new(r"[.!?]\s+").expect("sentence boundary regex"));

    let mut segments = Vec::new();
    let mut start = 0;

    for m in boundary.find_iter(text) {
        // 구두점은 ASCII 1바이트
        segments.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    segments.push(&text[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// Document Chunking
// ============================================================================

/// 문서 목록을 청크 목록으로 변환 (임베딩 없음)
///
/// 문서 순서와 문서 내 문장 순서를 그대로 유지합니다.
pub fn chunk_documents(chunker: &dyn Chunker, documents: &[SourceDocument]) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for doc in documents {
        let passages = chunker.chunk(&doc.text);
        if passages.is_empty() {
            tracing::warn!("No chunks generated for document: {}", doc.source);
            continue;
        }

        tracing::debug!("{}: {} chunks ({})", doc.source, passages.len(), chunker.name());

        chunks.extend(passages.into_iter().map(|text| Chunk {
            id: Uuid::new_v4().to_string(),
            source: doc.source.clone(),
            doc: doc.text.clone(),
            text,
            category: doc.category.clone(),
            embedding: Vec::new(),
        }));
    }

    chunks
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 목표 크기를 지정한 청커 생성
pub fn sentence_chunker(target_size: usize) -> Box<dyn Chunker> {
    Box::new(SentenceChunker::new(target_size))
}

// ============================================================================
// Tests
// ============================================================================
