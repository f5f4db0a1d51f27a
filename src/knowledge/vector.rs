//! Vector Index - 청크/인덱스 타입 및 코사인 검색
//!
//! 인메모리 리스트를 전수 스캔(O(n·d))합니다.
//! 코퍼스가 작으므로 ANN 구조는 사용하지 않습니다.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 0 벡터 나눗셈 방지용 분모 보정값
pub const SIMILARITY_EPSILON: f32 = 1e-10;

// ============================================================================
// Types
// ============================================================================

/// 문서의 연속된 구간 (검색 단위)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 청크 생성 시 발급되는 고유 ID
    pub id: String,
    /// 원본 문서 식별자 (파일명 stem)
    pub source: String,
    /// 원본 문서 전체 텍스트
    pub doc: String,
    /// 청크 텍스트 (trim 됨, 비어있지 않음)
    pub text: String,
    /// 업로드 시 지정된 분류 (resume / project)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 임베딩 벡터 (임베딩 단계 이전에는 비어 있음)
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// 검색 결과 (임베딩 제외)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: String,
    pub source: String,
    pub text: String,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

// ============================================================================
// Index
// ============================================================================

/// 동일 차원의 임베딩을 가진 청크 목록
#[derive(Debug, Clone, Default)]
pub struct Index {
    chunks: Vec<Chunk>,
    dimension: usize,
}

impl Index {
    /// 청크 목록으로 인덱스 생성
    ///
    /// 모든 청크가 같은 차원의 (비어 있지 않은) 임베딩을 가져야 합니다.
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        let dimension = chunks.first().map(|c| c.embedding.len()).unwrap_or(0);

        if !chunks.is_empty() && dimension == 0 {
            return Err(RagError::InvalidIndex(format!(
                "chunk {} has no embedding",
                chunks[0].id
            )));
        }

        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
            return Err(RagError::InvalidIndex(format!(
                "chunk {} has dimension {}, expected {}",
                bad.id,
                bad.embedding.len(),
                dimension
            )));
        }

        Ok(Self { chunks, dimension })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 임베딩 차원 (빈 인덱스는 0)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 포함된 문서 식별자 (정렬, 중복 제거)
    pub fn sources(&self) -> Vec<String> {
        self.chunks
            .iter()
            .map(|c| c.source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 질의 벡터와 가장 유사한 상위 k개 청크
    pub fn top_k(&self, query_embedding: &[f32], k: usize) -> Vec<RetrievalHit> {
        top_k(query_embedding, &self.chunks, k)
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// `dot(a, b) / (|a| * |b| + ε)` 이며 결과는 -1.0 ~ 1.0 범위입니다.
/// 길이가 다르거나 빈 벡터, 또는 결과가 유한하지 않으면 0.0 을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let score = dot_product / (norm_a * norm_b + SIMILARITY_EPSILON);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// 전수 스캔 top-k 검색
///
/// 점수 내림차순으로 정렬하며, 동점은 원래 인덱스 순서를 유지합니다 (stable sort).
pub fn top_k(query_embedding: &[f32], chunks: &[Chunk], k: usize) -> Vec<RetrievalHit> {
    if k == 0 || chunks.is_empty() {
        return vec![];
    }

    let mut scored: Vec<(usize, f32)> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query_embedding, &c.embedding)))
        .collect();

    // sort_by 는 stable - 동점이면 인덱스 순서 유지
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, score)| {
            let chunk = &chunks[i];
            RetrievalHit {
                id: chunk.id.clone(),
                source: chunk.source.clone(),
                text: chunk.text.clone(),
                score,
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
