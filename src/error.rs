//! 에러 타입
//!
//! 라이브러리 전체에서 사용하는 에러 분류입니다.
//! HTTP 계층은 이 분류로 상태 코드를 결정합니다 (입력 오류 = 400, 그 외 = 500).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 요청 (질문 누락, 빈 업로드 등) - 외부 호출 전에 거부
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 프로바이더 자격 증명 누락
    #[error(
        "OPENAI_API_KEY environment variable is not set. \
         Set OPENAI_API_KEY (or NEXT_PUBLIC_OPENAI_API_KEY) and restart the server."
    )]
    MissingApiKey,

    /// 잘못된 설정 값
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 세션 인덱스도, 스냅샷 파일도 없음
    #[error("No embeddings available. Upload files or run `resume-rag build` first.")]
    IndexUnavailable,

    /// 임베딩/완성 프로바이더 호출 실패
    #[error("Upstream provider error: {0}")]
    Upstream(String),

    /// 스트림 프로토콜 위반 (트레일러 누락, 잘못된 프레임)
    #[error("Stream protocol error: {0}")]
    Protocol(String),

    /// 인덱스 데이터 불일치 (차원 불일치 등)
    #[error("Invalid index data: {0}")]
    InvalidIndex(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// 호출자 책임의 에러인지 여부
    pub fn is_client_error(&self) -> bool {
        matches!(self, RagError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
