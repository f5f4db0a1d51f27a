//! resume-rag - 이력서/프로젝트 문서 기반 RAG 질의응답
//!
//! 문서를 문장 단위로 청킹/임베딩해 인덱스를 만들고, 질문마다 코사인
//! 유사도 top-k 청크를 프롬프트에 넣어 답변을 스트리밍합니다.
//! 답변 뒤에는 `SOURCES:` 트레일러로 사용한 문서 목록이 붙습니다.

pub mod cli;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod pipeline;
pub mod prompt;
pub mod server;
pub mod stream;

// Re-exports
pub use completion::{
    ChatMessage, ChatRequest, CompletionProvider, OpenAiCompletion, Role, TokenStream,
};
pub use config::Config;
pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use error::{RagError, Result};
pub use knowledge::{
    cosine_similarity, get_data_dir, top_k, Chunk, Chunker, Index, IndexManager, IndexOrigin,
    IndexStatus, RetrievalHit, SentenceChunker, SourceDocument, UploadedFile,
};
pub use pipeline::{AnswerStream, RagPipeline};
pub use prompt::{system_prompt, user_prompt, GENERAL_KNOWLEDGE_SOURCE};
pub use stream::{AnswerDecoder, DecodedAnswer, Frame, Framing, NdjsonDecoder, SOURCES_MARKER};
