//! Knowledge 모듈 - 문서 청킹, 벡터 인덱스, 인덱스 저장소
//!
//! - Chunker: 문장 경계 기반 텍스트 분할
//! - Vector: 청크 + 임베딩 인덱스, 코사인 유사도 top-k 검색
//! - Store: 세션 인덱스 / `embeddings.json` 스냅샷 관리

mod chunker;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    chunk_documents, sentence_chunker, split_sentences, Chunker, SentenceChunker, SourceDocument,
    DEFAULT_TARGET_SIZE,
};
pub use store::{
    collect_documents, get_data_dir, read_snapshot, write_snapshot, BuildReport, IndexManager,
    IndexOrigin, IndexStatus, LoadedIndex, UploadedFile, SNAPSHOT_FILE,
};
pub use vector::{cosine_similarity, top_k, Chunk, Index, RetrievalHit, SIMILARITY_EPSILON};
