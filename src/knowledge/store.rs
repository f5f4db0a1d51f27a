//! Index Store - 세션 인덱스 + 영구 스냅샷 관리
//!
//! 두 가지 인덱스가 공존합니다.
//! - 세션 인덱스: 업로드된 문서로 만든 프로세스 메모리 인덱스 (우선)
//! - 영구 스냅샷: 데이터 디렉토리의 `embeddings.json` (사람이 읽을 수 있는 JSON 배열)
//!
//! 빌드는 항상 메모리에서 완성한 뒤 한 번에 교체/기록합니다.
//! 임베딩 실패 시 아무것도 반영되지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::{chunk_documents, Chunker, SourceDocument};
use super::vector::{Chunk, Index};

/// 스냅샷 파일 이름
pub const SNAPSHOT_FILE: &str = "embeddings.json";

/// 수집 대상 확장자
const DOCUMENT_EXTENSIONS: [&str; 2] = ["md", "txt"];

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.resume-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".resume-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 업로드된 파일 (index-build 엔드포인트 입력)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content: String,
    /// resume / project
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl UploadedFile {
    /// 파일명에서 `.md` / `.txt` 확장자를 뗀 문서로 변환
    pub fn into_document(self) -> SourceDocument {
        let source = strip_document_extension(&self.name).to_string();
        SourceDocument {
            source,
            text: self.content,
            category: self.category,
        }
    }
}

/// 현재 사용 중인 인덱스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    Session,
    Durable,
}

/// 로드된 인덱스
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub index: Arc<Index>,
    pub origin: IndexOrigin,
}

/// 빌드 결과
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub dimension: usize,
}

/// 인덱스 상태
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub active: Option<IndexOrigin>,
    pub chunk_count: usize,
    pub dimension: usize,
    pub sources: Vec<String>,
    pub session_built_at: Option<DateTime<Utc>>,
    pub snapshot_path: PathBuf,
    pub snapshot_exists: bool,
}

/// 세션 슬롯에 보관되는 인덱스
#[derive(Debug, Clone)]
struct SessionIndex {
    index: Arc<Index>,
    built_at: DateTime<Utc>,
}

// ============================================================================
// Snapshot I/O
// ============================================================================

/// 스냅샷 읽기
///
/// 파일이 없으면 `Ok(None)` 을 반환합니다.
pub async fn read_snapshot(path: &Path) -> Result<Option<Index>> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let chunks: Vec<Chunk> = serde_json::from_str(&json)?;
    Index::new(chunks).map(Some)
}

/// 스냅샷 기록 (임시 파일에 쓴 뒤 rename 으로 교체)
pub async fn write_snapshot(path: &Path, index: &Index) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let json = serde_json::to_string_pretty(index.chunks())?;
    let tmp_path = path.with_extension("json.tmp");

    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    tracing::info!("Wrote snapshot: {:?} ({} chunks)", path, index.len());
    Ok(())
}

// ============================================================================
// Document Collection
// ============================================================================

/// 디렉토리 최상위의 `.md` / `.txt` 문서 수집 (파일명 순)
pub fn collect_documents(dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| RagError::Io(e.into()))?;
        let path = entry.path();

        if !entry.file_type().is_file() || !is_document_file(path) {
            continue;
        }

        let Some(source) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let text = std::fs::read_to_string(path)?;
        let category = if source.to_lowercase().contains("resume") {
            "resume"
        } else {
            "project"
        };

        documents.push(SourceDocument::new(source, text).with_category(category));
    }

    tracing::debug!("Collected {} documents from {:?}", documents.len(), dir);
    Ok(documents)
}

fn is_document_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// 끝의 `.md` / `.txt` 제거
fn strip_document_extension(name: &str) -> &str {
    DOCUMENT_EXTENSIONS
        .iter()
        .find_map(|ext| {
            let stem = name.strip_suffix(ext)?.strip_suffix('.')?;
            (!stem.is_empty()).then_some(stem)
        })
        .unwrap_or(name)
}

// ============================================================================
// IndexManager
// ============================================================================

/// 인덱스 관리자
///
/// 세션 인덱스 슬롯과 스냅샷 경로를 소유합니다.
/// 세션 교체는 `Arc` 스왑 한 번으로 끝나므로 동시 빌드가 있어도
/// 반쯤 만들어진 인덱스가 보이는 일은 없습니다 (마지막 쓰기 우선).
pub struct IndexManager {
    session: RwLock<Option<SessionIndex>>,
    snapshot_path: PathBuf,
    chunker: Box<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexManager {
    pub fn new(
        snapshot_path: impl Into<PathBuf>,
        chunker: Box<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            session: RwLock::new(None),
            snapshot_path: snapshot_path.into(),
            chunker,
            embedder,
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// 문서를 청킹하고 한 번의 배치 호출로 임베딩
    async fn build_index(&self, documents: &[SourceDocument]) -> Result<Index> {
        let mut chunks = chunk_documents(self.chunker.as_ref(), documents);
        if chunks.is_empty() {
            return Err(RagError::InvalidInput(
                "documents contain no indexable text".to_string(),
            ));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Upstream(format!(
                "{} returned {} embeddings for {} chunks",
                self.embedder.name(),
                vectors.len(),
                chunks.len()
            )));
        }

        // 벡터 i 는 청크 i 에 대응
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }

        Index::new(chunks)
    }

    /// 업로드 문서로 세션 인덱스 빌드 후 교체
    pub async fn build_session(&self, documents: &[SourceDocument]) -> Result<BuildReport> {
        let index = self.build_index(documents).await?;
        let report = BuildReport {
            documents: documents.len(),
            chunks: index.len(),
            dimension: index.dimension(),
        };

        let session = SessionIndex {
            index: Arc::new(index),
            built_at: Utc::now(),
        };
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);

        tracing::info!(
            "Built session index: {} chunks from {} documents",
            report.chunks,
            report.documents
        );
        Ok(report)
    }

    /// 문서로 영구 스냅샷 빌드 (파일 전체 교체)
    pub async fn build_durable(&self, documents: &[SourceDocument]) -> Result<BuildReport> {
        let index = self.build_index(documents).await?;
        write_snapshot(&self.snapshot_path, &index).await?;

        Ok(BuildReport {
            documents: documents.len(),
            chunks: index.len(),
            dimension: index.dimension(),
        })
    }

    /// 디렉토리의 문서로 영구 스냅샷 빌드
    pub async fn build_durable_from_dir(&self, dir: &Path) -> Result<BuildReport> {
        // 디렉토리 스캔과 파일 읽기는 블로킹 I/O
        let owned = dir.to_path_buf();
        let documents = tokio::task::spawn_blocking(move || collect_documents(&owned))
            .await
            .map_err(|e| RagError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        if documents.is_empty() {
            return Err(RagError::InvalidInput(format!(
                "no .md or .txt documents found in {}",
                dir.display()
            )));
        }
        self.build_durable(&documents).await
    }

    /// 현재 사용할 인덱스 (세션 > 스냅샷)
    pub async fn load(&self) -> Result<LoadedIndex> {
        if let Some(session) = self.session_index() {
            return Ok(LoadedIndex {
                index: session.index,
                origin: IndexOrigin::Session,
            });
        }

        match read_snapshot(&self.snapshot_path).await? {
            Some(index) => Ok(LoadedIndex {
                index: Arc::new(index),
                origin: IndexOrigin::Durable,
            }),
            None => Err(RagError::IndexUnavailable),
        }
    }

    /// 세션 인덱스 제거 (이후 스냅샷으로 폴백)
    pub fn clear_session(&self) -> bool {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    fn session_index(&self) -> Option<SessionIndex> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 인덱스 상태
    pub async fn status(&self) -> Result<IndexStatus> {
        let session = self.session_index();
        let session_built_at = session.as_ref().map(|s| s.built_at);
        let snapshot_exists = tokio::fs::try_exists(&self.snapshot_path)
            .await
            .unwrap_or(false);

        let loaded = match self.load().await {
            Ok(loaded) => Some(loaded),
            Err(RagError::IndexUnavailable) => None,
            Err(e) => return Err(e),
        };

        Ok(IndexStatus {
            active: loaded.as_ref().map(|l| l.origin),
            chunk_count: loaded.as_ref().map(|l| l.index.len()).unwrap_or(0),
            dimension: loaded.as_ref().map(|l| l.index.dimension()).unwrap_or(0),
            sources: loaded.map(|l| l.index.sources()).unwrap_or_default(),
            session_built_at,
            snapshot_path: self.snapshot_path.clone(),
            snapshot_exists,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::FakeEmbedding;
    use crate::knowledge::chunker::SentenceChunker;
    use tempfile::TempDir;

    fn create_test_manager(embedder: FakeEmbedding) -> (TempDir, IndexManager) {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new(
            dir.path().join(SNAPSHOT_FILE),
            Box::new(SentenceChunker::new(40)),
            Arc::new(embedder),
        );
        (dir, manager)
    }

    fn sample_documents() -> Vec<SourceDocument> {
        vec![
            SourceDocument::new(
                "resume",
                "Jane is an engineer. She built three systems. She led a team.",
            ),
            SourceDocument::new("projects", "Project X processes events. It scales to high volume."),
        ]
    }

    #[tokio::test]
    async fn test_load_without_any_index() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());
        let result = manager.load().await;
        assert!(matches!(result, Err(RagError::IndexUnavailable)));
    }

    #[tokio::test]
    async fn test_build_uses_single_batch_call() {
        let embedder = FakeEmbedding::new();
        let calls = embedder.batch_calls();
        let (_dir, manager) = create_test_manager(embedder);

        let report = manager.build_session(&sample_documents()).await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, 4);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_durable_round_trip() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());

        let built = manager.build_index(&sample_documents()).await.unwrap();
        write_snapshot(manager.snapshot_path(), &built).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.origin, IndexOrigin::Durable);
        assert_eq!(loaded.index.len(), built.len());

        for (a, b) in built.chunks().iter().zip(loaded.index.chunks()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.source, b.source);
            assert_eq!(a.text, b.text);
            assert_eq!(a.embedding.len(), b.embedding.len());
            for (x, y) in a.embedding.iter().zip(&b.embedding) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[tokio::test]
    async fn test_snapshot_is_pretty_json_array() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());
        manager.build_durable(&sample_documents()).await.unwrap();

        let raw = std::fs::read_to_string(manager.snapshot_path()).unwrap();
        assert!(raw.starts_with('['));
        assert!(raw.contains("\n  {"));

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let first = &value[0];
        for key in ["id", "source", "doc", "text", "embedding"] {
            assert!(first.get(key).is_some(), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_session_takes_precedence_over_snapshot() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());
        manager.build_durable(&sample_documents()).await.unwrap();

        manager
            .build_session(&[SourceDocument::new("uploaded", "Only one sentence here.")])
            .await
            .unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.origin, IndexOrigin::Session);
        assert_eq!(loaded.index.sources(), vec!["uploaded".to_string()]);

        assert!(manager.clear_session());
        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.origin, IndexOrigin::Durable);
        assert!(!manager.clear_session());
    }

    #[tokio::test]
    async fn test_failed_build_commits_nothing() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());
        manager
            .build_session(&[SourceDocument::new("first", "Kept around.")])
            .await
            .unwrap();

        let (_dir2, failing) = create_test_manager(FakeEmbedding::failing());
        let err = failing.build_durable(&sample_documents()).await.unwrap_err();
        assert!(matches!(err, RagError::Upstream(_)));
        assert!(!failing.snapshot_path().exists());
        assert!(matches!(failing.load().await, Err(RagError::IndexUnavailable)));

        // 기존 세션 인덱스는 그대로
        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.index.sources(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_vector_count_mismatch_is_upstream_error() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new().dropping_last());
        let err = manager.build_session(&sample_documents()).await.unwrap_err();
        assert!(matches!(err, RagError::Upstream(_)));
        assert!(matches!(manager.load().await, Err(RagError::IndexUnavailable)));
    }

    #[tokio::test]
    async fn test_build_rejects_empty_documents() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());
        let err = manager
            .build_session(&[SourceDocument::new("blank", "  \n ")])
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_build_durable_from_dir() {
        let docs_dir = TempDir::new().unwrap();
        std::fs::write(docs_dir.path().join("resume.md"), "Jane is an engineer.").unwrap();
        std::fs::write(docs_dir.path().join("notes.txt"), "Project X processes events.").unwrap();
        std::fs::write(docs_dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(docs_dir.path().join("nested")).unwrap();
        std::fs::write(docs_dir.path().join("nested/deep.md"), "Ignored.").unwrap();

        let documents = collect_documents(docs_dir.path()).unwrap();
        let sources: Vec<&str> = documents.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["notes", "resume"]);
        assert_eq!(documents[1].category.as_deref(), Some("resume"));
        assert_eq!(documents[0].category.as_deref(), Some("project"));

        let (_dir, manager) = create_test_manager(FakeEmbedding::new());
        let report = manager.build_durable_from_dir(docs_dir.path()).await.unwrap();
        assert_eq!(report.documents, 2);
        assert!(manager.snapshot_path().exists());

        let empty_dir = TempDir::new().unwrap();
        assert!(manager.build_durable_from_dir(empty_dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_build_durable_from_missing_dir() {
        let (dir, manager) = create_test_manager(FakeEmbedding::new());
        let err = manager
            .build_durable_from_dir(&dir.path().join("no-such-folder"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Io(_)));
        assert!(!manager.snapshot_path().exists());
    }

    #[tokio::test]
    async fn test_status() {
        let (_dir, manager) = create_test_manager(FakeEmbedding::new());

        let status = manager.status().await.unwrap();
        assert!(status.active.is_none());
        assert!(!status.snapshot_exists);

        manager.build_session(&sample_documents()).await.unwrap();
        let status = manager.status().await.unwrap();
        assert_eq!(status.active, Some(IndexOrigin::Session));
        assert_eq!(status.chunk_count, 4);
        assert!(status.session_built_at.is_some());
        assert_eq!(status.sources, vec!["projects".to_string(), "resume".to_string()]);
    }

    #[test]
    fn test_uploaded_file_into_document() {
        let file = UploadedFile {
            name: "resume.md".to_string(),
            content: "Hello.".to_string(),
            category: Some("resume".to_string()),
        };
        let doc = file.into_document();
        assert_eq!(doc.source, "resume");
        assert_eq!(doc.category.as_deref(), Some("resume"));

        assert_eq!(strip_document_extension("notes.txt"), "notes");
        assert_eq!(strip_document_extension("archive.tar.gz"), "archive.tar.gz");
        assert_eq!(strip_document_extension(".md"), ".md");
        assert_eq!(strip_document_extension("plain"), "plain");
    }

    #[test]
    fn test_uploaded_file_deserializes_type_field() {
        let file: UploadedFile =
            serde_json::from_str(r#"{"name":"p.txt","content":"x","type":"project"}"#).unwrap();
        assert_eq!(file.category.as_deref(), Some("project"));
    }
}
