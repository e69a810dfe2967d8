//! Shared fixtures for the core integration tests: an in-memory world with
//! deterministic embedding and completion models.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use marble_core::completion::{parse_model_answer, CompletionModel, ModelAnswer};
use marble_core::embedding::EmbeddingProvider;
use marble_core::error::{Error, Result, Service};
use marble_core::ingest::{ChunkSettings, IngestOutcome, IngestPipeline};
use marble_core::models::{
    FilePermission, FileRecord, FileStatus, Folder, Organization, SourceContext, Team, Visibility,
};
use marble_core::objects::{storage_key, InMemoryObjectStore, KeyParts, ObjectStore, TextConverter};
use marble_core::retrieval::{ChatRequest, ChatResponse, RetrievalEngine};
use marble_core::search::Scope;
use marble_core::store::memory::InMemoryStore;
use marble_core::store::Store;
use marble_core::vector::memory::{IndexMode, InMemoryVectorIndex};
use marble_core::vector::{connect, PartitionOptions, VectorPartition};
use marble_core::visibility::Principal;

pub const ORG: &str = "org-1";
pub const MARBLE: &str = "Project Marble empowers teams to chat with their files.";

const DIMS: usize = 256;

/// Bag-of-words hashing embedder: texts sharing words point the same way.
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    pub drop_last: bool,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            drop_last: false,
        }
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        v[(hash % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out: Vec<Vec<f32>> = texts.iter().map(|t| keyword_vector(t)).collect();
        if self.drop_last {
            out.pop();
        }
        Ok(out)
    }
}

/// Cites the first context it is given, going through the real JSON parser.
#[derive(Default)]
pub struct EchoCompletion {
    pub answers: AtomicUsize,
    pub chats: AtomicUsize,
    pub last_contexts: Mutex<Vec<SourceContext>>,
}

#[async_trait]
impl CompletionModel for EchoCompletion {
    async fn answer(&self, question: &str, contexts: &[SourceContext]) -> Result<ModelAnswer> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        *self.last_contexts.lock().unwrap() = contexts.to_vec();
        let first = contexts
            .first()
            .ok_or_else(|| Error::upstream(Service::CompletionModel, "no context"))?;
        let raw = serde_json::json!({
            "answer": format!("{} (asked: {})", first.content, question),
            "citations": [{
                "folder": first.folder_name,
                "file": first.file_name,
                "lines": [first.start_line, first.end_line],
            }],
        });
        parse_model_answer(&raw.to_string())
    }

    async fn chat(&self, message: &str) -> Result<String> {
        self.chats.fetch_add(1, Ordering::SeqCst);
        Ok(format!("general reply to: {}", message))
    }
}

/// Pretends to extract two lines of text from any document.
#[derive(Default)]
pub struct StubConverter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TextConverter for StubConverter {
    async fn to_text(&self, _bytes: &[u8], _mime: &str, file_name: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Extracted from {}\nQuarterly revenue grew strongly.", file_name))
    }
}

pub struct World {
    pub store: Arc<InMemoryStore>,
    pub objects: Arc<InMemoryObjectStore>,
    pub index: Arc<InMemoryVectorIndex>,
    pub vectors: Arc<dyn VectorPartition>,
    pub embedder: Arc<KeywordEmbedder>,
    pub completion: Arc<EchoCompletion>,
    pub converter: Arc<StubConverter>,
    pub pipeline: IngestPipeline,
    pub engine: RetrievalEngine,
}

impl World {
    pub async fn new(mode: IndexMode) -> Self {
        Self::with_embedder(mode, KeywordEmbedder::new()).await
    }

    pub async fn with_embedder(mode: IndexMode, embedder: KeywordEmbedder) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let index = Arc::new(InMemoryVectorIndex::new(mode));
        let vectors = connect(index.clone(), PartitionOptions::default())
            .await
            .unwrap();
        let embedder = Arc::new(embedder);
        let completion = Arc::new(EchoCompletion::default());
        let converter = Arc::new(StubConverter::default());

        let pipeline = IngestPipeline::new(
            store.clone(),
            objects.clone(),
            converter.clone(),
            embedder.clone(),
            vectors.clone(),
            ChunkSettings {
                chunk_size: 1500,
                overlap: 200,
            },
        );
        let engine = RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            completion.clone(),
            vectors.clone(),
            8,
        );

        store
            .create_organization(&Organization {
                id: ORG.into(),
                slug: "acme".into(),
                name: "Acme".into(),
            })
            .await
            .unwrap();

        Self {
            store,
            objects,
            index,
            vectors,
            embedder,
            completion,
            converter,
            pipeline,
            engine,
        }
    }

    pub async fn team(&self, id: &str) {
        self.store
            .create_team(&Team {
                id: id.into(),
                organization_id: ORG.into(),
                name: id.into(),
                slug: id.into(),
            })
            .await
            .unwrap();
    }

    pub async fn folder(
        &self,
        id: &str,
        name: &str,
        visibility: Visibility,
        owner: Option<&str>,
        team: Option<&str>,
    ) {
        self.store
            .create_folder(&Folder {
                id: id.into(),
                organization_id: ORG.into(),
                name: name.into(),
                visibility,
                owner_id: owner.map(str::to_string),
                team_id: team.map(str::to_string),
                deleted: false,
            })
            .await
            .unwrap();
    }

    /// Store bytes and create the file record, inheriting the folder's
    /// visibility and team.
    pub async fn upload(
        &self,
        file_id: &str,
        folder_id: &str,
        owner: &str,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> FileRecord {
        let folder = self.store.get_folder(folder_id).await.unwrap().unwrap();
        let key = storage_key(
            &KeyParts {
                visibility: folder.visibility,
                organization_id: ORG,
                team_id: folder.team_id.as_deref(),
                owner_id: Some(owner),
                folder_id,
                file_id,
            },
            name,
        );
        self.objects.put(&key, bytes.to_vec(), mime).await.unwrap();

        let file = FileRecord {
            id: file_id.into(),
            organization_id: ORG.into(),
            folder_id: folder_id.into(),
            owner_id: owner.into(),
            team_id: folder.team_id.clone(),
            visibility: folder.visibility,
            name: name.into(),
            storage_key: key,
            size: bytes.len() as i64,
            mime_type: mime.into(),
            status: FileStatus::Uploading,
            deleted: false,
            active_generation: 0,
            attempts: 0,
            last_error: None,
        };
        self.store.create_file(&file).await.unwrap();
        file
    }

    pub async fn upload_text(
        &self,
        file_id: &str,
        folder_id: &str,
        owner: &str,
        name: &str,
        text: &str,
    ) -> IngestOutcome {
        self.upload(file_id, folder_id, owner, name, "text/plain", text.as_bytes())
            .await;
        self.pipeline.ingest(file_id, owner).await.unwrap()
    }

    pub async fn grant(
        &self,
        file_id: &str,
        user_id: &str,
        access: marble_core::models::AccessLevel,
    ) {
        self.store
            .grant_permission(&FilePermission {
                file_id: file_id.into(),
                user_id: user_id.into(),
                access,
            })
            .await
            .unwrap();
    }

    pub async fn ask(&self, principal: &Principal, message: &str, scope: Scope) -> ChatResponse {
        self.engine
            .answer(
                principal,
                &ChatRequest {
                    message: message.into(),
                    knowledge_mode: true,
                    scope,
                },
            )
            .await
            .unwrap()
    }
}

pub fn user(id: &str) -> Principal {
    Principal::new(id, ORG)
}

pub fn member(id: &str, team: &str) -> Principal {
    Principal::new(id, ORG).with_teams(vec![team.to_string()])
}
