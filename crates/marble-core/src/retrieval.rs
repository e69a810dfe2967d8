//! Retrieval engine: question → scoped vector search → grounded answer.
//!
//! ```text
//! message ──▶ general chat? ──yes──▶ completion.chat ─────────────┐
//!    │ no                                                          │
//!    ▼                                                             │
//! resolve namespaces (scope, teams, grants) ── none ──▶ join a team┤
//!    │                                                             │
//! embed ──▶ query every namespace concurrently ──▶ merge top_k     │
//!    │                                                             │
//! hydrate (active generation, access re-check) ── none ──▶ nothing │
//!    │                                                             │
//! completion.answer(contexts) ──▶ persist chat record ◀────────────┘
//! ```
//!
//! A namespace whose query fails contributes no matches; the request
//! still succeeds from the remaining partitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::completion::CompletionModel;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{ChatRecord, Citation, FileRecord, SourceContext};
use crate::search::{merge_matches, resolve_namespaces, Scope};
use crate::store::Store;
use crate::vector::{VectorMatch, VectorPartition};
use crate::visibility::{can_access, can_access_file, AccessMode, Principal};

/// Answer for team scope when the principal belongs to no team.
pub const JOIN_TEAM_MESSAGE: &str =
    "You are not a member of any team yet. Join a team to search its shared knowledge.";

/// Answer when no accessible chunk matched the question.
pub const NOTHING_FOUND_MESSAGE: &str =
    "I couldn't find anything relevant in the documents available to you.";

const LOOKUP_PREFIXES: [&str; 2] = ["/lookup", "/search"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub knowledge_mode: bool,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub sources: Vec<SourceContext>,
}

/// If `message` is a lookup command (`/lookup ...` or `/search ...`, any
/// case), return the query that follows it.
pub fn parse_lookup(message: &str) -> Option<&str> {
    let trimmed = message.trim_start();
    for prefix in LOOKUP_PREFIXES {
        let Some(head) = trimmed.get(..prefix.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(prefix) {
            continue;
        }
        let rest = &trimmed[prefix.len()..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(rest.trim());
        }
    }
    None
}

pub struct RetrievalEngine {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionModel>,
    vectors: Arc<dyn VectorPartition>,
    top_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionModel>,
        vectors: Arc<dyn VectorPartition>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            completion,
            vectors,
            top_k: top_k.max(1),
        }
    }

    pub async fn answer(
        &self,
        principal: &Principal,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        if request.message.trim().is_empty() {
            return Err(Error::validation("message must not be empty"));
        }

        let lookup = parse_lookup(&request.message);
        if !request.knowledge_mode && lookup.is_none() {
            let answer = self.completion.chat(&request.message).await?;
            return self
                .finish(principal, request, answer, Vec::new(), Vec::new())
                .await;
        }

        let question = lookup.unwrap_or(request.message.trim());
        if question.is_empty() {
            return Err(Error::validation("lookup command needs a query"));
        }

        let granted = if matches!(request.scope, Scope::Personal | Scope::All) {
            self.granted_files(principal).await?
        } else {
            Vec::new()
        };
        let plan = resolve_namespaces(principal, request.scope, &granted)?;
        if plan.is_empty() {
            debug!(user = %principal.user_id, "team scope without team membership");
            return self
                .finish(
                    principal,
                    request,
                    JOIN_TEAM_MESSAGE.to_string(),
                    Vec::new(),
                    Vec::new(),
                )
                .await;
        }

        let query_vec = self.embedder.embed_one(question).await?;

        let lists = join_all(plan.iter().map(|q| {
            let query_vec = &query_vec;
            async move {
                // Grant-only namespaces are searched by file so the granted
                // files are not crowded out by the owner's other files.
                let result = match &q.only_files {
                    Some(files) => {
                        self.vectors
                            .query_files(&q.token, query_vec, self.top_k, files)
                            .await
                    }
                    None => self.vectors.query(&q.token, query_vec, self.top_k).await,
                };
                match result {
                    Ok(matches) => matches
                        .into_iter()
                        .filter(|m| q.admits(m))
                        .collect::<Vec<VectorMatch>>(),
                    Err(e) => {
                        warn!(namespace = %q.namespace, error = %e, "namespace query failed");
                        Vec::new()
                    }
                }
            }
        }))
        .await;

        let merged = merge_matches(lists, self.top_k);
        let sources = self.hydrate(principal, &granted, &merged).await?;
        if sources.is_empty() {
            return self
                .finish(
                    principal,
                    request,
                    NOTHING_FOUND_MESSAGE.to_string(),
                    Vec::new(),
                    Vec::new(),
                )
                .await;
        }

        info!(
            user = %principal.user_id,
            scope = %request.scope,
            namespaces = plan.len(),
            contexts = sources.len(),
            "answering from documents"
        );
        let reply = self.completion.answer(question, &sources).await?;
        self.finish(principal, request, reply.answer, reply.citations, sources)
            .await
    }

    /// Files reachable only through explicit grants.
    async fn granted_files(&self, principal: &Principal) -> Result<Vec<FileRecord>> {
        let grants = self.store.permissions_for_user(&principal.user_id).await?;
        let mut files = Vec::new();
        for grant in &grants {
            let Some(file) = self.store.get_file(&grant.file_id).await? else {
                continue;
            };
            if file.owner_id == principal.user_id {
                continue;
            }
            if can_access_file(&file, principal, AccessMode::Read, &grants).is_allowed() {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Resolve merged matches to live chunk text, dropping anything that
    /// no longer exists, is superseded, or is not readable.
    async fn hydrate(
        &self,
        principal: &Principal,
        granted: &[FileRecord],
        merged: &[VectorMatch],
    ) -> Result<Vec<SourceContext>> {
        if merged.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = merged.iter().map(|m| m.id.clone()).collect();
        let scores: HashMap<&str, f32> = merged.iter().map(|m| (m.id.as_str(), m.score)).collect();
        let granted_ids: HashSet<&str> = granted.iter().map(|f| f.id.as_str()).collect();

        let hydrated = self.store.hydrate_chunks(&ids).await?;
        let sources: Vec<SourceContext> = hydrated
            .into_iter()
            .filter(|h| {
                can_access((&h.chunk).into(), principal, AccessMode::Read).is_allowed()
                    || granted_ids.contains(h.chunk.file_id.as_str())
            })
            .map(|h| SourceContext {
                score: scores.get(h.chunk.id.as_str()).copied().unwrap_or_default(),
                chunk_id: h.chunk.id,
                file_id: h.chunk.file_id,
                folder_name: h.folder_name,
                file_name: h.file_name,
                start_line: h.chunk.start_line,
                end_line: h.chunk.end_line,
                content: h.chunk.content,
            })
            .collect();

        if sources.len() < merged.len() {
            debug!(
                matched = merged.len(),
                kept = sources.len(),
                "dropped unresolvable matches"
            );
        }
        Ok(sources)
    }

    async fn finish(
        &self,
        principal: &Principal,
        request: &ChatRequest,
        answer: String,
        citations: Vec<Citation>,
        sources: Vec<SourceContext>,
    ) -> Result<ChatResponse> {
        let record = ChatRecord {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: principal.organization_id.clone(),
            user_id: principal.user_id.clone(),
            question: request.message.clone(),
            answer,
            citations,
            scope: if request.knowledge_mode || parse_lookup(&request.message).is_some() {
                Some(request.scope.to_string())
            } else {
                None
            },
            knowledge_mode: request.knowledge_mode,
            created_at: Utc::now(),
        };
        self.store.save_chat(&record).await?;

        Ok(ChatResponse {
            id: record.id,
            answer: record.answer,
            citations: record.citations,
            sources,
        })
    }
}
