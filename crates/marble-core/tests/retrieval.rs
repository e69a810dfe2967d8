//! Retrieval engine end to end: ingest, ask, cite.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use marble_core::models::{AccessLevel, Visibility};
use marble_core::namespace::Namespace;
use marble_core::retrieval::{ChatRequest, JOIN_TEAM_MESSAGE, NOTHING_FOUND_MESSAGE};
use marble_core::search::Scope;
use marble_core::vector::memory::IndexMode;

#[tokio::test]
async fn marble_question_is_cited_from_its_file() {
    for mode in [IndexMode::Namespaced, IndexMode::Filtered] {
        let w = World::new(mode).await;
        w.folder("docs", "Product", Visibility::Organization, Some("alice"), None)
            .await;
        w.upload_text("f1", "docs", "alice", "marble.txt", MARBLE).await;

        let resp = w.ask(&user("bob"), "What does Marble do?", Scope::Org).await;
        assert_eq!(resp.citations.len(), 1, "mode {:?}", mode);
        let citation = &resp.citations[0];
        assert_eq!(citation.folder, "Product");
        assert_eq!(citation.file, "marble.txt");
        assert_eq!(citation.lines, [1, 1]);

        assert_eq!(resp.sources.len(), 1);
        assert_eq!(resp.sources[0].content, MARBLE);
        assert!(!resp.id.is_empty());
        assert_eq!(w.store.chats().len(), 1);
        assert_eq!(w.store.chats()[0].id, resp.id);
    }
}

#[tokio::test]
async fn team_scope_without_membership_skips_the_index() {
    let w = World::new(IndexMode::Namespaced).await;
    let resp = w.ask(&user("bob"), "anything?", Scope::Team).await;

    assert_eq!(resp.answer, JOIN_TEAM_MESSAGE);
    assert!(resp.citations.is_empty());
    assert!(resp.sources.is_empty());
    assert_eq!(w.index.query_count(), 0);
    assert_eq!(w.embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(w.store.chats().len(), 1);
}

#[tokio::test]
async fn nothing_found_when_no_accessible_chunks() {
    let w = World::new(IndexMode::Filtered).await;
    w.folder("mine", "Private", Visibility::Personal, Some("alice"), None)
        .await;
    w.upload_text("f1", "mine", "alice", "diary.txt", "Marble secrets.")
        .await;

    let resp = w.ask(&user("bob"), "Marble?", Scope::All).await;
    assert_eq!(resp.answer, NOTHING_FOUND_MESSAGE);
    assert!(resp.sources.is_empty());
    assert_eq!(w.completion.answers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn personal_files_stay_personal() {
    for mode in [IndexMode::Namespaced, IndexMode::Filtered] {
        let w = World::new(mode).await;
        w.folder("mine", "Private", Visibility::Personal, Some("alice"), None)
            .await;
        w.folder("docs", "Shared", Visibility::Organization, Some("alice"), None)
            .await;
        w.upload_text("p1", "mine", "alice", "diary.txt", "Marble private roadmap.")
            .await;
        w.upload_text("o1", "docs", "alice", "public.txt", "Marble public overview.")
            .await;

        let bob = w.ask(&user("bob"), "Marble roadmap", Scope::All).await;
        let files: Vec<&str> = bob.sources.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(files, vec!["public.txt"]);

        let alice = w.ask(&user("alice"), "Marble roadmap", Scope::Personal).await;
        let files: Vec<&str> = alice.sources.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(files, vec!["diary.txt"]);
    }
}

#[tokio::test]
async fn team_knowledge_is_shared_with_members_only() {
    let w = World::new(IndexMode::Namespaced).await;
    w.team("t1").await;
    w.folder("eng", "Engineering", Visibility::Team, Some("alice"), Some("t1"))
        .await;
    w.upload_text("f1", "eng", "alice", "oncall.md", "Marble on-call rotation.")
        .await;

    let carol = w
        .ask(&member("carol", "t1"), "who is on call for Marble", Scope::Team)
        .await;
    assert_eq!(carol.sources.len(), 1);

    let dave = w
        .ask(&member("dave", "t2"), "who is on call for Marble", Scope::Team)
        .await;
    assert_eq!(dave.answer, NOTHING_FOUND_MESSAGE);
}

#[tokio::test]
async fn grants_widen_personal_scope_to_granted_files_only() {
    let w = World::new(IndexMode::Filtered).await;
    w.folder("bobs", "Bob's", Visibility::Personal, Some("bob"), None)
        .await;
    w.upload_text("shared", "bobs", "bob", "shared.txt", "Marble budget shared.")
        .await;
    w.upload_text("hidden", "bobs", "bob", "hidden.txt", "Marble budget hidden.")
        .await;
    w.grant("shared", "alice", AccessLevel::Viewer).await;

    let resp = w.ask(&user("alice"), "Marble budget", Scope::Personal).await;
    let files: Vec<&str> = resp.sources.iter().map(|s| s.file_name.as_str()).collect();
    assert_eq!(files, vec!["shared.txt"]);
}

#[tokio::test]
async fn granted_file_is_found_when_owner_files_rank_higher() {
    for mode in [IndexMode::Namespaced, IndexMode::Filtered] {
        let w = World::new(mode).await;
        w.folder("bobs", "Bob's", Visibility::Personal, Some("bob"), None)
            .await;
        for i in 0..10 {
            let id = format!("own-{}", i);
            let name = format!("own-{}.txt", i);
            w.upload_text(&id, "bobs", "bob", &name, "Marble budget.")
                .await;
        }
        w.upload_text(
            "shared",
            "bobs",
            "bob",
            "shared.txt",
            "Marble budget shared quarterly notes.",
        )
        .await;
        w.grant("shared", "alice", AccessLevel::Viewer).await;

        let resp = w.ask(&user("alice"), "Marble budget", Scope::Personal).await;
        let files: Vec<&str> = resp.sources.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(files, vec!["shared.txt"], "mode {:?}", mode);
        assert_eq!(resp.citations[0].file, "shared.txt");
    }
}

#[tokio::test]
async fn failing_namespace_does_not_fail_the_request() {
    let w = World::new(IndexMode::Namespaced).await;
    w.folder("mine", "Private", Visibility::Personal, Some("alice"), None)
        .await;
    w.folder("docs", "Shared", Visibility::Organization, Some("alice"), None)
        .await;
    w.upload_text("p1", "mine", "alice", "mine.txt", "Marble personal note.")
        .await;
    w.upload_text("o1", "docs", "alice", "org.txt", "Marble org note.")
        .await;
    w.index.fail_queries_for(Namespace::Org(ORG.into()));

    let resp = w.ask(&user("alice"), "Marble note", Scope::All).await;
    let files: Vec<&str> = resp.sources.iter().map(|s| s.file_name.as_str()).collect();
    assert_eq!(files, vec!["mine.txt"]);
}

#[tokio::test]
async fn deleted_files_are_never_hydrated() {
    let w = World::new(IndexMode::Filtered).await;
    w.folder("docs", "Docs", Visibility::Organization, Some("alice"), None)
        .await;
    w.upload_text("f1", "docs", "alice", "a.txt", MARBLE).await;
    w.store.mark_file_deleted("f1");

    let resp = w.ask(&user("bob"), "Marble", Scope::Org).await;
    assert_eq!(resp.answer, NOTHING_FOUND_MESSAGE);
}

#[tokio::test]
async fn general_chat_bypasses_retrieval() {
    let w = World::new(IndexMode::Namespaced).await;
    let resp = w
        .engine
        .answer(
            &user("bob"),
            &ChatRequest {
                message: "hello there".into(),
                knowledge_mode: false,
                scope: Scope::All,
            },
        )
        .await
        .unwrap();

    assert_eq!(resp.answer, "general reply to: hello there");
    assert!(resp.citations.is_empty());
    assert_eq!(w.embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(w.index.query_count(), 0);
    let chats = w.store.chats();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].scope, None);
}

#[tokio::test]
async fn lookup_command_forces_retrieval() {
    let w = World::new(IndexMode::Namespaced).await;
    w.folder("docs", "Docs", Visibility::Organization, Some("alice"), None)
        .await;
    w.upload_text("f1", "docs", "alice", "marble.txt", MARBLE).await;

    let resp = w
        .engine
        .answer(
            &user("bob"),
            &ChatRequest {
                message: "/lookup what does Marble do".into(),
                knowledge_mode: false,
                scope: Scope::Org,
            },
        )
        .await
        .unwrap();

    assert_eq!(resp.citations.len(), 1);
    assert_eq!(w.completion.chats.load(Ordering::SeqCst), 0);
    assert!(resp.answer.contains("asked: what does Marble do"));
}
