mod common;

use serde_json::json;
use std::sync::Arc;

use common::{data_events, drain, ScriptedProvider, Step};
use draftbox::chat::stream::{data_stream, DataEvent, StreamPart};
use draftbox::config::{default_models, ToolsConfig};
use draftbox::db::service::DbService;
use draftbox::db::{self, DbPool, DocumentKind, NewDocument};
use draftbox::llm::LlmProvider;
use draftbox::tools::{ToolContext, ToolError, ToolName, ToolRegistry};
use tokio::sync::mpsc::Receiver;

fn setup(llm: ScriptedProvider) -> (DbPool, ToolRegistry, Arc<ScriptedProvider>) {
    let pool = db::in_memory().unwrap();
    let llm = Arc::new(llm);
    let registry = ToolRegistry::new(pool.clone(), llm.clone() as Arc<dyn LlmProvider>, &ToolsConfig::default());
    (pool, registry, llm)
}

fn context(user_id: Option<&str>) -> (ToolContext, Receiver<StreamPart>) {
    let (writer, rx) = data_stream(1024);
    let ctx = ToolContext {
        user_id: user_id.map(str::to_string),
        writer,
        model: default_models().remove(0),
    };
    (ctx, rx)
}

fn seed(pool: &DbPool, id: &str, user_id: &str, content: &str, kind: DocumentKind) {
    let conn = db::lock(pool).unwrap();
    DbService::save_document(
        &conn,
        NewDocument { id, user_id, title: "Notes", content, kind },
    )
    .unwrap();
}

fn history_len(pool: &DbPool, id: &str) -> usize {
    let conn = db::lock(pool).unwrap();
    DbService::get_document_history(&conn, id).unwrap().len()
}

#[tokio::test]
async fn test_create_document_stores_empty_snapshot() {
    let (pool, registry, _) = setup(ScriptedProvider::default());
    let (ctx, _rx) = context(Some("u1"));

    let result = registry
        .invoke("createDocument", r#"{"title": "Notes", "kind": "text"}"#, &ctx)
        .await
        .unwrap();
    let id = result["documentId"].as_str().unwrap().to_string();

    let conn = db::lock(&pool).unwrap();
    let doc = DbService::get_document(&conn, &id).unwrap().unwrap();
    assert_eq!(doc.title, "Notes");
    assert_eq!(doc.content, "");
    assert_eq!(doc.kind, DocumentKind::Text);
    assert_eq!(doc.user_id, "u1");
}

#[tokio::test]
async fn test_create_document_requires_user() {
    let (_pool, registry, _) = setup(ScriptedProvider::default());
    let (ctx, _rx) = context(None);

    let err = registry
        .invoke("createDocument", r#"{"title": "Notes", "kind": "code"}"#, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Unauthorized));
}

#[tokio::test]
async fn test_update_document_appends_snapshot() {
    let (pool, registry, _) = setup(ScriptedProvider::default());
    seed(&pool, "d1", "u1", "first", DocumentKind::Text);
    let (ctx, _rx) = context(Some("u1"));

    let result = registry
        .invoke("updateDocument", r#"{"documentId": "d1", "content": "second"}"#, &ctx)
        .await
        .unwrap();
    assert_eq!(result, json!({"success": true}));

    let conn = db::lock(&pool).unwrap();
    let history = DbService::get_document_history(&conn, "d1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "second");
    assert_eq!(history[1].title, "Notes");
}

#[tokio::test]
async fn test_foreign_document_looks_missing() {
    let (pool, registry, _) = setup(ScriptedProvider::default());
    seed(&pool, "d1", "u1", "private", DocumentKind::Text);
    let (ctx, _rx) = context(Some("u2"));

    let err = registry
        .invoke("updateDocument", r#"{"documentId": "d1", "content": "mine now"}"#, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NotFound(ref id) if id == "d1"));

    let err = registry
        .invoke("reviseDocument", r#"{"id": "d1", "description": "shorter"}"#, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));
    assert_eq!(history_len(&pool, "d1"), 1);
}

#[tokio::test]
async fn test_revise_text_streams_then_saves_once() {
    let (pool, registry, _) = setup(ScriptedProvider::new(vec![Step::text(&["Hello ", "world"])]));
    seed(&pool, "d1", "u1", "draft", DocumentKind::Text);
    let (ctx, mut rx) = context(Some("u1"));

    let result = registry
        .invoke("reviseDocument", r#"{"id": "d1", "description": "greet"}"#, &ctx)
        .await
        .unwrap();
    assert_eq!(result["id"], "d1");
    assert_eq!(result["kind"], "text");

    let events = data_events(&drain(&mut rx));
    assert_eq!(
        events,
        vec![
            DataEvent::Id("d1".to_string()),
            DataEvent::Title("Notes".to_string()),
            DataEvent::Kind(DocumentKind::Text),
            DataEvent::Clear,
            DataEvent::TextDelta("Hello ".to_string()),
            DataEvent::TextDelta("world".to_string()),
            DataEvent::Finish,
        ]
    );

    let conn = db::lock(&pool).unwrap();
    let history = DbService::get_document_history(&conn, "d1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Hello world");
}

#[tokio::test]
async fn test_revise_code_emits_cumulative_code() {
    let (pool, registry, llm) = setup(ScriptedProvider::new(vec![Step::text(&[
        "{\"code\": \"fn ",
        "main() {}\"}",
    ])]));
    seed(&pool, "d1", "u1", "fn main() { todo!() }", DocumentKind::Code);
    let (ctx, mut rx) = context(Some("u1"));

    registry
        .invoke("reviseDocument", r#"{"id": "d1", "description": "empty body"}"#, &ctx)
        .await
        .unwrap();

    let events = data_events(&drain(&mut rx));
    let code: Vec<&DataEvent> = events
        .iter()
        .filter(|e| matches!(e, DataEvent::CodeDelta(_)))
        .collect();
    assert_eq!(
        code,
        vec![
            &DataEvent::CodeDelta("fn ".to_string()),
            &DataEvent::CodeDelta("fn main() {}".to_string()),
        ]
    );
    assert_eq!(events.last(), Some(&DataEvent::Finish));

    let conn = db::lock(&pool).unwrap();
    let current = DbService::get_document(&conn, "d1").unwrap().unwrap();
    assert_eq!(current.content, "fn main() {}");
    assert_eq!(current.kind, DocumentKind::Code);

    // The secondary generation saw the current content, not the chat.
    let contexts = llm.contexts.lock().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].len(), 1);
    assert_eq!(contexts[0][0].content.as_deref(), Some("empty body"));
}

#[tokio::test]
async fn test_revise_failure_keeps_previous_snapshot() {
    let (pool, registry, _) = setup(ScriptedProvider::new(vec![Step::failing(&["half a"])]));
    seed(&pool, "d1", "u1", "draft", DocumentKind::Text);
    let (ctx, mut rx) = context(Some("u1"));

    let err = registry
        .invoke("reviseDocument", r#"{"id": "d1", "description": "rewrite"}"#, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Upstream(_)));

    let events = data_events(&drain(&mut rx));
    assert!(!events.contains(&DataEvent::Finish));
    assert_eq!(history_len(&pool, "d1"), 1);
}

#[tokio::test]
async fn test_suggestions_are_pinned_and_capped() {
    let reply = json!({"suggestions": ["One", "Two", " ", "Three", "Four", "Five", "Six"]}).to_string();
    let (pool, registry, _) = setup(ScriptedProvider::default().with_replies(&[reply.as_str()]));
    seed(&pool, "d1", "u1", "A long draft", DocumentKind::Text);
    let (ctx, mut rx) = context(Some("u1"));

    let result = registry
        .invoke("requestSuggestions", r#"{"documentId": "d1", "query": "tighten it"}"#, &ctx)
        .await
        .unwrap();
    assert_eq!(result["suggestions"].as_array().unwrap().len(), 5);

    let conn = db::lock(&pool).unwrap();
    let doc = DbService::get_document(&conn, "d1").unwrap().unwrap();
    let stored = DbService::get_suggestions(&conn, "d1").unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|s| s.document_created_at == doc.created_at && s.user_id == "u1"));
    assert!(stored.iter().all(|s| s.content != "Six"));

    let streamed = data_events(&drain(&mut rx))
        .into_iter()
        .filter(|e| matches!(e, DataEvent::Suggestion(_)))
        .count();
    assert_eq!(streamed, 5);
}

#[tokio::test]
async fn test_registry_rejects_disabled_and_unknown_tools() {
    let (pool, registry, _) = setup(ScriptedProvider::default());
    let registry = registry.with_allowed(vec![ToolName::GetWeather]);
    let (ctx, _rx) = context(Some("u1"));

    let err = registry
        .invoke("createDocument", r#"{"title": "Notes", "kind": "text"}"#, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NotAllowed(_)));

    let err = registry.invoke("internet_search", "{}", &ctx).await.unwrap_err();
    assert!(matches!(err, ToolError::UnknownTool(_)));

    let definitions = registry.get_definitions();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].function.name, "getWeather");

    let conn = db::lock(&pool).unwrap();
    assert!(DbService::list_chats(&conn, "u1", 10, 0).unwrap().is_empty());
}
