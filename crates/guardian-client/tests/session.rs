use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guardian_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};
use guardian_agent::{Dispatcher, PromptBuilder, TurnOrchestrator, TurnSettings};
use guardian_client::{
    ChatSession, ClientError, GatewayClient, HttpConversationStore, TurnStatus, APOLOGY_TEXT,
};
use guardian_core::config::{GuardianConfig, TokenEntry};
use guardian_core::types::{ActorId, ActorRole, MessageRole};
use guardian_gateway::auth::StaticTokenResolver;
use guardian_gateway::{build_router, AppState};
use guardian_protocol::{Frame, HistoryRole};
use guardian_records::{db, SqliteRecordStore};
use guardian_sessions::{ConversationStore, PersistenceCoordinator, SqliteConversationStore};

/// Looks up grades for Minh, then answers.
struct GradesProvider;

#[async_trait]
impl LlmProvider for GradesProvider {
    fn name(&self) -> &str {
        "grades"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let (content, tool_calls) = if req.tools.is_empty() {
            ("Minh đang học tốt môn Toán.".to_string(), Vec::new())
        } else {
            (
                String::new(),
                vec![ToolCall {
                    id: "call_0".into(),
                    name: "getDetailedGrades".into(),
                    input: serde_json::json!({"studentName": "Nguyễn Văn Minh"}),
                }],
            )
        };
        Ok(ChatResponse {
            content,
            model: "test".into(),
            tokens_in: 0,
            tokens_out: 0,
            stop_reason: "stop".into(),
            tool_calls,
        })
    }
}

/// Looks up grades, then has nothing to say about them.
struct SilentSynthesisProvider;

#[async_trait]
impl LlmProvider for SilentSynthesisProvider {
    fn name(&self) -> &str {
        "silent-synthesis"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut response = GradesProvider.send(req).await?;
        if req.tools.is_empty() {
            response.content.clear();
        }
        Ok(response)
    }
}

/// Never answers within the client's patience.
struct StalledProvider;

#[async_trait]
impl LlmProvider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(ProviderError::Unavailable("too slow".into()))
    }
}

async fn spawn_gateway(provider: Arc<dyn LlmProvider>) -> String {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    db::init_db(&conn).unwrap();
    db::seed_demo(&conn).unwrap();
    let records = SqliteRecordStore::new(conn);

    let conn = rusqlite::Connection::open_in_memory().unwrap();
    guardian_sessions::db::init_db(&conn).unwrap();
    let conversations = SqliteConversationStore::new(conn);

    let mut config = GuardianConfig::default();
    config.auth.tokens = vec![
        TokenEntry {
            token: "t-parent".into(),
            actor_id: "parent-demo".into(),
            role: ActorRole::Parent,
        },
        TokenEntry {
            token: "t-teacher".into(),
            actor_id: "teacher-1".into(),
            role: ActorRole::Teacher,
        },
    ];
    let orchestrator = TurnOrchestrator::new(
        provider,
        Dispatcher::new(Arc::new(records)),
        PromptBuilder::default(),
        TurnSettings::default(),
    );
    let resolver = StaticTokenResolver::from_config(&config.auth);
    let state = Arc::new(AppState::new(
        config,
        orchestrator,
        Arc::new(resolver),
        Arc::new(conversations),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn session_for(client: &GatewayClient) -> (ChatSession, Arc<dyn ConversationStore>) {
    let store: Arc<dyn ConversationStore> = Arc::new(HttpConversationStore::new(client.clone()));
    let persistence = PersistenceCoordinator::new(Arc::clone(&store), ActorId::from("me"));
    (ChatSession::new(client.clone(), persistence), store)
}

#[tokio::test]
async fn turn_streams_and_persists_both_messages() {
    let base = spawn_gateway(Arc::new(GradesProvider)).await;
    let client = GatewayClient::new(base, "t-parent");
    let (mut session, store) = session_for(&client);

    let mut kinds = Vec::new();
    let turn = session
        .send("Minh học thế nào?", |frame, _| kinds.push(frame.kind()))
        .await
        .unwrap();
    assert_eq!(kinds, vec!["function_results", "text", "complete"]);

    let result = &turn.result;
    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.function_calls, 1);
    let ctx = result.context_used.unwrap();
    assert_eq!(ctx.students, 1);
    assert!(ctx.grades > 0);
    assert!(result.prompt_strength.unwrap() > 0.4);

    let user = turn.user_save.await.unwrap();
    let assistant = turn.assistant_save.unwrap().await.unwrap();
    assert_eq!(user.conversation_id, assistant.conversation_id);
    assert_eq!(assistant.id, result.message.as_ref().unwrap().id);

    let saved = store
        .get_messages(&ActorId::from("me"), &user.conversation_id)
        .await
        .unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].role, MessageRole::User);
    assert_eq!(saved[1].content, "Minh đang học tốt môn Toán.");
    assert_eq!(saved[1].function_calls, Some(1));
    assert_eq!(saved[1].prompt_strength, result.prompt_strength);

    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn second_turn_reuses_the_conversation() {
    let base = spawn_gateway(Arc::new(GradesProvider)).await;
    let client = GatewayClient::new(base, "t-parent");
    let (mut session, _store) = session_for(&client);

    let first = session.send("Câu hỏi một", |_, _| {}).await.unwrap();
    let first_conv = first.user_save.await.unwrap().conversation_id;
    first.assistant_save.unwrap().await.unwrap();
    let second = session.send("Câu hỏi hai", |_, _| {}).await.unwrap();
    let second_conv = second.user_save.await.unwrap().conversation_id;
    second.assistant_save.unwrap().await.unwrap();

    assert_eq!(first_conv, second_conv);
    assert_eq!(session.persistence().get_messages().await.unwrap().len(), 4);
}

#[tokio::test]
async fn completed_turn_without_text_still_saves_the_answer() {
    let base = spawn_gateway(Arc::new(SilentSynthesisProvider)).await;
    let client = GatewayClient::new(base, "t-parent");
    let (mut session, store) = session_for(&client);

    let mut kinds = Vec::new();
    let turn = session
        .send("Minh học thế nào?", |frame, _| kinds.push(frame.kind()))
        .await
        .unwrap();
    assert_eq!(kinds, vec!["function_results", "complete"]);

    let result = &turn.result;
    assert_eq!(result.status, TurnStatus::Completed);
    let message = result.message.as_ref().unwrap();
    assert_eq!(message.content, "");
    assert!(message.finalized);

    let user = turn.user_save.await.unwrap();
    let assistant = turn.assistant_save.unwrap().await.unwrap();
    assert_eq!(assistant.id, message.id);
    assert_eq!(assistant.function_calls, Some(1));
    assert_eq!(assistant.prompt_strength, result.prompt_strength);
    assert!(assistant.context_used.unwrap().grades > 0);

    let saved = store
        .get_messages(&ActorId::from("me"), &user.conversation_id)
        .await
        .unwrap();
    assert_eq!(saved.len(), 2);

    // User and model entries stay paired for the next request.
    let roles: Vec<_> = session.history().iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![HistoryRole::User, HistoryRole::Model]);
}

#[tokio::test]
async fn stalled_stream_is_abandoned_with_fallback() {
    let base = spawn_gateway(Arc::new(StalledProvider)).await;
    let client =
        GatewayClient::new(base, "t-parent").with_idle_timeout(Duration::from_millis(200));
    let (mut session, _store) = session_for(&client);

    let turn = session.send("Xin chào", |_, _| {}).await.unwrap();
    assert_eq!(turn.result.status, TurnStatus::Abandoned);
    let message = turn.result.message.as_ref().unwrap();
    assert_eq!(message.content, APOLOGY_TEXT);
    assert!(!message.finalized);
    assert!(turn.result.notice.is_some());
    // A failed turn does not feed the model history.
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn rejected_turn_surfaces_status() {
    let base = spawn_gateway(Arc::new(GradesProvider)).await;
    let client = GatewayClient::new(base, "t-teacher");
    let (mut session, _store) = session_for(&client);

    let err = session.send("hello", |_: &Frame, _| {}).await.unwrap_err();
    match err {
        ClientError::Rejected { status, code, .. } => {
            assert_eq!(status, 403);
            assert_eq!(code, "PERMISSION_DENIED");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn empty_message_never_reaches_the_network() {
    let client = GatewayClient::new("http://127.0.0.1:9", "t-parent");
    let (mut session, _store) = session_for(&client);
    let err = session.send("   ", |_, _| {}).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert!(session.persistence().conversation_id().is_none());
}

#[tokio::test]
async fn resume_rejects_foreign_conversation() {
    let base = spawn_gateway(Arc::new(GradesProvider)).await;
    let client = GatewayClient::new(base, "t-parent");
    let store: Arc<dyn ConversationStore> = Arc::new(HttpConversationStore::new(client));
    let err = PersistenceCoordinator::resume(store, ActorId::from("me"), "no-such-id".into())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, guardian_sessions::StoreError::NotFound { .. }));
}
