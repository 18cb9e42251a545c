use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use guardian_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};
use guardian_agent::{Dispatcher, PromptBuilder, TurnOrchestrator, TurnSettings};
use guardian_core::config::{GuardianConfig, TokenEntry};
use guardian_core::types::{ActorId, ActorRole};
use guardian_gateway::auth::StaticTokenResolver;
use guardian_gateway::{build_router, AppState};
use guardian_protocol::{Frame, FrameDecoder};
use guardian_records::{db, SqliteRecordStore};
use guardian_sessions::SqliteConversationStore;
use tower::ServiceExt;

/// Asks for the children list on the first call, then answers.
struct TwoStepProvider;

#[async_trait]
impl LlmProvider for TwoStepProvider {
    fn name(&self) -> &str {
        "two-step"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let tool_calls = if req.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolCall {
                id: "call_0".into(),
                name: "getChildrenList".into(),
                input: serde_json::json!({}),
            }]
        };
        let content = if tool_calls.is_empty() {
            "Bạn có hai con: Lan và Minh.".to_string()
        } else {
            String::new()
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

fn state() -> Arc<AppState> {
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
            token: "t-other".into(),
            actor_id: "parent-other".into(),
            role: ActorRole::Parent,
        },
        TokenEntry {
            token: "t-teacher".into(),
            actor_id: "teacher-1".into(),
            role: ActorRole::Teacher,
        },
    ];

    let orchestrator = TurnOrchestrator::new(
        Arc::new(TwoStepProvider),
        Dispatcher::new(Arc::new(records)),
        PromptBuilder::default(),
        TurnSettings::default(),
    );
    let resolver = StaticTokenResolver::from_config(&config.auth);
    Arc::new(AppState::new(
        config,
        orchestrator,
        Arc::new(resolver),
        Arc::new(conversations),
    ))
}

fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let resp = build_router(state()).oneshot(get("/health", "x")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_turns"], 0);
}

#[tokio::test]
async fn chat_rejects_before_streaming() {
    let router = build_router(state());
    let body = r#"{"message":"hi"}"#;

    let resp = router.clone().oneshot(post("/api/chat", None, body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = router.clone().oneshot(post("/api/chat", Some("bogus"), body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = router.clone().oneshot(post("/api/chat", Some("t-teacher"), body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["code"], "PERMISSION_DENIED");

    let resp = router
        .clone()
        .oneshot(post("/api/chat", Some("t-parent"), r#"{"message":"   "}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = router
        .oneshot(post("/api/chat", Some("t-parent"), r#"{"msg":1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_streams_frames_in_order() {
    let resp = build_router(state())
        .oneshot(post("/api/chat", Some("t-parent"), r#"{"message":"Tôi có mấy con?","history":[]}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");

    let bytes = body_bytes(resp).await;
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.starts_with("data: "));

    let mut decoder = FrameDecoder::default();
    let frames: Vec<Frame> = decoder
        .push(&bytes)
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    let kinds: Vec<&str> = frames.iter().map(Frame::kind).collect();
    assert_eq!(kinds, vec!["function_results", "text", "complete"]);
    let Frame::Complete(done) = &frames[2] else {
        panic!("last frame should be complete");
    };
    assert_eq!(done.function_calls, 1);
    assert_eq!(done.context_used.students, 2);
}

#[tokio::test]
async fn second_concurrent_turn_is_rejected() {
    let st = state();
    let _slot = st.begin_turn(&ActorId::from("parent-demo")).unwrap();
    let resp = build_router(st.clone())
        .oneshot(post("/api/chat", Some("t-parent"), r#"{"message":"hi"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["code"], "TURN_IN_PROGRESS");

    // Another actor is unaffected by the held slot.
    let resp = build_router(st)
        .oneshot(post("/api/chat", Some("t-other"), r#"{"message":"hi"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn conversation_round_trip_is_scoped_to_owner() {
    let router = build_router(state());

    let resp = router
        .clone()
        .oneshot(post("/api/conversations", Some("t-parent"), ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let conv = body_json(resp).await;
    let id = conv["id"].as_str().unwrap().to_string();
    let uri = format!("/api/conversations/{id}/messages");

    let bad = r#"{"id":"m-0","role":"user","content":"x","createdAt":"not a time"}"#;
    let resp = router.clone().oneshot(post(&uri, Some("t-parent"), bad)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], "INVALID_REQUEST");

    // 16:00 at +07:00 is 09:00 UTC, before the assistant reply.
    let user = r#"{"id":"m-1","role":"user","content":"Minh học thế nào?","createdAt":"2026-10-18T16:00:00+07:00"}"#;
    let asst = r#"{"id":"m-2","role":"assistant","content":"Minh học tốt.","contextUsed":{"students":1,"grades":4},"functionCalls":1,"promptStrength":0.58,"createdAt":"2026-10-18T10:00:02+00:00"}"#;
    for body in [asst, user] {
        let resp = router.clone().oneshot(post(&uri, Some("t-parent"), body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let resp = router.clone().oneshot(get(&uri, "t-parent")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let msgs = body_json(resp).await;
    assert_eq!(msgs.as_array().unwrap().len(), 2);
    assert_eq!(msgs[0]["id"], "m-1");
    assert_eq!(msgs[0]["createdAt"], "2026-10-18T09:00:00.000000Z");
    assert_eq!(msgs[1]["id"], "m-2");
    assert_eq!(msgs[1]["contextUsed"]["grades"], 4);

    let resp = router.clone().oneshot(get(&uri, "t-other")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let single = format!("/api/conversations/{id}");
    let resp = router.clone().oneshot(get(&single, "t-parent")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = router.clone().oneshot(get(&single, "t-other")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["code"], "CONVERSATION_NOT_FOUND");

    let resp = router.oneshot(get("/api/conversations", "t-parent")).await.unwrap();
    let list = body_json(resp).await;
    assert_eq!(list[0]["title"], "Minh học thế nào?");
}
