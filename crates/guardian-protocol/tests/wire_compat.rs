// Verify the wire format matches what chat clients expect.
// These tests pin the exact JSON shapes of every frame type.

use guardian_protocol::{
    encode, ContextUsed, Frame, FrameDecoder, FunctionResult, ToolResult, TurnRequest,
};

#[test]
fn text_record_layout() {
    let wire = encode(&Frame::text("xin")).unwrap();
    assert_eq!(wire, "data: {\"type\":\"text\",\"data\":\"xin\"}\n\n");
}

#[test]
fn function_results_record_layout() {
    let frame = Frame::FunctionResults(vec![
        FunctionResult {
            name: "getDetailedGrades".into(),
            result: ToolResult::failure("Student Lan not found in your children list"),
        },
        FunctionResult {
            name: "getChildrenList".into(),
            result: ToolResult::success(serde_json::json!({"children": []})),
        },
    ]);
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.starts_with(r#"{"type":"function_results","data":[{"name":"getDetailedGrades""#));
    assert!(json.contains(r#""result":{"error":"Student Lan not found in your children list"}"#));
    assert!(json.contains(r#""result":{"children":[]}"#));
}

#[test]
fn complete_record_layout() {
    let frame = Frame::complete(
        ContextUsed {
            students: 1,
            subjects: 3,
            ..Default::default()
        },
        1,
    );
    let json = serde_json::to_string(&frame).unwrap();
    assert!(json.contains(r#""type":"complete""#));
    assert!(json.contains(r#""functionCalls":1"#));
    assert!(json.contains(r#""contextUsed":{"students":1,"subjects":3"#));
}

#[test]
fn error_record_layout() {
    let json = serde_json::to_string(&Frame::error("model unreachable")).unwrap();
    assert_eq!(json, r#"{"type":"error","data":{"message":"model unreachable"}}"#);
}

#[test]
fn context_used_tolerates_missing_counters() {
    let ctx: ContextUsed = serde_json::from_str(r#"{"students":2}"#).unwrap();
    assert_eq!(ctx.students, 2);
    assert_eq!(ctx.grades, 0);
}

#[test]
fn every_frame_survives_encode_then_decode() {
    let frames = vec![
        Frame::text("Xin "),
        Frame::FunctionResults(vec![FunctionResult {
            name: "getViolations".into(),
            result: ToolResult::success(serde_json::json!({"violations": [{"id": 1}]})),
        }]),
        Frame::text("chào"),
        Frame::complete(ContextUsed::default(), 1),
    ];
    let wire: String = frames.iter().map(|f| encode(f).unwrap()).collect();

    // Feed one byte at a time.
    let mut dec = FrameDecoder::new();
    let mut out = Vec::new();
    for b in wire.as_bytes() {
        for r in dec.push(std::slice::from_ref(b)) {
            out.push(r.unwrap());
        }
    }
    assert_eq!(out, frames);
}

#[test]
fn turn_request_wire_shape() {
    let req: TurnRequest = serde_json::from_str(
        r#"{"message":"Điểm toán của Minh?","history":[{"role":"model","content":"Xin chào"}]}"#,
    )
    .unwrap();
    assert_eq!(req.history.len(), 1);
    let back = serde_json::to_value(&req).unwrap();
    assert_eq!(back["history"][0]["role"], "model");
}
