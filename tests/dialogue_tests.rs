// Transcript assembly and tool-call dispatch.

use anyhow::anyhow;
use serde_json::{json, Value};

use duplex::kernel::tools::{ToolCallDispatcher, ToolCallRequest};
use duplex::kernel::transcript::TranscriptAssembler;
use duplex::Sender;

fn request(id: &str, name: &str, args: Value) -> ToolCallRequest {
    ToolCallRequest { id: id.into(), name: name.into(), args }
}

#[tokio::test]
async fn test_flush_emits_user_then_model() {
    let mut assembler = TranscriptAssembler::new();
    assembler.append_user("hel");
    assembler.append_model("hi ");
    assembler.append_user("lo");
    assembler.append_model("there");

    let entries = assembler.flush_turn();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].sender, Sender::User);
    assert_eq!(entries[0].text, "hello");
    assert_eq!(entries[1].sender, Sender::Model);
    assert_eq!(entries[1].text, "hi there");
    assert!(entries.iter().all(|e| e.is_complete));
    assert_ne!(entries[0].id, entries[1].id);

    assert!(assembler.pending_user().is_empty());
    assert!(assembler.pending_model().is_empty());
}

#[tokio::test]
async fn test_flush_with_only_model_text() {
    let mut assembler = TranscriptAssembler::new();
    assembler.append_model("  just me  ");

    let entries = assembler.flush_turn();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sender, Sender::Model);
    assert_eq!(entries[0].text, "just me");
}

#[tokio::test]
async fn test_flush_with_nothing_or_whitespace() {
    let mut assembler = TranscriptAssembler::new();
    assert!(assembler.flush_turn().is_empty());

    assembler.append_user("   ");
    assembler.append_model("\n");
    assert!(assembler.flush_turn().is_empty());
    assert!(assembler.pending_user().is_empty());
    assert!(assembler.pending_model().is_empty());
}

#[tokio::test]
async fn test_discarded_model_text_never_reaches_a_turn() {
    let mut assembler = TranscriptAssembler::new();
    assembler.append_user("stop");
    assembler.append_model("as I was say");
    assembler.discard_model_buffer();

    let entries = assembler.flush_turn();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sender, Sender::User);
}

#[tokio::test]
async fn test_dispatch_answers_every_request() {
    let mut dispatcher = ToolCallDispatcher::new();
    dispatcher.register_handler("add", |args| {
        let a = args["a"].as_i64().ok_or_else(|| anyhow!("a missing"))?;
        let b = args["b"].as_i64().ok_or_else(|| anyhow!("b missing"))?;
        Ok(json!(a + b))
    });

    let requests = vec![
        request("1", "add", json!({ "a": 2, "b": 3 })),
        request("2", "unknown_fn", json!({})),
        request("3", "add", json!({ "a": 1 })),
        request("4", "also_unknown", Value::Null),
    ];
    let responses = dispatcher.dispatch(&requests);

    // One response per request, correlated by id and in request order.
    assert_eq!(responses.len(), requests.len());
    for (req, resp) in requests.iter().zip(&responses) {
        assert_eq!(req.id, resp.id);
        assert_eq!(req.name, resp.name);
    }

    assert_eq!(responses[0].result, json!(5));
    assert_eq!(responses[1].result, json!({ "error": "Unknown function: unknown_fn" }));
    assert_eq!(responses[2].result, json!({ "error": "b missing" }));
    assert_eq!(responses[3].result, json!({ "error": "Unknown function: also_unknown" }));
}

#[tokio::test]
async fn test_dispatch_of_empty_batch() {
    let dispatcher = ToolCallDispatcher::new();
    assert!(dispatcher.dispatch(&[]).is_empty());
}

#[tokio::test]
async fn test_request_args_default_when_absent() {
    let parsed: ToolCallRequest = serde_json::from_value(json!({ "id": "7", "name": "ping" })).unwrap();
    assert_eq!(parsed.args, Value::Null);

    let mut dispatcher = ToolCallDispatcher::new();
    dispatcher.register_handler("ping", |_| Ok(json!("pong")));
    let responses = dispatcher.dispatch(&[parsed]);
    assert_eq!(responses[0].result, json!("pong"));
}
