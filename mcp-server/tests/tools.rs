//! Tool-layer scenarios through the JSON dispatch, the way a client would
//! drive them.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use nts_core::Engine;
use nts_core::EngineConfig;
use nts_mcp_server::tools::handle_tool_call;
use nts_mcp_server::tools::tool_definitions;
use nts_protocol::CallToolResult;
use nts_protocol::ContentBlock;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn engine_in(dir: &TempDir) -> Arc<Engine> {
    Arc::new(Engine::new(EngineConfig::new(dir.path().to_path_buf())))
}

fn text_of(result: &CallToolResult) -> &str {
    match result.content.first() {
        Some(ContentBlock::Text { text }) => text,
        None => "",
    }
}

async fn call(engine: &Arc<Engine>, name: &str, args: serde_json::Value) -> CallToolResult {
    handle_tool_call(engine, name, Some(args)).await
}

/// The token trailer looks like `[NEW TOKEN: LAT:...]`.
fn extract_token(text: &str) -> String {
    let start = text.find("[NEW TOKEN: ").unwrap() + "[NEW TOKEN: ".len();
    let rest = &text[start..];
    let end = rest.find(']').unwrap();
    rest[..end].to_string()
}

#[tokio::test]
async fn init_without_task_id_generates_one() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let result = call(&engine, "nts_init", json!({})).await;
    assert_eq!(result.is_error, None);
    assert!(text_of(&result).contains("created"));
}

#[tokio::test]
async fn edit_without_token_reports_token_required() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("a.txt"), "Content").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t1"})).await;

    let result = call(
        &engine,
        "nts_edit",
        json!({"taskId": "t1", "path": "a.txt", "startLine": 1, "content": "New"}),
    )
    .await;
    assert_eq!(result.is_error, Some(true));
    assert!(text_of(&result).contains("TOKEN_REQUIRED"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "Content"
    );
}

#[tokio::test]
async fn read_edit_cycle_issues_and_rotates_tokens() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("t.txt"), "Original").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t2"})).await;

    let read = call(&engine, "nts_read", json!({"taskId": "t2", "path": "t.txt"})).await;
    let read_text = text_of(&read);
    assert!(read_text.contains("1 | Original"));
    let token = extract_token(read_text);
    assert!(token.starts_with("LAT:"));

    let edit = call(
        &engine,
        "nts_edit",
        json!({
            "taskId": "t2",
            "path": "t.txt",
            "startLine": 1,
            "content": "Modified",
            "accessToken": token,
        }),
    )
    .await;
    assert_eq!(edit.is_error, None, "{}", text_of(&edit));
    let edit_text = text_of(&edit);
    assert!(edit_text.contains("[NEW TOKEN:"));
    assert!(extract_token(edit_text).starts_with("LAT:"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("t.txt")).unwrap(),
        "Modified"
    );

    // Replaying the consumed token fails.
    let replay = call(
        &engine,
        "nts_edit",
        json!({
            "taskId": "t2",
            "path": "t.txt",
            "startLine": 1,
            "content": "Again",
            "accessToken": token,
        }),
    )
    .await;
    assert_eq!(replay.is_error, Some(true));
    assert!(text_of(&replay).contains("TOKEN_STALE"));
}

#[tokio::test]
async fn ambiguous_edit_shape_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("c.txt"), "x").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t3"})).await;

    let result = call(
        &engine,
        "nts_edit",
        json!({
            "taskId": "t3",
            "path": "c.txt",
            "startLine": 1,
            "content": "top-level",
            "operations": [{"startLine": 1, "content": "nested"}],
        }),
    )
    .await;
    assert_eq!(result.is_error, Some(true));
    assert!(text_of(&result).contains("CONFLICT"));
}

#[tokio::test]
async fn move_and_undo_through_the_tools() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("source.txt"), "move me").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t4"})).await;

    let moved = call(
        &engine,
        "nts_move",
        json!({"taskId": "t4", "path": "source.txt", "targetPath": "sub/target.txt"}),
    )
    .await;
    assert_eq!(moved.is_error, None, "{}", text_of(&moved));
    assert!(dir.path().join("sub/target.txt").exists());
    assert!(!dir.path().join("source.txt").exists());

    let undo = call(&engine, "nts_undo", json!({"taskId": "t4"})).await;
    assert_eq!(undo.is_error, None, "{}", text_of(&undo));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("source.txt")).unwrap(),
        "move me"
    );
    assert!(!dir.path().join("sub/target.txt").exists());
}

#[tokio::test]
async fn redo_after_fresh_edit_reports_nothing_to_redo() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("r.txt"), "init").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t5"})).await;

    let token = extract_token(text_of(
        &call(&engine, "nts_read", json!({"taskId": "t5", "path": "r.txt"})).await,
    ));
    call(
        &engine,
        "nts_edit",
        json!({"taskId": "t5", "path": "r.txt", "startLine": 1, "content": "A", "accessToken": token}),
    )
    .await;
    call(&engine, "nts_undo", json!({"taskId": "t5"})).await;

    let token = extract_token(text_of(
        &call(&engine, "nts_read", json!({"taskId": "t5", "path": "r.txt"})).await,
    ));
    call(
        &engine,
        "nts_edit",
        json!({"taskId": "t5", "path": "r.txt", "startLine": 1, "content": "B", "accessToken": token}),
    )
    .await;

    let redo = call(&engine, "nts_redo", json!({"taskId": "t5"})).await;
    assert!(text_of(&redo).contains("No operations to redo"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("r.txt")).unwrap(),
        "B"
    );
}

#[tokio::test]
async fn checkpoint_and_rollback_tools() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("check.txt"), "initial").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t6"})).await;

    call(&engine, "nts_checkpoint", json!({"taskId": "t6", "name": "A"})).await;
    let token = extract_token(text_of(
        &call(&engine, "nts_read", json!({"taskId": "t6", "path": "check.txt"})).await,
    ));
    call(
        &engine,
        "nts_edit",
        json!({"taskId": "t6", "path": "check.txt", "startLine": 1, "content": "modified", "accessToken": token}),
    )
    .await;

    let rollback = call(
        &engine,
        "nts_rollback",
        json!({"taskId": "t6", "name": "A"}),
    )
    .await;
    assert_eq!(rollback.is_error, None, "{}", text_of(&rollback));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("check.txt")).unwrap(),
        "initial"
    );

    let missing = call(
        &engine,
        "nts_rollback",
        json!({"taskId": "t6", "name": "ghost"}),
    )
    .await;
    assert_eq!(missing.is_error, Some(true));
    assert!(text_of(&missing).contains("CHECKPOINT_NOT_FOUND"));
}

#[tokio::test]
async fn path_escape_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    call(&engine, "nts_init", json!({"taskId": "t7"})).await;
    let result = call(
        &engine,
        "nts_read",
        json!({"taskId": "t7", "path": "../../etc/passwd"}),
    )
    .await;
    assert_eq!(result.is_error, Some(true));
    let text = text_of(&result);
    assert!(
        text.contains("PATH_ESCAPE") || text.contains("NOT_FOUND"),
        "unexpected: {text}"
    );
}

#[tokio::test]
async fn binary_file_read_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    std::fs::write(dir.path().join("bin.dat"), b"\x00\x01").unwrap();
    call(&engine, "nts_init", json!({"taskId": "t8"})).await;
    let result = call(
        &engine,
        "nts_read",
        json!({"taskId": "t8", "path": "bin.dat"}),
    )
    .await;
    assert_eq!(result.is_error, Some(true));
    assert!(text_of(&result).contains("BINARY"));
}

#[tokio::test]
async fn exec_completes_and_times_out() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    call(&engine, "nts_init", json!({"taskId": "t9"})).await;

    let quick = call(
        &engine,
        "nts_exec",
        json!({"taskId": "t9", "command": ["sh", "-c", "echo hi"], "timeoutMs": 5000}),
    )
    .await;
    assert_eq!(quick.is_error, None, "{}", text_of(&quick));
    assert!(text_of(&quick).contains("hi"));

    let slow = call(
        &engine,
        "nts_exec",
        json!({"taskId": "t9", "command": ["sh", "-c", "sleep 0.3"], "timeoutMs": 20}),
    )
    .await;
    assert_eq!(slow.is_error, Some(true));
    let text = text_of(&slow).to_string();
    assert!(text.contains("TIMEOUT"), "unexpected: {text}");

    // The handle id in the message can be polled.
    let handle_id = text.rsplit(' ').next().unwrap().trim().to_string();
    let poll = call(
        &engine,
        "nts_exec",
        json!({"taskId": "t9", "handleId": handle_id}),
    )
    .await;
    assert_eq!(poll.is_error, None, "{}", text_of(&poll));
}

#[tokio::test]
async fn todo_plans_round_trip() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    call(&engine, "nts_init", json!({"taskId": "t10"})).await;

    let saved = call(
        &engine,
        "nts_todo",
        json!({
            "taskId": "t10",
            "name": "rollout",
            "steps": [
                {"step": "read the adapter", "status": "completed"},
                {"step": "port the handlers", "status": "in_progress"},
            ],
        }),
    )
    .await;
    assert_eq!(saved.is_error, None, "{}", text_of(&saved));

    let listed = call(&engine, "nts_todo", json!({"taskId": "t10"})).await;
    assert!(text_of(&listed).contains("rollout"));
    assert!(text_of(&listed).contains("Active: rollout"));

    let loaded = call(
        &engine,
        "nts_todo",
        json!({"taskId": "t10", "name": "rollout"}),
    )
    .await;
    assert!(text_of(&loaded).contains("port the handlers"));
}

#[test]
fn tool_table_is_complete() {
    let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
    for expected in [
        "nts_init",
        "nts_read",
        "nts_edit",
        "nts_create",
        "nts_delete",
        "nts_move",
        "nts_undo",
        "nts_redo",
        "nts_checkpoint",
        "nts_rollback",
        "nts_history",
        "nts_symbols",
        "nts_references",
        "nts_refactor",
        "nts_exec",
        "nts_todo",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }
}
