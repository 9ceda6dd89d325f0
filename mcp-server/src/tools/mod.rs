//! The tool table: names, descriptions, and input schemas the server
//! advertises through `tools/list`, plus the dispatch into handlers.

mod handlers;
mod schema;

pub use handlers::handle_tool_call;

use nts_protocol::Tool;

use schema::JsonSchema;
use schema::object;

pub fn tool_definitions() -> Vec<Tool> {
    let task_id = ("taskId", JsonSchema::String);
    vec![
        Tool {
            name: "nts_init".to_string(),
            description: Some(
                "Create or reactivate a task context. The only tool that may be called \
                 without a taskId; returns the id to use for every other call."
                    .to_string(),
            ),
            input_schema: object(&[("taskId", JsonSchema::String)], &[]),
        },
        Tool {
            name: "nts_read".to_string(),
            description: Some(
                "Read a text file with line numbers and obtain a line access token for \
                 editing it."
                    .to_string(),
            ),
            input_schema: object(
                &[task_id.clone(), ("path", JsonSchema::String)],
                &["taskId", "path"],
            ),
        },
        Tool {
            name: "nts_edit".to_string(),
            description: Some(
                "Edit a file by line range. Requires the access token from nts_read. \
                 Either pass startLine/endLine/content, or an operations array; omitting \
                 content in an operation deletes the range. A fresh token is returned."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("path", JsonSchema::String),
                    ("startLine", JsonSchema::Integer),
                    ("endLine", JsonSchema::Integer),
                    ("content", JsonSchema::String),
                    ("accessToken", JsonSchema::String),
                    (
                        "operations",
                        JsonSchema::Array {
                            items: Box::new(JsonSchema::Any),
                        },
                    ),
                ],
                &["taskId", "path"],
            ),
        },
        Tool {
            name: "nts_create".to_string(),
            description: Some("Create a new file inside a transaction.".to_string()),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("path", JsonSchema::String),
                    ("content", JsonSchema::String),
                ],
                &["taskId", "path", "content"],
            ),
        },
        Tool {
            name: "nts_delete".to_string(),
            description: Some(
                "Delete a file. Requires a token covering the whole file.".to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("path", JsonSchema::String),
                    ("accessToken", JsonSchema::String),
                ],
                &["taskId", "path"],
            ),
        },
        Tool {
            name: "nts_move".to_string(),
            description: Some(
                "Move or rename a file; previously issued tokens stay valid at the new \
                 location."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("path", JsonSchema::String),
                    ("targetPath", JsonSchema::String),
                ],
                &["taskId", "path", "targetPath"],
            ),
        },
        Tool {
            name: "nts_undo".to_string(),
            description: Some(
                "Smart Undo: revert the most recent transaction, following renames and \
                 degrading to a partial restore when the tree changed underneath."
                    .to_string(),
            ),
            input_schema: object(&[task_id.clone()], &["taskId"]),
        },
        Tool {
            name: "nts_redo".to_string(),
            description: Some("Re-apply the most recently undone transaction.".to_string()),
            input_schema: object(&[task_id.clone()], &["taskId"]),
        },
        Tool {
            name: "nts_checkpoint".to_string(),
            description: Some("Create a named checkpoint in the journal.".to_string()),
            input_schema: object(
                &[task_id.clone(), ("name", JsonSchema::String)],
                &["taskId", "name"],
            ),
        },
        Tool {
            name: "nts_rollback".to_string(),
            description: Some(
                "Roll back every transaction above the named checkpoint.".to_string(),
            ),
            input_schema: object(
                &[task_id.clone(), ("name", JsonSchema::String)],
                &["taskId", "name"],
            ),
        },
        Tool {
            name: "nts_history".to_string(),
            description: Some(
                "List journal entries (both stacks, fused by time), optionally filtered \
                 to one file."
                    .to_string(),
            ),
            input_schema: object(
                &[task_id.clone(), ("path", JsonSchema::String)],
                &["taskId"],
            ),
        },
        Tool {
            name: "nts_symbols".to_string(),
            description: Some(
                "List symbol definitions in a file, or the definitions containing a \
                 line/column point."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("path", JsonSchema::String),
                    ("line", JsonSchema::Integer),
                    ("column", JsonSchema::Integer),
                ],
                &["taskId", "path"],
            ),
        },
        Tool {
            name: "nts_references".to_string(),
            description: Some(
                "Find references to the identifier at a position. Scope is file, \
                 directory, or project."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("path", JsonSchema::String),
                    ("line", JsonSchema::Integer),
                    ("column", JsonSchema::Integer),
                    ("scope", JsonSchema::String),
                    ("includeDefinition", JsonSchema::Boolean),
                ],
                &["taskId", "path", "line", "column"],
            ),
        },
        Tool {
            name: "nts_refactor".to_string(),
            description: Some(
                "Run a named refactoring (rename, generate, delete, wrap, \
                 extract_method, inline, change_signature, move, batch). Set \
                 preview=true to compute the result without touching disk."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("action", JsonSchema::String),
                    ("preview", JsonSchema::Boolean),
                    ("path", JsonSchema::String),
                    ("symbol", JsonSchema::String),
                    ("line", JsonSchema::Integer),
                    ("column", JsonSchema::Integer),
                    ("newName", JsonSchema::String),
                    ("scope", JsonSchema::String),
                    (
                        "operations",
                        JsonSchema::Array {
                            items: Box::new(JsonSchema::Any),
                        },
                    ),
                ],
                &["taskId", "action"],
            ),
        },
        Tool {
            name: "nts_exec".to_string(),
            description: Some(
                "Run an external command with a mandatory timeout. On expiry the \
                 command keeps running and a handle id is returned for polling via \
                 handleId."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    (
                        "command",
                        JsonSchema::Array {
                            items: Box::new(JsonSchema::String),
                        },
                    ),
                    ("timeoutMs", JsonSchema::Integer),
                    ("handleId", JsonSchema::String),
                ],
                &["taskId"],
            ),
        },
        Tool {
            name: "nts_todo".to_string(),
            description: Some(
                "Read or write the task's markdown todo plans; optionally set the \
                 active plan."
                    .to_string(),
            ),
            input_schema: object(
                &[
                    task_id.clone(),
                    ("name", JsonSchema::String),
                    (
                        "steps",
                        JsonSchema::Array {
                            items: Box::new(JsonSchema::Any),
                        },
                    ),
                    ("setActive", JsonSchema::Boolean),
                ],
                &["taskId"],
            ),
        },
    ]
}
