//! Tool handlers: thin JSON adapters over the core's operations.
//!
//! Every handler resolves the task context, sanitises paths against the
//! configured roots, and renders a single text content block. Error
//! messages are one line; the kind tag at the front is the machine-readable
//! part.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use nts_core::Engine;
use nts_core::NtsError;
use nts_core::error::Result;
use nts_core::exec::BackgroundStatus;
use nts_core::exec::ExecOutcome;
use nts_core::journal::Stack;
use nts_core::ops;
use nts_core::refactor;
use nts_core::refactor::RefactorAction;
use nts_core::refactor::RefactorParams;
use nts_core::symbols::ReferenceScope;
use nts_core::tasks::TaskContext;
use nts_core::todo;
use nts_protocol::CallToolResult;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

pub async fn handle_tool_call(
    engine: &Arc<Engine>,
    name: &str,
    arguments: Option<Value>,
) -> CallToolResult {
    debug!(tool = name, "tools/call");
    let outcome = match name {
        "nts_init" => tool_init(engine, arguments),
        "nts_read" => tool_read(engine, arguments),
        "nts_edit" => tool_edit(engine, arguments),
        "nts_create" => tool_create(engine, arguments),
        "nts_delete" => tool_delete(engine, arguments),
        "nts_move" => tool_move(engine, arguments),
        "nts_undo" => tool_undo(engine, arguments),
        "nts_redo" => tool_redo(engine, arguments),
        "nts_checkpoint" => tool_checkpoint(engine, arguments),
        "nts_rollback" => tool_rollback(engine, arguments),
        "nts_history" => tool_history(engine, arguments),
        "nts_symbols" => tool_symbols(engine, arguments),
        "nts_references" => tool_references(engine, arguments),
        "nts_refactor" => tool_refactor(engine, arguments),
        "nts_exec" => tool_exec(engine, arguments).await,
        "nts_todo" => tool_todo(engine, arguments),
        other => Err(NtsError::InvalidArgument(format!("unknown tool '{other}'"))),
    };
    match outcome {
        Ok(text) => CallToolResult::text(text),
        Err(err) => CallToolResult::error(err.to_string()),
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T> {
    let value = arguments.unwrap_or_else(|| json!({}));
    serde_json::from_value(value)
        .map_err(|e| NtsError::InvalidArgument(format!("bad tool arguments: {e}")))
}

fn task_for(engine: &Engine, task_id: &str) -> Result<Arc<TaskContext>> {
    let (context, _) = engine.task(Some(task_id))?;
    Ok(context)
}

fn sanitize(engine: &Engine, raw: &str, must_exist: bool) -> Result<PathBuf> {
    engine.paths.sanitize(Path::new(raw), must_exist)
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitArgs {
    #[serde(default)]
    task_id: Option<String>,
}

fn tool_init(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: InitArgs = parse_args(arguments)?;
    let (context, summary) = engine.task(args.task_id.as_deref())?;
    context.save_journal()?;
    Ok(format!(
        "Task {} {}.\n{}",
        summary.task_id,
        if summary.reactivated {
            "reactivated from journal"
        } else {
            "created"
        },
        serde_json::to_string_pretty(&summary)?
    ))
}

// ---------------------------------------------------------------------------
// read / edit / create / delete / move
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathArgs {
    task_id: String,
    path: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    target_path: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

fn tool_read(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: PathArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, true)?;
    let fallback = engine.config().fallback_encoding;

    let mut state = task.lock();
    let outcome = ops::read_file(&mut state, &path, fallback)?;
    drop(state);

    let mut text = String::new();
    if let Some(entry) = outcome.external_entry {
        text.push_str(&format!(
            "Note: external modification detected and journaled (entry {entry}).\n\n"
        ));
    }
    for (index, line) in outcome.content.lines().enumerate() {
        text.push_str(&format!("{:>6} | {line}\n", index + 1));
    }
    text.push_str(&format!(
        "\n{} lines, charset {}.\n[NEW TOKEN: {}]",
        outcome.total_lines, outcome.charset, outcome.token
    ));
    Ok(text)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditOpArg {
    start_line: usize,
    #[serde(default)]
    end_line: Option<usize>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditArgs {
    task_id: String,
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    operations: Option<Vec<EditOpArg>>,
}

fn tool_edit(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: EditArgs = parse_args(arguments)?;
    if args.content.is_some() && args.operations.is_some() {
        return Err(NtsError::InvalidArgument(
            "CONFLICT: ambiguous edit shape (both content and operations given)".to_string(),
        ));
    }
    let ops_list: Vec<ops::EditOp> = match (&args.operations, args.start_line) {
        (Some(operations), _) => operations
            .iter()
            .map(|op| ops::EditOp {
                start_line: op.start_line,
                end_line: op.end_line.unwrap_or(op.start_line),
                content: op.content.clone(),
            })
            .collect(),
        (None, Some(start_line)) => vec![ops::EditOp {
            start_line,
            end_line: args.end_line.unwrap_or(start_line),
            content: args.content.clone(),
        }],
        (None, None) => {
            return Err(NtsError::InvalidArgument(
                "provide startLine (+content) or an operations array".to_string(),
            ));
        }
    };

    let task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, true)?;
    let fallback = engine.config().fallback_encoding;

    let mut state = task.lock();
    let outcome = ops::edit_file(
        &mut state,
        &path,
        &ops_list,
        args.access_token.as_deref(),
        fallback,
    )?;
    drop(state);
    engine.symbols.invalidate(&path);

    match (outcome.changed, outcome.new_token) {
        (true, Some(token)) => Ok(format!(
            "Edited {} (transaction {}).\n[NEW TOKEN: {token}]",
            path.display(),
            outcome
                .transaction_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
        )),
        _ => Ok(format!(
            "No changes applied to {} (content identical).",
            path.display()
        )),
    }
}

fn tool_create(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: PathArgs = parse_args(arguments)?;
    let content = args.content.clone().ok_or_else(|| {
        NtsError::InvalidArgument("missing required field 'content'".to_string())
    })?;
    let task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, false)?;

    let mut state = task.lock();
    let outcome = ops::create_file(&mut state, &path, &content)?;
    drop(state);
    engine.symbols.invalidate(&path);

    Ok(format!(
        "Created {} (transaction {}).\n[NEW TOKEN: {}]",
        path.display(),
        outcome
            .transaction_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        outcome.new_token.unwrap_or_default(),
    ))
}

fn tool_delete(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: PathArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, true)?;
    let fallback = engine.config().fallback_encoding;

    let mut state = task.lock();
    let outcome = ops::delete_file(&mut state, &path, args.access_token.as_deref(), fallback)?;
    drop(state);
    engine.symbols.invalidate(&path);

    Ok(format!(
        "Deleted {} (transaction {}).",
        path.display(),
        outcome
            .transaction_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ))
}

fn tool_move(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: PathArgs = parse_args(arguments)?;
    let target_raw = args.target_path.clone().ok_or_else(|| {
        NtsError::InvalidArgument("missing required field 'targetPath'".to_string())
    })?;
    let task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, true)?;
    let target = sanitize(engine, &target_raw, false)?;

    let mut state = task.lock();
    let outcome = ops::move_file(&mut state, &path, &target)?;
    drop(state);
    engine.symbols.invalidate(&path);
    engine.symbols.invalidate(&target);

    Ok(format!(
        "Moved {} -> {} (transaction {}). Existing tokens remain valid.",
        path.display(),
        target.display(),
        outcome
            .transaction_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ))
}

// ---------------------------------------------------------------------------
// undo / redo / checkpoints / history
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskArgs {
    task_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

fn tool_undo(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: TaskArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;
    let root = engine.paths.primary_root();

    let mut state = task.lock();
    let outcome = state.smart_undo(&root)?;
    drop(state);
    for path in &outcome.restored {
        engine.symbols.invalidate(Path::new(path));
    }

    let mut text = if outcome.stuck {
        format!(
            "PARTIAL_UNDO of '{}' (entry {} marked STUCK).\n",
            outcome.description.as_deref().unwrap_or("transaction"),
            outcome.entry_id
        )
    } else {
        format!(
            "Undid '{}' (entry {}).\n",
            outcome.description.as_deref().unwrap_or("transaction"),
            outcome.entry_id
        )
    };
    if !outcome.restored.is_empty() {
        text.push_str(&format!("Restored: {}\n", outcome.restored.join(", ")));
    }
    for skipped in &outcome.skipped {
        text.push_str(&format!("Skipped {}: {}\n", skipped.path, skipped.reason));
    }
    if let Some(hint) = &outcome.git_hint {
        text.push_str(&format!("Hint: {hint}\n"));
    }
    Ok(text.trim_end().to_string())
}

fn tool_redo(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: TaskArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;

    let mut state = task.lock();
    let outcome = state.redo()?;
    drop(state);
    for path in &outcome.restored {
        engine.symbols.invalidate(Path::new(path));
    }

    if outcome.stuck {
        Ok(format!(
            "Redo of entry {} could not be applied (marked STUCK).",
            outcome.entry_id
        ))
    } else {
        Ok(format!(
            "Redid '{}' (entry {}). Files: {}",
            outcome.description.as_deref().unwrap_or("transaction"),
            outcome.entry_id,
            outcome.restored.join(", ")
        ))
    }
}

fn tool_checkpoint(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: TaskArgs = parse_args(arguments)?;
    let name = args
        .name
        .ok_or_else(|| NtsError::InvalidArgument("missing required field 'name'".to_string()))?;
    let task = task_for(engine, &args.task_id)?;
    let mut state = task.lock();
    let id = state.create_checkpoint(&name)?;
    Ok(format!("Checkpoint '{name}' created (entry {id})."))
}

fn tool_rollback(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: TaskArgs = parse_args(arguments)?;
    let name = args
        .name
        .ok_or_else(|| NtsError::InvalidArgument("missing required field 'name'".to_string()))?;
    let task = task_for(engine, &args.task_id)?;

    let mut state = task.lock();
    let restored = state.rollback_to_checkpoint(&name)?;
    drop(state);
    for path in &restored {
        engine.symbols.invalidate(Path::new(path));
    }
    Ok(format!(
        "Rolled back to checkpoint '{name}'. Restored: {}",
        if restored.is_empty() {
            "(nothing to restore)".to_string()
        } else {
            restored.join(", ")
        }
    ))
}

fn tool_history(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: TaskArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;
    let state = task.lock();
    let entries = match &args.path {
        Some(raw) => {
            let path = sanitize(engine, raw, false)?;
            state
                .journal
                .get_entries_for_file(&path.to_string_lossy())?
        }
        None => state.journal.get_all_entries()?,
    };
    let undo_count = state.journal.count_entries(Stack::Undo)?;
    let redo_count = state.journal.count_entries(Stack::Redo)?;
    drop(state);

    let mut text = format!("{undo_count} undo / {redo_count} redo entries.\n");
    for entry in entries {
        text.push_str(&format!(
            "[{} #{:>3}] {:<11} {} {}\n",
            entry.stack.as_str(),
            entry.position,
            entry.entry_type.as_str(),
            entry.description.as_deref().unwrap_or("-"),
            entry.status.as_deref().unwrap_or(""),
        ));
    }
    Ok(text.trim_end().to_string())
}

// ---------------------------------------------------------------------------
// symbols / references / refactor
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolArgs {
    task_id: String,
    path: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default)]
    scope: Option<ReferenceScope>,
    #[serde(default)]
    include_definition: Option<bool>,
}

fn tool_symbols(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: SymbolArgs = parse_args(arguments)?;
    let _task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, true)?;
    let symbols = match (args.line, args.column) {
        (Some(line), Some(column)) => engine.symbols.symbols_at(&path, line, column)?,
        _ => engine.symbols.list_symbols(&path)?,
    };
    Ok(serde_json::to_string_pretty(&symbols)?)
}

fn tool_references(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: SymbolArgs = parse_args(arguments)?;
    let _task = task_for(engine, &args.task_id)?;
    let path = sanitize(engine, &args.path, true)?;
    let (line, column) = match (args.line, args.column) {
        (Some(line), Some(column)) => (line, column),
        _ => {
            return Err(NtsError::InvalidArgument(
                "line and column are required".to_string(),
            ));
        }
    };
    let references = engine.symbols.find_references(
        &engine.paths.roots(),
        &path,
        line,
        column,
        args.scope.unwrap_or_default(),
        args.include_definition.unwrap_or(true),
    )?;
    Ok(serde_json::to_string_pretty(&references)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchStepArgs {
    action: RefactorAction,
    #[serde(flatten)]
    params: RefactorParams,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefactorArgs {
    task_id: String,
    action: RefactorAction,
    #[serde(default)]
    preview: bool,
    #[serde(flatten)]
    params: RefactorParams,
    #[serde(default)]
    operations: Option<Vec<BatchStepArgs>>,
}

fn tool_refactor(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: RefactorArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;
    let roots = engine.paths.roots();
    let operations: Option<Vec<(RefactorAction, RefactorParams)>> = args
        .operations
        .map(|steps| steps.into_iter().map(|s| (s.action, s.params)).collect());

    let mut state = task.lock();
    let result = refactor::run(
        &engine.symbols,
        &roots,
        &mut state,
        args.action,
        &args.params,
        operations.as_deref(),
        !args.preview,
    )?;

    // Executed refactors hand back fresh full-file tokens so the agent can
    // keep editing without re-reading everything.
    let mut token_lines = String::new();
    if result.transaction_id.is_some() {
        for change in &result.changes {
            let path = PathBuf::from(&change.path);
            if let Ok(content) = std::fs::read_to_string(&path) {
                let token = state.tokens.register_full_access(
                    &path.to_string_lossy(),
                    &content,
                    chrono_now_ms(),
                )?;
                token_lines.push_str(&format!("[NEW TOKEN: {} {}]\n", change.path, token));
            }
        }
    }
    drop(state);

    Ok(format!(
        "{}\n{}",
        serde_json::to_string_pretty(&result)?,
        token_lines.trim_end()
    )
    .trim_end()
    .to_string())
}

fn chrono_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// exec / todo
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecArgs {
    task_id: String,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    handle_id: Option<String>,
}

async fn tool_exec(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: ExecArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;

    if let Some(handle_id) = &args.handle_id {
        let state = task.lock();
        let status = state.background.poll(handle_id);
        drop(state);
        return match status {
            Some(BackgroundStatus::Running) => {
                Ok(format!("Handle {handle_id} is still running."))
            }
            Some(BackgroundStatus::Finished(output)) => Ok(format!(
                "Handle {handle_id} finished (exit {}).\nstdout:\n{}\nstderr:\n{}",
                output.exit_code, output.stdout, output.stderr
            )),
            None => Err(NtsError::InvalidArgument(format!(
                "no background command with handle '{handle_id}'"
            ))),
        };
    }

    let command = args.command.ok_or_else(|| {
        NtsError::InvalidArgument("missing required field 'command'".to_string())
    })?;
    let timeout_ms = args.timeout_ms.ok_or_else(|| {
        NtsError::InvalidArgument("timeoutMs is mandatory for command execution".to_string())
    })?;
    let cwd = engine.paths.primary_root();

    match nts_core::exec::run_command(&command, &cwd, timeout_ms).await? {
        ExecOutcome::Completed(output) => Ok(format!(
            "exit {} in {} ms\nstdout:\n{}\nstderr:\n{}",
            output.exit_code, output.duration_ms, output.stdout, output.stderr
        )),
        ExecOutcome::TimedOut(handle) => {
            let mut state = task.lock();
            let handle_id = state.background.register(handle);
            drop(state);
            Err(NtsError::Timeout { handle_id })
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodoArgs {
    task_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    steps: Option<Vec<todo::TodoStep>>,
    #[serde(default)]
    set_active: Option<bool>,
}

fn tool_todo(engine: &Engine, arguments: Option<Value>) -> Result<String> {
    let args: TodoArgs = parse_args(arguments)?;
    let task = task_for(engine, &args.task_id)?;
    let todos_dir = task.todos_dir();

    match (args.name, args.steps) {
        (Some(name), Some(steps)) => {
            let plan = todo::TodoPlan {
                name: name.clone(),
                steps,
            };
            todo::save_plan(&todos_dir, &plan)?;
            if args.set_active.unwrap_or(true) {
                let mut state = task.lock();
                state.meta.active_todo = Some(name.clone());
                drop(state);
                task.save_journal()?;
            }
            Ok(format!("Todo plan '{name}' saved."))
        }
        (Some(name), None) => {
            let plan = todo::load_plan(&todos_dir, &name)?;
            Ok(serde_json::to_string_pretty(&plan)?)
        }
        (None, _) => {
            let names = todo::list_plans(&todos_dir)?;
            let active = task.lock().meta.active_todo.clone();
            Ok(format!(
                "Plans: {}\nActive: {}",
                if names.is_empty() {
                    "(none)".to_string()
                } else {
                    names.join(", ")
                },
                active.unwrap_or_else(|| "(none)".to_string())
            ))
        }
    }
}
