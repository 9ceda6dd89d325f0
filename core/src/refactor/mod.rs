//! Named refactoring operations composing the symbol engine, the
//! transaction manager, and the token set.
//!
//! Every operation has two entry points: `preview` computes a result without
//! touching disk or opening a transaction; `execute` wraps the same plan in
//! begin/backup/commit (rollback on any error) and reports the resulting
//! transaction id.

mod delete;
mod extract;
mod generate;
mod inline;
mod move_symbol;
mod rename;
mod signature;
mod wrap;

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::crc::crc32c_bytes;
use crate::diff::unified_diff;
use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::ReferenceScope;
use crate::symbols::SymbolEngine;
use crate::symbols::SymbolKind;
use crate::tasks::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactorAction {
    Rename,
    Generate,
    Delete,
    Wrap,
    ExtractMethod,
    Inline,
    ChangeSignature,
    Move,
    Batch,
}

impl RefactorAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RefactorAction::Rename => "rename",
            RefactorAction::Generate => "generate",
            RefactorAction::Delete => "delete",
            RefactorAction::Wrap => "wrap",
            RefactorAction::ExtractMethod => "extract_method",
            RefactorAction::Inline => "inline",
            RefactorAction::ChangeSignature => "change_signature",
            RefactorAction::Move => "move",
            RefactorAction::Batch => "batch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateWhat {
    Getter,
    Setter,
    Accessors,
    Constructor,
    Builder,
    EqualsHashcode,
    ToString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    Error,
    Comment,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapKind {
    TryCatch,
    TryFinally,
    TryWithResources,
    If,
    IfElse,
    For,
    Foreach,
    While,
    Synchronized,
    Custom,
}

/// One parameter of a `change_signature` request. Entries are declarative:
/// each must appear in the final signature at its ordinal position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactorParams {
    pub path: Option<String>,
    pub symbol: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub new_name: Option<String>,
    #[serde(default)]
    pub scope: Option<ReferenceScope>,
    pub kind: Option<SymbolKind>,
    #[serde(default)]
    pub hybrid_mode: Option<bool>,
    #[serde(default)]
    pub include_text_matches: Option<bool>,
    pub what: Option<GenerateWhat>,
    pub fields: Option<Vec<String>>,
    pub handle_references: Option<ReferencePolicy>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub code_pattern: Option<String>,
    pub wrapper: Option<WrapKind>,
    pub method_name: Option<String>,
    pub access_modifier: Option<String>,
    pub return_type: Option<String>,
    pub parameters: Option<Vec<ParamSpec>>,
    pub target_path: Option<String>,
    pub target_class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Semantic,
    TextOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactorStatus {
    Success,
    Preview,
    Error,
    NoChanges,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetail {
    pub line: usize,
    pub before: String,
    pub after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub occurrences: usize,
    pub details: Vec<ChangeDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_crc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_line_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefactoringResult {
    pub status: RefactorStatus,
    pub action: String,
    pub summary: String,
    pub changes: Vec<FileChange>,
    pub affected_files: usize,
    pub total_changes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
}

/// Everything a planning pass may consult. Planning never mutates disk.
pub(crate) struct PlanCtx<'a> {
    pub symbols: &'a SymbolEngine,
    pub roots: Vec<PathBuf>,
}

/// A single file rewrite the plan wants to make.
#[derive(Debug, Clone)]
pub(crate) struct PlannedFile {
    pub path: PathBuf,
    pub original: String,
    pub updated: String,
    pub occurrences: usize,
    pub details: Vec<ChangeDetail>,
}

#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub summary: String,
    pub files: Vec<PlannedFile>,
    pub suggestions: Vec<String>,
}

impl Plan {
    pub(crate) fn changed_files(&self) -> Vec<&PlannedFile> {
        self.files.iter().filter(|f| f.original != f.updated).collect()
    }
}

/// Entry point used by the adapter for both preview and execute.
pub fn run(
    symbols: &SymbolEngine,
    roots: &[PathBuf],
    state: &mut TaskState,
    action: RefactorAction,
    params: &RefactorParams,
    operations: Option<&[(RefactorAction, RefactorParams)]>,
    execute: bool,
) -> Result<RefactoringResult> {
    let ctx = PlanCtx {
        symbols,
        roots: roots.to_vec(),
    };
    if action == RefactorAction::Batch {
        let steps = operations.ok_or_else(|| {
            NtsError::InvalidArgument("batch requires an operations array".to_string())
        })?;
        return run_batch(&ctx, state, steps, execute);
    }

    let plan = match plan_action(&ctx, action, params) {
        Ok(plan) => plan,
        Err(err) => return Ok(error_result(action, err)),
    };
    if execute {
        execute_plan(&ctx, state, action, plan)
    } else {
        Ok(result_from_plan(action, &plan, RefactorStatus::Preview, None))
    }
}

pub(crate) fn plan_action(
    ctx: &PlanCtx<'_>,
    action: RefactorAction,
    params: &RefactorParams,
) -> Result<Plan> {
    match action {
        RefactorAction::Rename => rename::plan(ctx, params),
        RefactorAction::Generate => generate::plan(ctx, params),
        RefactorAction::Delete => delete::plan(ctx, params),
        RefactorAction::Wrap => wrap::plan(ctx, params),
        RefactorAction::ExtractMethod => extract::plan(ctx, params),
        RefactorAction::Inline => inline::plan(ctx, params),
        RefactorAction::ChangeSignature => signature::plan(ctx, params),
        RefactorAction::Move => move_symbol::plan(ctx, params),
        RefactorAction::Batch => Err(NtsError::InvalidArgument(
            "batch cannot nest inside batch".to_string(),
        )),
    }
}

fn execute_plan(
    ctx: &PlanCtx<'_>,
    state: &mut TaskState,
    action: RefactorAction,
    plan: Plan,
) -> Result<RefactoringResult> {
    if plan.changed_files().is_empty() {
        return Ok(result_from_plan(action, &plan, RefactorStatus::NoChanges, None));
    }

    state.begin(&format!("refactor {}", action.as_str()))?;
    let applied = apply_plan(ctx, state, &plan);
    match applied {
        Ok(()) => {
            let transaction_id = state.commit(&plan.summary)?;
            Ok(result_from_plan(
                action,
                &plan,
                RefactorStatus::Success,
                transaction_id,
            ))
        }
        Err(err) => {
            state.rollback()?;
            Err(err)
        }
    }
}

/// Backup, write, and invalidate parse caches for every changed file.
pub(crate) fn apply_plan(
    ctx: &PlanCtx<'_>,
    state: &mut TaskState,
    plan: &Plan,
) -> Result<()> {
    for file in plan.changed_files() {
        state.backup(&file.path)?;
        if let Some(parent) = file.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&file.path, file.updated.as_bytes())?;
        ctx.symbols.invalidate(&file.path);
        debug!(path = %file.path.display(), "refactor rewrote file");
    }
    Ok(())
}

fn run_batch(
    ctx: &PlanCtx<'_>,
    state: &mut TaskState,
    steps: &[(RefactorAction, RefactorParams)],
    execute: bool,
) -> Result<RefactoringResult> {
    if steps.is_empty() {
        return Err(NtsError::InvalidArgument(
            "batch requires at least one operation".to_string(),
        ));
    }

    if !execute {
        // Preview plans each step against the current tree.
        let mut changes = Vec::new();
        let mut summaries = Vec::new();
        for (index, (action, params)) in steps.iter().enumerate() {
            match plan_action(ctx, *action, params) {
                Ok(plan) => {
                    summaries.push(format!("step {}: {}", index + 1, plan.summary));
                    changes.extend(collect_changes(&plan, false));
                }
                Err(err) => {
                    return Ok(RefactoringResult {
                        status: RefactorStatus::Error,
                        action: "batch".to_string(),
                        summary: format!("step {} failed while planning", index + 1),
                        changes,
                        affected_files: 0,
                        total_changes: 0,
                        transaction_id: None,
                        error: Some(err.to_string()),
                        suggestions: summaries,
                    });
                }
            }
        }
        let affected_files = changes.len();
        let total_changes = changes.iter().map(|c| c.occurrences).sum();
        return Ok(RefactoringResult {
            status: RefactorStatus::Preview,
            action: "batch".to_string(),
            summary: summaries.join("; "),
            changes,
            affected_files,
            total_changes,
            transaction_id: None,
            error: None,
            suggestions: Vec::new(),
        });
    }

    state.begin("batch refactor")?;
    let mut changes: Vec<FileChange> = Vec::new();
    let mut summaries = Vec::new();
    for (index, (action, params)) in steps.iter().enumerate() {
        let step_result = plan_action(ctx, *action, params)
            .and_then(|plan| apply_plan(ctx, state, &plan).map(|()| plan));
        match step_result {
            Ok(plan) => {
                summaries.push(format!("step {}: {}", index + 1, plan.summary));
                changes.extend(collect_changes(&plan, false));
            }
            Err(err) => {
                // First failure rolls the whole batch back.
                state.rollback()?;
                return Ok(RefactoringResult {
                    status: RefactorStatus::Partial,
                    action: "batch".to_string(),
                    summary: format!(
                        "batch aborted at step {} of {}; all changes rolled back",
                        index + 1,
                        steps.len()
                    ),
                    changes,
                    affected_files: 0,
                    total_changes: 0,
                    transaction_id: None,
                    error: Some(err.to_string()),
                    suggestions: summaries,
                });
            }
        }
    }

    let transaction_id = state.commit("batch refactor")?;
    let affected_files = changes.len();
    let total_changes = changes.iter().map(|c| c.occurrences).sum();
    Ok(RefactoringResult {
        status: RefactorStatus::Success,
        action: "batch".to_string(),
        summary: summaries.join("; "),
        changes,
        affected_files,
        total_changes,
        transaction_id,
        error: None,
        suggestions: Vec::new(),
    })
}

fn collect_changes(plan: &Plan, with_post_state: bool) -> Vec<FileChange> {
    plan.files
        .iter()
        .filter(|f| f.original != f.updated || !f.details.is_empty())
        .map(|f| {
            let path = f.path.to_string_lossy().into_owned();
            let (post_crc, post_line_count) = if with_post_state {
                (
                    Some(crc32c_bytes(f.updated.as_bytes())),
                    Some(f.updated.lines().count()),
                )
            } else {
                (None, None)
            };
            FileChange {
                unified_diff: Some(unified_diff(&f.original, &f.updated, &path)),
                path,
                occurrences: f.occurrences,
                details: f.details.clone(),
                post_crc,
                post_line_count,
            }
        })
        .collect()
}

fn result_from_plan(
    action: RefactorAction,
    plan: &Plan,
    status: RefactorStatus,
    transaction_id: Option<i64>,
) -> RefactoringResult {
    let changed = plan.changed_files();
    let status = if changed.is_empty() && plan.files.iter().all(|f| f.details.is_empty()) {
        RefactorStatus::NoChanges
    } else {
        status
    };
    let changes = collect_changes(plan, transaction_id.is_some());
    let affected_files = changed.len();
    let total_changes = plan.files.iter().map(|f| f.occurrences).sum();
    RefactoringResult {
        status,
        action: action.as_str().to_string(),
        summary: plan.summary.clone(),
        changes,
        affected_files,
        total_changes,
        transaction_id,
        error: None,
        suggestions: plan.suggestions.clone(),
    }
}

fn error_result(action: RefactorAction, err: NtsError) -> RefactoringResult {
    let suggestions = match &err {
        NtsError::SymbolNotFound { suggestions, .. } => suggestions.clone(),
        NtsError::UnsupportedLanguage(_) => vec![
            "supported languages: java, kotlin, js, ts, python, go, rust, c, cpp, c#, php, html"
                .to_string(),
        ],
        _ => Vec::new(),
    };
    RefactoringResult {
        status: RefactorStatus::Error,
        action: action.as_str().to_string(),
        summary: format!("{} failed", action.as_str()),
        changes: Vec::new(),
        affected_files: 0,
        total_changes: 0,
        transaction_id: None,
        error: Some(err.to_string()),
        suggestions,
    }
}

// ---------------------------------------------------------------------------
// shared text helpers for the operation modules
// ---------------------------------------------------------------------------

/// Read a file the way every planner sees it: lossy text plus line vector.
pub(crate) fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A single in-line replacement at (1-based line, 0-based column).
#[derive(Debug, Clone)]
pub(crate) struct TokenEdit {
    pub line: usize,
    pub column: usize,
    pub old: String,
    pub new: String,
    pub confidence: Option<Confidence>,
}

/// Apply token edits bottom-up so earlier replacements cannot shift later
/// coordinates; returns the new content and per-line details.
pub(crate) fn apply_token_edits(
    content: &str,
    edits: &[TokenEdit],
) -> (String, Vec<ChangeDetail>, usize) {
    let mut lines: Vec<String> = content.split('\n').map(|s| s.to_string()).collect();
    let mut sorted: Vec<&TokenEdit> = edits.iter().collect();
    sorted.sort_by(|a, b| (b.line, b.column).cmp(&(a.line, a.column)));

    let mut details = Vec::new();
    let mut applied = 0usize;
    for edit in sorted {
        let Some(line) = lines.get_mut(edit.line.saturating_sub(1)) else {
            continue;
        };
        let before = line.clone();
        let end = edit.column + edit.old.len();
        match line.get(edit.column..end) {
            Some(slice) if slice == edit.old => {}
            _ => continue,
        }
        line.replace_range(edit.column..end, &edit.new);
        applied += 1;
        details.push(ChangeDetail {
            line: edit.line,
            before,
            after: line.clone(),
            confidence: edit.confidence,
        });
    }
    details.sort_by_key(|d| d.line);
    details.dedup_by(|a, b| a.line == b.line && a.after == b.after);
    (lines.join("\n"), details, applied)
}

pub(crate) fn leading_indent(line: &str) -> String {
    line.chars().take_while(|c| c.is_whitespace()).collect()
}

pub(crate) fn require<T: Clone>(value: &Option<T>, what: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| NtsError::InvalidArgument(format!("missing required field '{what}'")))
}

pub(crate) fn resolve_origin(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<PathBuf> {
    let raw = require(&params.path, "path")?;
    let path = PathBuf::from(&raw);
    let absolute = if path.is_absolute() {
        path
    } else {
        ctx.roots
            .first()
            .map(|root| root.join(&path))
            .unwrap_or(path)
    };
    if !absolute.exists() {
        return Err(NtsError::NotFound { path: absolute });
    }
    Ok(absolute)
}

/// The symbol a request names, either directly or through line/column.
pub(crate) fn resolve_target_name(
    ctx: &PlanCtx<'_>,
    params: &RefactorParams,
    origin: &Path,
) -> Result<String> {
    if let Some(symbol) = &params.symbol {
        return Ok(symbol.clone());
    }
    match (params.line, params.column) {
        (Some(line), Some(column)) => ctx.symbols.identifier_at(origin, line, column),
        _ => Err(NtsError::InvalidArgument(
            "provide either 'symbol' or both 'line' and 'column'".to_string(),
        )),
    }
}
