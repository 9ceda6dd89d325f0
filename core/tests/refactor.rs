//! Refactoring operations end to end: plan, execute, transactional safety.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::path::PathBuf;

use nts_core::Engine;
use nts_core::EngineConfig;
use nts_core::journal::Stack;
use nts_core::refactor;
use nts_core::refactor::ParamSpec;
use nts_core::refactor::RefactorAction;
use nts_core::refactor::RefactorParams;
use nts_core::refactor::RefactorStatus;
use nts_core::tasks::TaskContext;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const SERVICE_JAVA: &str = r#"public class Service {
    private String name;

    public String processData(String input) {
        return input.trim();
    }
}
"#;

const CLIENT_JAVA: &str = r#"public class Client {
    private Service service = new Service();

    public void run() {
        service.processData("hello");
        service.processData("world");
    }
}
"#;

fn setup(dir: &TempDir) -> (Engine, std::sync::Arc<TaskContext>) {
    let engine = Engine::new(EngineConfig::new(dir.path().to_path_buf()));
    let (task, _) = engine.task(Some("refactor-test")).unwrap();
    (engine, task)
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn run(
    engine: &Engine,
    task: &TaskContext,
    action: RefactorAction,
    params: RefactorParams,
    execute: bool,
) -> refactor::RefactoringResult {
    let roots = engine.paths.roots();
    let mut state = task.lock();
    refactor::run(
        &engine.symbols,
        &roots,
        &mut state,
        action,
        &params,
        None,
        execute,
    )
    .unwrap()
}

#[test]
fn cross_file_rename_updates_definition_and_call_sites() {
    let dir = TempDir::new().unwrap();
    let service = write(&dir, "Service.java", SERVICE_JAVA);
    let client = write(&dir, "Client.java", CLIENT_JAVA);
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Rename,
        RefactorParams {
            path: Some(service.to_string_lossy().into_owned()),
            symbol: Some("processData".to_string()),
            new_name: Some("handle".to_string()),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success);
    assert!(result.transaction_id.is_some());
    assert_eq!(result.changes.len(), 2, "both files must be listed");

    let client_text = read(&client);
    assert_eq!(client_text.matches("service.handle(").count(), 2);
    assert!(!client_text.contains("processData"));
    let service_text = read(&service);
    assert!(service_text.contains("public String handle(String input)"));

    let client_change = result
        .changes
        .iter()
        .find(|c| c.path.ends_with("Client.java"))
        .unwrap();
    assert!(client_change.occurrences >= 2);

    // The rename is one transaction; undo restores both files.
    let mut state = task.lock();
    let outcome = state.smart_undo(dir.path()).unwrap();
    assert!(!outcome.stuck);
    drop(state);
    engine.symbols.invalidate(&service);
    engine.symbols.invalidate(&client);
    assert_eq!(read(&service), SERVICE_JAVA);
    assert_eq!(read(&client), CLIENT_JAVA);
}

#[test]
fn preview_computes_changes_without_touching_disk() {
    let dir = TempDir::new().unwrap();
    let service = write(&dir, "Service.java", SERVICE_JAVA);
    write(&dir, "Client.java", CLIENT_JAVA);
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Rename,
        RefactorParams {
            path: Some(service.to_string_lossy().into_owned()),
            symbol: Some("processData".to_string()),
            new_name: Some("handle".to_string()),
            ..RefactorParams::default()
        },
        false,
    );

    assert_eq!(result.status, RefactorStatus::Preview);
    assert!(result.transaction_id.is_none());
    assert!(result.changes.iter().all(|c| c.unified_diff.is_some()));
    assert_eq!(read(&service), SERVICE_JAVA, "preview must not write");
    let state = task.lock();
    assert_eq!(state.journal.count_entries(Stack::Undo).unwrap(), 0);
}

#[test]
fn change_signature_adds_parameter_with_default() {
    let dir = TempDir::new().unwrap();
    let iface = write(
        &dir,
        "IService.java",
        "public interface IService {\n    void run(String task);\n}\n",
    );
    let client = write(
        &dir,
        "Client.java",
        "public class Client {\n    private IService service;\n\n    public void go() {\n        service.run(\"task1\");\n    }\n}\n",
    );
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::ChangeSignature,
        RefactorParams {
            path: Some(iface.to_string_lossy().into_owned()),
            symbol: Some("run".to_string()),
            new_name: Some("execute".to_string()),
            parameters: Some(vec![
                ParamSpec {
                    name: "task".to_string(),
                    param_type: "String".to_string(),
                    default_value: None,
                },
                ParamSpec {
                    name: "priority".to_string(),
                    param_type: "int".to_string(),
                    default_value: Some("0".to_string()),
                },
            ]),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success);
    assert!(read(&iface).contains("void execute(String task, int priority);"));
    assert!(read(&client).contains("service.execute(\"task1\", 0);"));
}

#[test]
fn change_signature_without_default_conflicts() {
    let dir = TempDir::new().unwrap();
    let iface = write(
        &dir,
        "IService.java",
        "public interface IService {\n    void run(String task);\n}\n",
    );
    write(
        &dir,
        "Client.java",
        "public class Client {\n    private IService service;\n\n    public void go() {\n        service.run(\"task1\");\n    }\n}\n",
    );
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::ChangeSignature,
        RefactorParams {
            path: Some(iface.to_string_lossy().into_owned()),
            symbol: Some("run".to_string()),
            parameters: Some(vec![ParamSpec {
                name: "brandNew".to_string(),
                param_type: "long".to_string(),
                default_value: None,
            }]),
            ..RefactorParams::default()
        },
        true,
    );
    assert_eq!(result.status, RefactorStatus::Error);
    assert!(result.error.as_deref().unwrap().contains("SIGNATURE_CONFLICT"));
}

#[test]
fn generate_accessors_lands_inside_the_class() {
    let dir = TempDir::new().unwrap();
    let service = write(&dir, "Service.java", SERVICE_JAVA);
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Generate,
        RefactorParams {
            path: Some(service.to_string_lossy().into_owned()),
            symbol: Some("Service".to_string()),
            what: Some(refactor::GenerateWhat::Accessors),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success);
    let text = read(&service);
    assert!(text.contains("public String getName()"));
    assert!(text.contains("public void setName(String name)"));
    // The members sit before the class's closing brace.
    assert!(text.trim_end().ends_with('}'));
}

#[test]
fn extract_method_infers_parameters_and_return() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "Calc.java",
        r#"public class Calc {
    public int total(int base) {
        int doubled = base * 2;
        int result = doubled + base;
        return result;
    }
}
"#,
    );
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::ExtractMethod,
        RefactorParams {
            path: Some(path.to_string_lossy().into_owned()),
            start_line: Some(3),
            end_line: Some(4),
            method_name: Some("combine".to_string()),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success, "{:?}", result.error);
    let text = read(&path);
    assert!(
        text.contains("int result = combine(base);"),
        "call site should assign the returned value: {text}"
    );
    assert!(
        text.contains("private int combine(int base)"),
        "new method should take the flowing-in variable: {text}"
    );
    assert!(text.contains("return result;"));
}

#[test]
fn wrap_in_try_catch_reindents_the_body() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "W.java",
        "public class W {\n    public void f() {\n        doWork();\n    }\n}\n",
    );
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Wrap,
        RefactorParams {
            path: Some(path.to_string_lossy().into_owned()),
            start_line: Some(3),
            end_line: Some(3),
            wrapper: Some(refactor::WrapKind::TryCatch),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success);
    let text = read(&path);
    assert!(text.contains("        try {"));
    assert!(text.contains("            doWork();"));
    assert!(text.contains("        } catch (Exception e) {"));
}

#[test]
fn delete_with_comment_policy_keeps_references_visible() {
    let dir = TempDir::new().unwrap();
    let service = write(&dir, "Service.java", SERVICE_JAVA);
    let client = write(&dir, "Client.java", CLIENT_JAVA);
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Delete,
        RefactorParams {
            path: Some(service.to_string_lossy().into_owned()),
            symbol: Some("processData".to_string()),
            handle_references: Some(refactor::ReferencePolicy::Comment),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success);
    assert!(!read(&service).contains("processData"));
    let client_text = read(&client);
    assert!(client_text.contains("// service.processData(\"hello\");"));
}

#[test]
fn delete_with_error_policy_refuses_when_referenced() {
    let dir = TempDir::new().unwrap();
    let service = write(&dir, "Service.java", SERVICE_JAVA);
    write(&dir, "Client.java", CLIENT_JAVA);
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Delete,
        RefactorParams {
            path: Some(service.to_string_lossy().into_owned()),
            symbol: Some("processData".to_string()),
            ..RefactorParams::default()
        },
        true,
    );
    assert_eq!(result.status, RefactorStatus::Error);
    assert_eq!(read(&service), SERVICE_JAVA, "nothing may change on error");
}

#[test]
fn inline_constant_replaces_uses_and_drops_the_declaration() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "Limits.java",
        r#"public class Limits {
    private static final int MAX_RETRIES = 3;

    public int budget() {
        return MAX_RETRIES * 2;
    }
}
"#,
    );
    let (engine, task) = setup(&dir);

    let result = run(
        &engine,
        &task,
        RefactorAction::Inline,
        RefactorParams {
            path: Some(path.to_string_lossy().into_owned()),
            symbol: Some("MAX_RETRIES".to_string()),
            ..RefactorParams::default()
        },
        true,
    );

    assert_eq!(result.status, RefactorStatus::Success, "{:?}", result.error);
    let text = read(&path);
    assert!(text.contains("return 3 * 2;"));
    assert!(!text.contains("MAX_RETRIES"));
}

#[test]
fn failed_batch_rolls_back_every_step() {
    let dir = TempDir::new().unwrap();
    let service = write(&dir, "Service.java", SERVICE_JAVA);
    write(&dir, "Client.java", CLIENT_JAVA);
    let (engine, task) = setup(&dir);

    let steps = vec![
        (
            RefactorAction::Rename,
            RefactorParams {
                path: Some(service.to_string_lossy().into_owned()),
                symbol: Some("processData".to_string()),
                new_name: Some("handle".to_string()),
                ..RefactorParams::default()
            },
        ),
        (
            RefactorAction::Rename,
            RefactorParams {
                path: Some(service.to_string_lossy().into_owned()),
                symbol: Some("doesNotExist".to_string()),
                new_name: Some("whatever".to_string()),
                ..RefactorParams::default()
            },
        ),
    ];

    let roots = engine.paths.roots();
    let mut state = task.lock();
    let result = refactor::run(
        &engine.symbols,
        &roots,
        &mut state,
        RefactorAction::Batch,
        &RefactorParams::default(),
        Some(&steps),
        true,
    )
    .unwrap();
    drop(state);

    assert_eq!(result.status, RefactorStatus::Partial);
    assert!(result.error.is_some());
    engine.symbols.invalidate(&service);
    assert_eq!(read(&service), SERVICE_JAVA, "step 1 must be rolled back");
    let state = task.lock();
    assert_eq!(state.journal.count_entries(Stack::Undo).unwrap(), 0);
}
