//! End-to-end flows through the engine: token-gated edits, undo/redo,
//! checkpoints, and reactivation after a restart.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use nts_core::Engine;
use nts_core::EngineConfig;
use nts_core::NtsError;
use nts_core::journal::Stack;
use nts_core::ops;
use nts_core::ops::EditOp;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn engine_in(dir: &TempDir) -> Engine {
    Engine::new(EngineConfig::new(dir.path().to_path_buf()))
}

fn fallback() -> &'static encoding_rs::Encoding {
    encoding_rs::WINDOWS_1251
}

fn replace(start_line: usize, content: &str) -> Vec<EditOp> {
    vec![EditOp {
        start_line,
        end_line: start_line,
        content: Some(content.to_string()),
    }]
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn edit_without_token_is_rejected_and_file_intact() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "Content").unwrap();

    let (task, _) = engine.task(Some("s1")).unwrap();
    let mut state = task.lock();
    let err = ops::edit_file(&mut state, &file, &replace(1, "New"), None, fallback()).unwrap_err();
    assert!(err.to_string().contains("TOKEN_REQUIRED"));
    drop(state);
    assert_eq!(read(&file), "Content");
}

#[test]
fn successful_edit_issues_fresh_token_and_stales_the_old_one() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let file = dir.path().join("t.txt");
    std::fs::write(&file, "Original").unwrap();

    let (task, _) = engine.task(Some("s2")).unwrap();
    let mut state = task.lock();
    let first = ops::read_file(&mut state, &file, fallback()).unwrap();
    let edited = ops::edit_file(
        &mut state,
        &file,
        &replace(1, "Modified"),
        Some(&first.token),
        fallback(),
    )
    .unwrap();
    assert_eq!(read(&file), "Modified");
    let fresh = edited.new_token.unwrap();
    assert!(fresh.starts_with("LAT:"));

    let err = ops::edit_file(
        &mut state,
        &file,
        &replace(1, "Again"),
        Some(&first.token),
        fallback(),
    )
    .unwrap_err();
    assert!(matches!(err, NtsError::TokenStale));

    // The fresh token works.
    ops::edit_file(&mut state, &file, &replace(1, "Again"), Some(&fresh), fallback()).unwrap();
    assert_eq!(read(&file), "Again");
}

#[test]
fn move_then_undo_restores_the_source_path() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let source = dir.path().join("source.txt");
    let target = dir.path().join("sub").join("target.txt");
    std::fs::write(&source, "move me").unwrap();

    let (task, _) = engine.task(Some("s3")).unwrap();
    let mut state = task.lock();
    ops::move_file(&mut state, &source, &target).unwrap();
    assert!(!source.exists());

    let outcome = state.smart_undo(dir.path()).unwrap();
    assert!(!outcome.stuck, "skipped: {:?}", outcome.skipped);
    assert_eq!(read(&source), "move me");
    assert!(!target.exists());
}

#[test]
fn checkpoint_then_rollback_restores_the_file() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let file = dir.path().join("check.txt");
    std::fs::write(&file, "initial").unwrap();

    let (task, _) = engine.task(Some("s4")).unwrap();
    let mut state = task.lock();
    state.create_checkpoint("A").unwrap();
    let token = ops::read_file(&mut state, &file, fallback()).unwrap().token;
    ops::edit_file(&mut state, &file, &replace(1, "modified"), Some(&token), fallback()).unwrap();
    assert_eq!(read(&file), "modified");

    state.rollback_to_checkpoint("A").unwrap();
    assert_eq!(read(&file), "initial");
}

#[test]
fn redo_is_invalidated_by_a_fresh_edit() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let file = dir.path().join("r.txt");
    std::fs::write(&file, "init").unwrap();

    let (task, _) = engine.task(Some("s5")).unwrap();
    let mut state = task.lock();
    let token = ops::read_file(&mut state, &file, fallback()).unwrap().token;
    ops::edit_file(&mut state, &file, &replace(1, "A"), Some(&token), fallback()).unwrap();
    state.smart_undo(dir.path()).unwrap();
    assert_eq!(read(&file), "init");

    let token = ops::read_file(&mut state, &file, fallback()).unwrap().token;
    ops::edit_file(&mut state, &file, &replace(1, "B"), Some(&token), fallback()).unwrap();

    let err = state.redo().unwrap_err();
    assert_eq!(err.to_string(), "No operations to redo");
    assert_eq!(read(&file), "B");
}

#[test]
fn restart_preserves_journal_but_rotates_the_secret() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("persist.txt");
    std::fs::write(&file, "v1").unwrap();

    let old_token;
    {
        let engine = engine_in(&dir);
        let (task, summary) = engine.task(Some("restart-me")).unwrap();
        assert!(!summary.reactivated);
        let mut state = task.lock();
        let token = ops::read_file(&mut state, &file, fallback()).unwrap().token;
        ops::edit_file(&mut state, &file, &replace(1, "v2"), Some(&token), fallback()).unwrap();
        old_token = state
            .tokens
            .register_full_access(&file.to_string_lossy(), "v2", 0)
            .unwrap();
    }

    // A new engine simulates a restarted process: fresh HMAC secret, same
    // durable journal.
    let engine = engine_in(&dir);
    let (task, summary) = engine.task(Some("restart-me")).unwrap();
    assert!(summary.reactivated);
    assert_eq!(summary.undo_entries, 1);

    let mut state = task.lock();
    let err = ops::edit_file(
        &mut state,
        &file,
        &replace(1, "v3"),
        Some(&old_token),
        fallback(),
    )
    .unwrap_err();
    assert!(matches!(err, NtsError::TokenMalformed));

    // The restored undo stack still works.
    let outcome = state.smart_undo(dir.path()).unwrap();
    assert!(!outcome.stuck);
    assert_eq!(read(&file), "v1");
}

#[test]
fn journal_positions_stay_gap_free_across_mixed_operations() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let file = dir.path().join("g.txt");
    std::fs::write(&file, "0").unwrap();

    let (task, _) = engine.task(Some("gaps")).unwrap();
    let mut state = task.lock();
    for i in 1..=3 {
        let token = ops::read_file(&mut state, &file, fallback()).unwrap().token;
        ops::edit_file(
            &mut state,
            &file,
            &replace(1, &i.to_string()),
            Some(&token),
            fallback(),
        )
        .unwrap();
    }
    state.create_checkpoint("mid").unwrap();
    state.smart_undo(dir.path()).unwrap();
    state.smart_undo(dir.path()).unwrap();
    state.redo().unwrap();

    for stack in [Stack::Undo, Stack::Redo] {
        let entries = state.journal.get_entries(stack).unwrap();
        let positions: Vec<i64> = entries.iter().map(|e| e.position).collect();
        for pair in positions.windows(2) {
            assert_eq!(pair[1], pair[0] + 1, "{stack:?} has a gap: {positions:?}");
        }
    }
}

#[test]
fn undo_cap_boundary_preserves_redo_validity() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir);
    let file = dir.path().join("cap.txt");
    std::fs::write(&file, "v0").unwrap();

    let (task, _) = engine.task(Some("cap")).unwrap();
    let mut state = task.lock();
    state.undo_cap = 5;
    for i in 1..=7 {
        let token = ops::read_file(&mut state, &file, fallback()).unwrap().token;
        ops::edit_file(
            &mut state,
            &file,
            &replace(1, &format!("v{i}")),
            Some(&token),
            fallback(),
        )
        .unwrap();
    }
    assert_eq!(state.journal.count_entries(Stack::Undo).unwrap(), 5);

    // Undo/redo across the surviving window still round-trips.
    state.smart_undo(dir.path()).unwrap();
    assert_eq!(read(&file), "v6");
    state.redo().unwrap();
    assert_eq!(read(&file), "v7");
}
