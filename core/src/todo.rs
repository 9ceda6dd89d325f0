//! Markdown todo plans stored under a task's `todos/` directory.
//!
//! A plan is a named checklist; the task's metadata snapshot points at the
//! active one. The markdown is the durable format so the files stay
//! readable without the server.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::NtsError;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoStep {
    pub step: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodoPlan {
    pub name: String,
    pub steps: Vec<TodoStep>,
}

fn plan_path(todos_dir: &Path, name: &str) -> Result<PathBuf> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if !ok {
        return Err(NtsError::InvalidArgument(format!(
            "todo name '{name}' may only contain alphanumerics, '-', '_'"
        )));
    }
    Ok(todos_dir.join(format!("{name}.md")))
}

pub fn save_plan(todos_dir: &Path, plan: &TodoPlan) -> Result<()> {
    let path = plan_path(todos_dir, &plan.name)?;
    let mut out = format!("# {}\n\n", plan.name);
    for step in &plan.steps {
        let marker = match step.status {
            StepStatus::Pending => " ",
            StepStatus::InProgress => "~",
            StepStatus::Completed => "x",
        };
        out.push_str(&format!("- [{marker}] {}\n", step.step));
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn load_plan(todos_dir: &Path, name: &str) -> Result<TodoPlan> {
    let path = plan_path(todos_dir, name)?;
    if !path.exists() {
        return Err(NtsError::NotFound { path });
    }
    let text = std::fs::read_to_string(&path)?;
    let mut steps = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("- [") else {
            continue;
        };
        let Some((marker, step)) = rest.split_once(']') else {
            continue;
        };
        let status = match marker {
            "x" | "X" => StepStatus::Completed,
            "~" => StepStatus::InProgress,
            _ => StepStatus::Pending,
        };
        steps.push(TodoStep {
            step: step.trim().to_string(),
            status,
        });
    }
    Ok(TodoPlan {
        name: name.to_string(),
        steps,
    })
}

pub fn list_plans(todos_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !todos_dir.exists() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(todos_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "md") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn plans_round_trip_through_markdown() {
        let dir = tempdir().unwrap();
        let plan = TodoPlan {
            name: "migration".to_string(),
            steps: vec![
                TodoStep {
                    step: "survey call sites".to_string(),
                    status: StepStatus::Completed,
                },
                TodoStep {
                    step: "rewrite the adapter".to_string(),
                    status: StepStatus::InProgress,
                },
                TodoStep {
                    step: "delete the shim".to_string(),
                    status: StepStatus::Pending,
                },
            ],
        };
        save_plan(dir.path(), &plan).unwrap();

        let loaded = load_plan(dir.path(), "migration").unwrap();
        assert_eq!(loaded.steps.len(), 3);
        assert_eq!(loaded.steps[0].status, StepStatus::Completed);
        assert_eq!(loaded.steps[1].status, StepStatus::InProgress);
        assert_eq!(loaded.steps[2].step, "delete the shim");
        assert_eq!(list_plans(dir.path()).unwrap(), vec!["migration"]);
    }

    #[test]
    fn hostile_plan_names_are_rejected() {
        let dir = tempdir().unwrap();
        let err = load_plan(dir.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, NtsError::InvalidArgument(_)));
    }
}
