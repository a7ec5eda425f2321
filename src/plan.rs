// src/plan.rs

//! Bulk task creation from a TOML plan file.
//!
//! ```toml
//! [task.T1]
//! title = "Schema"
//! role = "backend"
//!
//! [task.T2]
//! title = "API"
//! blocked_by = ["T1"]
//! ```
//!
//! The whole plan is validated before the first task is written.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Deserialize;
use tracing::info;

use crate::errors::{GridError, Result};
use crate::store::{Task, TaskStore};
use crate::types::{Phase, TaskId, validate_id};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanFile {
    /// Keys are task ids.
    #[serde(default)]
    pub task: BTreeMap<TaskId, PlanTask>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
}

pub fn load_plan(path: impl AsRef<Path>) -> Result<PlanFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_plan(&contents)
}

pub fn parse_plan(contents: &str) -> Result<PlanFile> {
    Ok(toml::from_str(contents)?)
}

/// Check a plan against the ids already in the store and return its tasks
/// in creation order (dependencies first).
pub fn validate_plan(plan: &PlanFile, existing: &HashSet<TaskId>) -> Result<Vec<Task>> {
    if plan.task.is_empty() {
        return Err(GridError::Validation(
            "plan must contain at least one [task.<id>] section".to_string(),
        ));
    }

    for (id, task) in &plan.task {
        validate_id("task", id)?;
        if existing.contains(id) {
            return Err(GridError::Validation(format!("task '{id}' already exists")));
        }
        for (i, dep) in task.blocked_by.iter().enumerate() {
            if dep == id {
                return Err(GridError::Validation(format!(
                    "task '{id}' cannot depend on itself in blocked_by"
                )));
            }
            if task.blocked_by[..i].contains(dep) {
                return Err(GridError::Validation(format!(
                    "task '{id}' lists dependency '{dep}' twice"
                )));
            }
            if !plan.task.contains_key(dep) && !existing.contains(dep) {
                return Err(GridError::Validation(format!(
                    "task '{id}' has unknown dependency '{dep}' in blocked_by"
                )));
            }
        }
    }

    // Edge direction: dep -> task, plan-internal edges only.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for id in plan.task.keys() {
        graph.add_node(id.as_str());
    }
    for (id, task) in &plan.task {
        for dep in task.blocked_by.iter().filter(|d| plan.task.contains_key(*d)) {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        GridError::Cycle(format!(
            "plan has a dependency cycle involving task '{}'",
            cycle.node_id()
        ))
    })?;

    Ok(order
        .into_iter()
        .filter_map(|id| plan.task.get(id).map(|entry| (id, entry)))
        .map(|(id, entry)| {
            let mut task = Task::new(id, entry.title.clone())
                .with_description(entry.description.clone())
                .blocked_by(entry.blocked_by.iter().cloned());
            task.role = entry.role.clone();
            task
        })
        .collect())
}

/// Validate and create every task of `plan`. Planning phase only.
pub fn import_plan(store: &TaskStore, plan: &PlanFile, actor: &str) -> Result<Vec<Task>> {
    let meta = store.meta()?;
    if meta.phase != Phase::Planning {
        return Err(GridError::InvalidTransition(format!(
            "plans can only be imported while planning (team is {})",
            meta.phase
        )));
    }

    let existing: HashSet<TaskId> = store.all()?.into_iter().map(|t| t.id).collect();
    let ordered = validate_plan(plan, &existing)?;

    let mut created = Vec::with_capacity(ordered.len());
    for task in ordered {
        created.push(store.create(task, actor)?);
    }
    info!(tasks = created.len(), actor = %actor, "plan imported");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
[task.T2]
title = "API"
blocked_by = ["T1"]

[task.T1]
title = "Schema"
role = "backend"
description = "tables and indexes"
"#;

    #[test]
    fn orders_dependencies_first() {
        let plan = parse_plan(PLAN).unwrap();
        let tasks = validate_plan(&plan, &HashSet::new()).unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(tasks[0].role.as_deref(), Some("backend"));
        assert_eq!(tasks[0].description, "tables and indexes");
    }

    #[test]
    fn dependencies_may_reference_existing_tasks() {
        let plan = parse_plan("[task.T3]\ntitle = \"x\"\nblocked_by = [\"T0\"]\n").unwrap();
        let existing: HashSet<TaskId> = ["T0".to_string()].into_iter().collect();
        assert_eq!(validate_plan(&plan, &existing).unwrap().len(), 1);
        assert!(validate_plan(&plan, &HashSet::new()).is_err());
    }

    #[test]
    fn cycle_is_rejected() {
        let plan = parse_plan(
            "[task.A]\ntitle = \"a\"\nblocked_by = [\"B\"]\n[task.B]\ntitle = \"b\"\nblocked_by = [\"A\"]\n",
        )
        .unwrap();
        assert!(matches!(
            validate_plan(&plan, &HashSet::new()),
            Err(GridError::Cycle(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_plan("[task.A]\ntitle = \"a\"\nafter = [\"B\"]\n").is_err());
    }

    #[test]
    fn clash_with_existing_task_is_rejected() {
        let plan = parse_plan(PLAN).unwrap();
        let existing: HashSet<TaskId> = ["T1".to_string()].into_iter().collect();
        assert!(matches!(
            validate_plan(&plan, &existing),
            Err(GridError::Validation(_))
        ));
    }
}
