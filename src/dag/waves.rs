// src/dag/waves.rs

//! Kahn layering of the dependency graph into execution waves.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::dag::graph::DagGraph;
use crate::errors::{GridError, Result};
use crate::store::Task;
use crate::types::TaskId;

/// One computed layer: ids are sorted, wave ids start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WavePlan {
    pub id: u32,
    pub tasks: Vec<TaskId>,
}

/// Layer `tasks` so that every dependency lands in an earlier wave.
///
/// Every edge inside the set counts, resolved or not, so a replan never
/// puts a task beside one of its dependencies. Output depends only on the
/// task set, not on its order.
pub fn compute_waves(tasks: &[Task]) -> Result<Vec<WavePlan>> {
    let graph = DagGraph::from_tasks(tasks)?;
    layer(&graph)
}

/// Kahn's algorithm over an already-built graph.
pub fn layer(graph: &DagGraph) -> Result<Vec<WavePlan>> {
    let mut in_degree: BTreeMap<&str, usize> = graph
        .tasks()
        .map(|id| (id, graph.dependencies_of(id).len()))
        .collect();

    let mut current: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut waves = Vec::new();

    while !current.is_empty() {
        for id in &current {
            in_degree.remove(id);
        }

        let mut next = BTreeSet::new();
        for id in &current {
            for dependent in graph.dependents_of(id) {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.insert(dependent.as_str());
                    }
                }
            }
        }

        let wave = WavePlan {
            id: waves.len() as u32 + 1,
            tasks: current.iter().map(|s| s.to_string()).collect(),
        };
        debug!(wave = wave.id, tasks = ?wave.tasks, "wave computed");
        waves.push(wave);
        current = next;
    }

    if !in_degree.is_empty() {
        let groups = graph
            .cycles()
            .iter()
            .map(|g| g.join(" -> "))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(GridError::Cycle(format!(
            "dependency cycle among tasks: {groups}"
        )));
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(plan: &WavePlan) -> Vec<&str> {
        plan.tasks.iter().map(String::as_str).collect()
    }

    #[test]
    fn chain_gives_one_task_per_wave() {
        let tasks = vec![
            Task::new("T2", "api").blocked_by(["T1"]),
            Task::new("T1", "schema"),
        ];
        let waves = compute_waves(&tasks).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!((waves[0].id, ids(&waves[0])), (1, vec!["T1"]));
        assert_eq!((waves[1].id, ids(&waves[1])), (2, vec!["T2"]));
    }

    #[test]
    fn diamond_layers() {
        let tasks = vec![
            Task::new("A", "a"),
            Task::new("B", "b").blocked_by(["A"]),
            Task::new("C", "c").blocked_by(["A"]),
            Task::new("D", "d").blocked_by(["B", "C"]),
            Task::new("E", "e"),
        ];
        let waves = compute_waves(&tasks).unwrap();
        let layers: Vec<Vec<&str>> = waves.iter().map(ids).collect();
        assert_eq!(layers, vec![vec!["A", "E"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn longest_path_decides_the_wave() {
        let tasks = vec![
            Task::new("A", "a"),
            Task::new("B", "b").blocked_by(["A"]),
            Task::new("C", "c").blocked_by(["A", "B"]),
        ];
        let waves = compute_waves(&tasks).unwrap();
        assert_eq!(ids(&waves[2]), vec!["C"]);
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let tasks = vec![
            Task::new("A", "a").blocked_by(["B"]),
            Task::new("B", "b").blocked_by(["A"]),
            Task::new("C", "c"),
        ];
        match compute_waves(&tasks) {
            Err(GridError::Cycle(msg)) => assert!(msg.contains("A -> B"), "{msg}"),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn empty_set_has_no_waves() {
        assert!(compute_waves(&[]).unwrap().is_empty());
    }
}
