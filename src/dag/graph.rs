// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{GridError, Result};
use crate::store::Task;
use crate::types::TaskId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Tasks listed in this task's `blocked_by`.
    deps: Vec<TaskId>,
    /// Tasks that list this one in their `blocked_by`.
    dependents: Vec<TaskId>,
}

/// In-memory dependency graph keyed by task id.
///
/// Unlike the persisted records, this does not assume acyclicity; callers
/// that need an order go through [`crate::dag::compute_waves`].
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: BTreeMap<TaskId, DagNode>,
}

impl DagGraph {
    /// Build the graph from a task set. Every `blocked_by` id must belong to
    /// the set; duplicate edges collapse.
    pub fn from_tasks(tasks: &[Task]) -> Result<Self> {
        let mut nodes: BTreeMap<TaskId, DagNode> = tasks
            .iter()
            .map(|t| (t.id.clone(), DagNode::default()))
            .collect();
        if nodes.len() != tasks.len() {
            return Err(GridError::Validation(
                "task set contains duplicate ids".to_string(),
            ));
        }

        for task in tasks {
            let deps: BTreeSet<&TaskId> = task.blocked_by.iter().collect();
            for dep in deps {
                if !nodes.contains_key(dep) {
                    return Err(GridError::Validation(format!(
                        "task '{}' has unknown dependency '{}' in blocked_by",
                        task.id, dep
                    )));
                }
                if let Some(node) = nodes.get_mut(&task.id) {
                    node.deps.push(dep.clone());
                }
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(task.id.clone());
                }
            }
        }

        Ok(Self { nodes })
    }

    /// All task ids, sorted.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Groups of tasks that sit on a dependency cycle, each group sorted,
    /// groups ordered by their first member.
    pub fn cycles(&self) -> Vec<Vec<TaskId>> {
        // Edge direction: dep -> task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.tasks() {
            graph.add_node(id);
        }
        for (id, node) in &self.nodes {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        let mut groups: Vec<Vec<TaskId>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut ids: Vec<TaskId> = scc.into_iter().map(str::to_string).collect();
                ids.sort();
                ids
            })
            .collect();
        groups.sort();
        groups
    }
}
