//! Dependency graph analysis
//!
//! Cycle detection, topological ordering and the critical path over a task list
//! in insertion order. Dependencies on unknown task IDs are ignored here; they
//! only affect readiness.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::report::CriticalPath;
use crate::domain::Task;

fn index_map(tasks: &[Task]) -> HashMap<&str, usize> {
    tasks.iter().enumerate().map(|(i, t)| (t.id(), i)).collect()
}

/// Dependency edges as indices, in dependency ID order; unknown IDs dropped
fn adjacency(tasks: &[Task]) -> Vec<Vec<usize>> {
    let index_map = index_map(tasks);
    tasks
        .iter()
        .map(|task| {
            task.definition
                .dependencies
                .iter()
                .filter_map(|dep_id| index_map.get(dep_id.as_str()).copied())
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first post-order over every task, dependencies first
///
/// Runs on an explicit stack, so chain depth is bounded by memory rather than
/// the thread stack. Returns the cycle path (first node repeated at the end)
/// on the first back edge.
fn dependency_order(tasks: &[Task]) -> Result<Vec<usize>, Vec<String>> {
    let edges = adjacency(tasks);
    let mut marks = vec![Mark::Unvisited; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());
    // (task index, next edge to follow)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..tasks.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let Some(&dep) = edges[node].get(next) else {
                marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match marks[dep] {
                Mark::Unvisited => {
                    marks[dep] = Mark::OnStack;
                    stack.push((dep, 0));
                }
                Mark::OnStack => {
                    debug!(node = %tasks[node].id(), dep_id = %tasks[dep].id(), "dependency_order: back edge found");
                    let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..].iter().map(|&(n, _)| tasks[n].id().to_string()).collect();
                    cycle.push(tasks[dep].id().to_string());
                    return Err(cycle);
                }
                Mark::Done => {}
            }
        }
    }

    Ok(order)
}

/// Validate the dependency graph for cycles
///
/// Uses DFS. Returns the cycle path (first node repeated at the end) if found.
pub fn validate_dependency_graph(tasks: &[Task]) -> Result<(), Vec<String>> {
    debug!(task_count = tasks.len(), "validate_dependency_graph: called");
    match dependency_order(tasks) {
        Ok(_) => {
            debug!("validate_dependency_graph: no cycles found");
            Ok(())
        }
        Err(cycle_path) => {
            debug!(?cycle_path, "validate_dependency_graph: cycle detected");
            Err(cycle_path)
        }
    }
}

/// Topologically sort tasks, dependencies first
///
/// Returns indices into the input slice.
pub fn topological_sort(tasks: &[Task]) -> Result<Vec<usize>, Vec<String>> {
    debug!(task_count = tasks.len(), "topological_sort: called");
    dependency_order(tasks)
}

/// Longest chain by cumulative estimated duration
///
/// Each task contributes its own duration. Ties prefer the earlier-inserted
/// task, so the result is deterministic.
pub fn critical_path(tasks: &[Task]) -> Result<CriticalPath, Vec<String>> {
    debug!(task_count = tasks.len(), "critical_path: called");
    let order = topological_sort(tasks)?;
    let edges = adjacency(tasks);

    let mut best = vec![0u64; tasks.len()];
    let mut pred: Vec<Option<usize>> = vec![None; tasks.len()];

    for &idx in &order {
        let mut longest: Option<usize> = None;

        for &dep_idx in &edges[idx] {
            longest = match longest {
                Some(cur) if best[cur] > best[dep_idx] || (best[cur] == best[dep_idx] && cur < dep_idx) => Some(cur),
                _ => Some(dep_idx),
            };
        }

        best[idx] = tasks[idx]
            .definition
            .estimated_duration_secs
            .saturating_add(longest.map_or(0, |l| best[l]));
        pred[idx] = longest;
    }

    let mut end: Option<usize> = None;
    for idx in 0..tasks.len() {
        end = match end {
            Some(cur) if best[cur] >= best[idx] => Some(cur),
            _ => Some(idx),
        };
    }

    let Some(end) = end else {
        return Ok(CriticalPath::default());
    };

    let mut task_ids = Vec::new();
    let mut cursor = Some(end);
    while let Some(idx) = cursor {
        task_ids.push(tasks[idx].id().to_string());
        cursor = pred[idx];
    }
    task_ids.reverse();

    debug!(?task_ids, total = best[end], "critical_path: complete");
    Ok(CriticalPath {
        task_ids,
        total_duration_secs: best[end],
    })
}

/// `(task_id, dependency_id)` pairs whose dependency is not a known task
pub fn missing_dependencies(tasks: &[Task]) -> Vec<(String, String)> {
    let known: HashSet<&str> = tasks.iter().map(Task::id).collect();
    tasks
        .iter()
        .flat_map(|task| {
            task.definition
                .dependencies
                .iter()
                .filter(|dep| !known.contains(dep.as_str()))
                .map(|dep| (task.id().to_string(), dep.clone()))
        })
        .collect()
}
