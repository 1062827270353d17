use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    models::{Task, TaskStatus},
};

/// Counters describing the current graph contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub pending_tasks: usize,
    pub ready_tasks: usize,
}

/// In-memory DAG over the tasks currently known to the scheduler.
///
/// Holds non-terminal tasks plus the set of completed task ids so
/// dependents can observe satisfaction. Admission runs a full cycle check
/// so ready-set reads never have to.
///
/// Dependency ids that are not in the graph are allowed: they refer to
/// tasks that were already completed and pruned, or to externally
/// satisfied work. Such edges take no part in cycle checks and do not
/// block readiness.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// task id -> ids it depends on.
    dependencies: HashMap<String, HashSet<String>>,
    /// task id -> ids that depend on it (reverse index).
    dependents: HashMap<String, HashSet<String>>,
    tasks: HashMap<String, Task>,
    completed: HashSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the graph.
    ///
    /// # Errors
    /// `Error::Cycle` if the task depends on itself or if inserting its
    /// edges would create a cycle. On rejection the graph is left exactly
    /// as it was, including any previous node under the same id.
    pub fn add(&mut self, task: &Task) -> Result<()> {
        let task_id = task.id.clone();
        let deps: HashSet<String> = task.dependencies.iter().cloned().collect();

        if deps.contains(&task_id) {
            return Err(Error::Cycle(format!(
                "task {task_id} cannot depend on itself"
            )));
        }

        // Remember the previous node (if any) so a rejected re-insert can
        // restore it instead of dropping it.
        let prev_task = self.tasks.get(&task_id).cloned();
        let prev_deps = self.dependencies.get(&task_id).cloned();

        if let Some(ref old) = prev_deps {
            for dep_id in old {
                if let Some(set) = self.dependents.get_mut(dep_id) {
                    set.remove(&task_id);
                }
            }
        }

        self.tasks.insert(task_id.clone(), task.clone());
        self.dependencies.insert(task_id.clone(), deps.clone());
        for dep_id in &deps {
            self.dependents
                .entry(dep_id.clone())
                .or_default()
                .insert(task_id.clone());
        }

        if self.has_cycle() {
            // Roll back to the pre-insert state.
            for dep_id in &deps {
                if let Some(set) = self.dependents.get_mut(dep_id) {
                    set.remove(&task_id);
                }
            }
            match (prev_task, prev_deps) {
                (Some(task), Some(deps)) => {
                    for dep_id in &deps {
                        self.dependents
                            .entry(dep_id.clone())
                            .or_default()
                            .insert(task_id.clone());
                    }
                    self.tasks.insert(task_id.clone(), task);
                    self.dependencies.insert(task_id.clone(), deps);
                }
                _ => {
                    self.tasks.remove(&task_id);
                    self.dependencies.remove(&task_id);
                }
            }
            return Err(Error::Cycle(format!(
                "adding task {task_id} would create a cycle"
            )));
        }

        tracing::debug!(task_id = %task_id, dependencies = ?task.dependencies, "task added to graph");
        Ok(())
    }

    /// Remove a task and all its incident edges. Unknown ids are a no-op.
    pub fn remove(&mut self, task_id: &str) {
        if !self.tasks.contains_key(task_id) {
            return;
        }

        if let Some(deps) = self.dependencies.get(task_id).cloned() {
            for dep_id in deps {
                if let Some(set) = self.dependents.get_mut(&dep_id) {
                    set.remove(task_id);
                }
            }
        }
        if let Some(dependents) = self.dependents.get(task_id).cloned() {
            for dependent_id in dependents {
                if let Some(set) = self.dependencies.get_mut(&dependent_id) {
                    set.remove(task_id);
                }
            }
        }

        self.dependencies.remove(task_id);
        self.dependents.remove(task_id);
        self.tasks.remove(task_id);
        self.completed.remove(task_id);

        tracing::debug!(task_id = %task_id, "task removed from graph");
    }

    /// Record that a task finished, unblocking its dependents.
    pub fn mark_complete(&mut self, task_id: &str) {
        self.completed.insert(task_id.to_string());
    }

    pub fn is_complete(&self, task_id: &str) -> bool {
        self.completed.contains(task_id)
    }

    /// Refresh the status of a contained task's snapshot so the ready set
    /// reflects store-side transitions. Unknown ids are a no-op.
    pub fn update_status(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = status;
        }
    }

    /// Whether the edge from `task_id` to `dep_id` counts as satisfied.
    ///
    /// A dependency that is not in the graph is externally satisfied.
    fn dep_satisfied(&self, dep_id: &str) -> bool {
        self.completed.contains(dep_id) || !self.tasks.contains_key(dep_id)
    }

    /// All tasks whose status is pending or queued and whose every
    /// dependency is satisfied, ordered by `(priority, created_at, id)`.
    pub fn ready(&self) -> Vec<Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|(id, task)| {
                if self.completed.contains(*id) {
                    return false;
                }
                if !matches!(task.status, TaskStatus::Pending | TaskStatus::Queued) {
                    return false;
                }
                self.dependencies
                    .get(*id)
                    .map(|deps| deps.iter().all(|d| self.dep_satisfied(d)))
                    .unwrap_or(true)
            })
            .map(|(_, task)| task)
            .collect();

        ready.sort_by(|a, b| {
            (a.priority, a.created_at, &a.id).cmp(&(b.priority, b.created_at, &b.id))
        });
        ready.into_iter().cloned().collect()
    }

    /// Direct dependencies of a task.
    pub fn dependencies_of(&self, task_id: &str) -> HashSet<String> {
        self.dependencies.get(task_id).cloned().unwrap_or_default()
    }

    /// Tasks that directly depend on the given one.
    pub fn dependents_of(&self, task_id: &str) -> HashSet<String> {
        self.dependents.get(task_id).cloned().unwrap_or_default()
    }

    /// Transitive closure of a task's dependencies, for diagnostics.
    pub fn all_transitive_deps(&self, task_id: &str) -> HashSet<String> {
        let mut all: HashSet<String> = HashSet::new();
        let mut to_visit: Vec<String> = self
            .dependencies
            .get(task_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(dep_id) = to_visit.pop() {
            if all.insert(dep_id.clone()) {
                if let Some(next) = self.dependencies.get(&dep_id) {
                    to_visit.extend(next.iter().cloned());
                }
            }
        }

        all
    }

    /// Kahn's algorithm over the contained tasks; within a layer, lowest
    /// `(priority, created_at, id)` first.
    ///
    /// # Errors
    /// `Error::Cycle` if the graph is inconsistent. Unreachable after
    /// admission checking; kept as an audit.
    pub fn topo_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            self.tasks.keys().map(|id| (id.as_str(), 0)).collect();

        for task_id in self.tasks.keys() {
            if let Some(deps) = self.dependencies.get(task_id) {
                let known = deps.iter().filter(|d| in_degree.contains_key(d.as_str()));
                let count = known.count();
                if let Some(degree) = in_degree.get_mut(task_id.as_str()) {
                    *degree = count;
                }
            }
        }

        // Min-heap keyed by (priority, created_at, id).
        let mut queue: BinaryHeap<std::cmp::Reverse<(i64, chrono::DateTime<chrono::Utc>, String)>> =
            in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(id, _)| {
                    let task = &self.tasks[*id];
                    std::cmp::Reverse((task.priority, task.created_at, task.id.clone()))
                })
                .collect();

        let mut result: Vec<String> = Vec::with_capacity(self.tasks.len());

        while let Some(std::cmp::Reverse((_, _, task_id))) = queue.pop() {
            result.push(task_id.clone());

            if let Some(dependents) = self.dependents.get(&task_id) {
                for dependent_id in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent_id.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            let task = &self.tasks[dependent_id];
                            queue.push(std::cmp::Reverse((
                                task.priority,
                                task.created_at,
                                task.id.clone(),
                            )));
                        }
                    }
                }
            }
        }

        if result.len() != self.tasks.len() {
            return Err(Error::Cycle("cycle detected in dependency graph".into()));
        }

        Ok(result)
    }

    /// DFS three-coloring over the contained tasks. Edges to ids outside
    /// the graph are skipped.
    fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            graph: &DependencyGraph,
            task_id: &str,
            colors: &mut HashMap<String, Color>,
        ) -> bool {
            colors.insert(task_id.to_string(), Color::Gray);

            if let Some(deps) = graph.dependencies.get(task_id) {
                for dep_id in deps {
                    match colors.get(dep_id.as_str()) {
                        None => continue,
                        // A gray neighbor is a back edge.
                        Some(Color::Gray) => return true,
                        Some(Color::White) => {
                            if dfs(graph, dep_id, colors) {
                                return true;
                            }
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            colors.insert(task_id.to_string(), Color::Black);
            false
        }

        let mut colors: HashMap<String, Color> = self
            .tasks
            .keys()
            .map(|id| (id.clone(), Color::White))
            .collect();

        let ids: Vec<String> = self.tasks.keys().cloned().collect();
        for task_id in ids {
            if colors.get(&task_id) == Some(&Color::White) && dfs(self, &task_id, &mut colors) {
                return true;
            }
        }

        false
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            total_tasks: self.tasks.len(),
            completed_tasks: self.completed.len(),
            pending_tasks: self.tasks.len().saturating_sub(self.completed.len()),
            ready_tasks: self.ready().len(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Drop every task, edge and completion marker.
    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
        self.tasks.clear();
        self.completed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JsonMap, TaskStatus};
    use chrono::{Duration, Utc};

    fn task(id: &str, priority: i64, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            project_id: None,
            name: format!("task {id}"),
            description: String::new(),
            service: "noop".to_string(),
            payload: serde_json::json!({}),
            priority,
            status: TaskStatus::Pending,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            version: 1,
            created_by: None,
        }
    }

    #[test]
    fn self_dependency_rejected() {
        let mut graph = DependencyGraph::new();
        let err = graph.add(&task("a", 5, &["a"])).unwrap_err();
        assert!(err.is_cycle());
        assert!(graph.is_empty());
    }

    #[test]
    fn ready_respects_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();

        let ready: Vec<String> = graph.ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["a"]);

        graph.mark_complete("a");
        let ready: Vec<String> = graph.ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn ready_orders_by_priority_then_age() {
        let mut graph = DependencyGraph::new();
        let mut old = task("old", 5, &[]);
        old.created_at = Utc::now() - Duration::seconds(60);
        let young = task("young", 5, &[]);
        let urgent = task("urgent", 1, &[]);

        graph.add(&young).unwrap();
        graph.add(&old).unwrap();
        graph.add(&urgent).unwrap();

        let ready: Vec<String> = graph.ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["urgent", "old", "young"]);
    }

    #[test]
    fn unknown_dependencies_do_not_block() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("b", 5, &["pruned"])).unwrap();

        // "pruned" is not in the graph: the edge is externally satisfied.
        let ready: Vec<String> = graph.ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn cycle_rejected_and_graph_unchanged() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();

        // Re-inserting "a" with a dependency on "b" closes the loop.
        let err = graph.add(&task("a", 5, &["b"])).unwrap_err();
        assert!(err.is_cycle());

        // The original "a" survives, with its original (empty) deps.
        assert_eq!(graph.len(), 2);
        assert!(graph.dependencies_of("a").is_empty());
        assert_eq!(
            graph.dependents_of("a"),
            ["b".to_string()].into_iter().collect()
        );
        let ready: Vec<String> = graph.ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["a"]);
    }

    #[test]
    fn long_cycle_detected() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();
        graph.add(&task("c", 5, &["b"])).unwrap();
        let err = graph.add(&task("a", 5, &["c"])).unwrap_err();
        assert!(err.is_cycle());
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn topo_sort_orders_chains() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();
        graph.add(&task("c", 1, &[])).unwrap();

        let order = graph.topo_sort().unwrap();
        // "c" has the highest priority among roots.
        assert_eq!(order[0], "c");
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
    }

    #[test]
    fn transitive_deps() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();
        graph.add(&task("c", 5, &["b"])).unwrap();

        let deps = graph.all_transitive_deps("c");
        assert_eq!(
            deps,
            ["a".to_string(), "b".to_string()].into_iter().collect()
        );
        assert!(graph.all_transitive_deps("a").is_empty());
    }

    #[test]
    fn remove_erases_incident_edges() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();

        graph.remove("a");
        assert!(!graph.contains("a"));
        assert!(graph.dependencies_of("b").is_empty());
        let ready: Vec<String> = graph.ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn stats_counts() {
        let mut graph = DependencyGraph::new();
        graph.add(&task("a", 5, &[])).unwrap();
        graph.add(&task("b", 5, &["a"])).unwrap();
        graph.mark_complete("a");

        let stats = graph.stats();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.pending_tasks, 1);
        assert_eq!(stats.ready_tasks, 1);
    }
}
