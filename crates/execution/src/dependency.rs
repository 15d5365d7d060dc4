//! Dependency resolution for workflow tasks.

use std::collections::HashMap;

use crate::workflow::{TaskSpec, WorkflowError};

/// A dependency graph over task indices.
#[derive(Debug, Clone)]
pub struct DepGraph {
    ids: Vec<String>,
    /// task -> [dependencies]
    graph: Vec<Vec<usize>>,
    /// task -> [dependents]
    reverse: Vec<Vec<usize>>,
}

impl DepGraph {
    /// Index the tasks, rejecting duplicate ids and unknown dependencies.
    pub fn new(tasks: &[TaskSpec]) -> Result<Self, WorkflowError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.as_str(), i).is_some() {
                return Err(WorkflowError::DuplicateTask(task.id.clone()));
            }
        }

        let mut graph = vec![Vec::new(); tasks.len()];
        let mut reverse = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let Some(&j) = index.get(dep.as_str()) else {
                    return Err(WorkflowError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if !graph[i].contains(&j) {
                    graph[i].push(j);
                    reverse[j].push(i);
                }
            }
        }

        Ok(Self {
            ids: tasks.iter().map(|t| t.id.clone()).collect(),
            graph,
            reverse,
        })
    }

    /// Task indices in topological order, stable with respect to declaration
    /// order among tasks that are ready together.
    pub fn topological_sort(&self) -> Result<Vec<usize>, WorkflowError> {
        let mut remaining: Vec<usize> = self.graph.iter().map(Vec::len).collect();
        let mut sorted = Vec::with_capacity(self.ids.len());
        let mut ready: Vec<usize> = (0..self.ids.len()).filter(|&i| remaining[i] == 0).collect();

        while !ready.is_empty() {
            ready.sort_unstable_by(|a, b| b.cmp(a));
            let Some(id) = ready.pop() else { break };
            sorted.push(id);

            for &dependent in &self.reverse[id] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }

        if sorted.len() < self.ids.len() {
            let cycle = (0..self.ids.len())
                .filter(|i| remaining[*i] > 0)
                .map(|i| self.ids[i].clone())
                .collect();
            return Err(WorkflowError::Cycle(cycle));
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task_fn;
    use serde_json::Value;

    fn task(id: &str, deps: &[&str]) -> TaskSpec {
        let mut spec = TaskSpec::new(id, task_fn(|_, _| async { Ok(Value::Null) }));
        for dep in deps {
            spec = spec.after(*dep);
        }
        spec
    }

    #[test]
    fn test_independent_tasks_keep_declaration_order() {
        let tasks = vec![task("register_admissions", &[]), task("register_labs", &[]), task("register_pharmacy", &[])];
        let graph = DepGraph::new(&tasks).unwrap();
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_fan_in_order() {
        let tasks = vec![task("log", &["check"]), task("check", &[]), task("other", &[])];
        let graph = DepGraph::new(&tasks).unwrap();
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 0, 2]);
    }

    #[test]
    fn test_duplicate_id() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert_eq!(DepGraph::new(&tasks).unwrap_err(), WorkflowError::DuplicateTask("a".to_string()));
    }

    #[test]
    fn test_unknown_dependency() {
        let tasks = vec![task("a", &["ghost"])];
        match DepGraph::new(&tasks).unwrap_err() {
            WorkflowError::UnknownDependency { task, dependency } => {
                assert_eq!(task, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"]), task("d", &[])];
        let err = DepGraph::new(&tasks).unwrap().topological_sort().unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Cycle(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let tasks = vec![task("a", &["a"])];
        assert!(matches!(
            DepGraph::new(&tasks).unwrap().topological_sort(),
            Err(WorkflowError::Cycle(_))
        ));
    }
}
