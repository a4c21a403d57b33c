//! DAG resolution over job names.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use trellis_core::pipeline::{JobDefinition, PipelineDefinition};
use trellis_core::{Error, Result};

/// A node in the job DAG.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub name: String,
    pub definition: JobDefinition,
}

/// Directed acyclic graph over job names: an edge `a -> b` means `b`
/// declared `a` in its dependencies and runs after it.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<JobNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl JobGraph {
    /// Get the root jobs (jobs with no dependencies).
    pub fn roots(&self) -> Vec<&JobNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Get jobs that can run after a given job completes.
    pub fn successors(&self, job_name: &str) -> Vec<&JobNode> {
        self.name_to_index
            .get(job_name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get jobs that must complete before a given job can run.
    pub fn predecessors(&self, job_name: &str) -> Vec<&JobNode> {
        self.name_to_index
            .get(job_name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get all jobs in declaration order.
    pub fn jobs(&self) -> Vec<&JobNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.name_to_index.contains_key(job_name)
    }

    /// Get topologically sorted jobs.
    pub fn topological_order(&self) -> Result<Vec<&JobNode>> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|_| Error::Internal("cycle survived validation".to_string()))
    }

    /// Find a dependency cycle, if any, as the path of job names closing it.
    ///
    /// Iterative depth-first traversal with an explicit recursion stack so
    /// the error can name the cycle rather than just report its existence.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }

            // Stack of (node, remaining successors to visit).
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
            marks[start.index()] = Mark::InStack;
            stack.push((start, self.graph.neighbors(start).collect()));

            while !stack.is_empty() {
                let next = stack.last_mut().and_then(|(_, pending)| pending.pop());
                match next {
                    Some(next) => match marks[next.index()] {
                        Mark::InStack => {
                            // Reconstruct the cycle from the stack tail.
                            let pos = stack
                                .iter()
                                .position(|(n, _)| *n == next)
                                .unwrap_or(0);
                            let mut cycle: Vec<String> = stack[pos..]
                                .iter()
                                .filter_map(|(n, _)| {
                                    self.graph.node_weight(*n).map(|w| w.name.clone())
                                })
                                .collect();
                            if let Some(first) = cycle.first().cloned() {
                                cycle.push(first);
                            }
                            return Some(cycle);
                        }
                        Mark::Unvisited => {
                            marks[next.index()] = Mark::InStack;
                            stack.push((next, self.graph.neighbors(next).collect()));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        if let Some((node, _)) = stack.pop() {
                            marks[node.index()] = Mark::Done;
                        }
                    }
                }
            }
        }

        None
    }
}

/// Builder for validated job graphs.
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a DAG from a pipeline definition.
    ///
    /// Validates that every declared dependency references an existing job
    /// and that no cycle exists. Pure function of the definition.
    pub fn build(&self, pipeline: &PipelineDefinition) -> Result<JobGraph> {
        if pipeline.jobs.is_empty() {
            return Err(Error::EmptyPipeline);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for job in &pipeline.jobs {
            if name_to_index.contains_key(&job.name) {
                return Err(Error::DuplicateJob(job.name.clone()));
            }
            let node = JobNode {
                name: job.name.clone(),
                definition: job.clone(),
            };
            let idx = graph.add_node(node);
            name_to_index.insert(job.name.clone(), idx);
        }

        for job in &pipeline.jobs {
            let job_idx = name_to_index[&job.name];
            for dep in &job.depends_on {
                let dep_idx =
                    name_to_index
                        .get(dep)
                        .ok_or_else(|| Error::UnknownDependency {
                            job: job.name.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(*dep_idx, job_idx, ());
            }
        }

        let dag = JobGraph {
            graph,
            name_to_index,
        };

        if let Some(cycle) = dag.find_cycle() {
            return Err(Error::CyclicDependency(cycle.join(" -> ")));
        }

        Ok(dag)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::pipeline::StepDefinition;

    fn make_job(name: &str, depends_on: Vec<&str>) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            matrix: None,
            steps: vec![StepDefinition {
                name: "noop".to_string(),
                run: "true".to_string(),
                shell: "sh".to_string(),
                env: Default::default(),
                timeout_minutes: 30,
            }],
            gate_required: false,
            credential_env: None,
            env: Default::default(),
        }
    }

    fn make_pipeline(jobs: Vec<JobDefinition>) -> PipelineDefinition {
        PipelineDefinition {
            name: "test".to_string(),
            description: None,
            triggers: vec![],
            jobs,
            version_check: None,
            max_parallel: 4,
        }
    }

    #[test]
    fn test_linear_dag() {
        let pipeline = make_pipeline(vec![
            make_job("build", vec![]),
            make_job("test", vec!["build"]),
            make_job("publish", vec!["test"]),
        ]);

        let dag = GraphBuilder::new().build(&pipeline).unwrap();

        let roots = dag.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "build");

        let order = dag.topological_order().unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].name, "build");
    }

    #[test]
    fn test_diamond_dag() {
        let pipeline = make_pipeline(vec![
            make_job("version", vec![]),
            make_job("lint", vec![]),
            make_job("check", vec![]),
            make_job("publish", vec!["version", "lint", "check"]),
        ]);

        let dag = GraphBuilder::new().build(&pipeline).unwrap();
        assert_eq!(dag.roots().len(), 3);
        assert_eq!(dag.predecessors("publish").len(), 3);
        assert_eq!(dag.successors("version").len(), 1);
    }

    #[test]
    fn test_unknown_dependency() {
        let pipeline = make_pipeline(vec![make_job("publish", vec!["check"])]);

        let err = GraphBuilder::new().build(&pipeline).unwrap_err();
        match err {
            Error::UnknownDependency { job, dependency } => {
                assert_eq!(job, "publish");
                assert_eq!(dependency, "check");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_direct_cycle() {
        let pipeline = make_pipeline(vec![
            make_job("a", vec!["b"]),
            make_job("b", vec!["a"]),
        ]);

        let err = GraphBuilder::new().build(&pipeline).unwrap_err();
        match err {
            Error::CyclicDependency(path) => {
                assert!(path.contains("a"), "cycle should name a: {path}");
                assert!(path.contains("b"), "cycle should name b: {path}");
                assert!(path.contains("->"));
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_indirect_cycle() {
        let pipeline = make_pipeline(vec![
            make_job("a", vec!["c"]),
            make_job("b", vec!["a"]),
            make_job("c", vec!["b"]),
        ]);

        assert!(matches!(
            GraphBuilder::new().build(&pipeline),
            Err(Error::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_self_cycle() {
        let pipeline = make_pipeline(vec![make_job("a", vec!["a"])]);

        assert!(matches!(
            GraphBuilder::new().build(&pipeline),
            Err(Error::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_duplicate_job() {
        let pipeline = make_pipeline(vec![make_job("a", vec![]), make_job("a", vec![])]);

        assert!(matches!(
            GraphBuilder::new().build(&pipeline),
            Err(Error::DuplicateJob(_))
        ));
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = make_pipeline(vec![]);

        assert!(matches!(
            GraphBuilder::new().build(&pipeline),
            Err(Error::EmptyPipeline)
        ));
    }
}
