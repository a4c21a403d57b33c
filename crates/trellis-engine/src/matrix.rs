//! Matrix expansion: one job definition into parallel variants.

use indexmap::IndexMap;
use trellis_core::instance::{AxisAssignment, JobInstance};
use trellis_core::pipeline::JobDefinition;

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job into instances, one per element of the Cartesian product
    /// of its matrix axes.
    ///
    /// Ordering is deterministic: axis declaration order outermost-first,
    /// value order as declared. A job without a matrix yields exactly one
    /// instance with an empty assignment. An axis with an empty value list
    /// yields zero instances for the whole job.
    pub fn expand(&self, job: &JobDefinition) -> Vec<JobInstance> {
        let Some(matrix) = &job.matrix else {
            return vec![JobInstance::new(job, AxisAssignment::new())];
        };

        if matrix.axes.is_empty() {
            return vec![JobInstance::new(job, AxisAssignment::new())];
        }

        let mut combinations = vec![AxisAssignment::new()];
        for (axis, values) in &matrix.axes {
            let mut next = Vec::with_capacity(combinations.len() * values.len());
            for combination in &combinations {
                for value in values {
                    let mut assignment = combination.clone();
                    assignment.insert(axis.clone(), value.clone());
                    next.push(assignment);
                }
            }
            // An empty axis empties the whole product here; the job becomes
            // a no-op rather than the product of the remaining axes.
            combinations = next;
        }

        combinations.retain(|combination| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| Self::matches_exclude(combination, exclude))
        });

        combinations
            .into_iter()
            .map(|axes| JobInstance::new(job, axes))
            .collect()
    }

    fn matches_exclude(
        combination: &AxisAssignment,
        exclude: &IndexMap<String, String>,
    ) -> bool {
        exclude
            .iter()
            .all(|(axis, value)| combination.get(axis) == Some(value))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::pipeline::{MatrixConfig, StepDefinition};

    fn make_job(matrix: Option<MatrixConfig>) -> JobDefinition {
        JobDefinition {
            name: "check".to_string(),
            depends_on: vec![],
            matrix,
            steps: vec![StepDefinition {
                name: "test".to_string(),
                run: "cargo test".to_string(),
                shell: "sh".to_string(),
                env: Default::default(),
                timeout_minutes: 30,
            }],
            gate_required: false,
            credential_env: None,
            env: Default::default(),
        }
    }

    fn axes(pairs: &[(&str, &[&str])]) -> IndexMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(axis, values)| {
                (
                    axis.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_no_matrix_yields_single_instance() {
        let instances = MatrixExpander::new().expand(&make_job(None));
        assert_eq!(instances.len(), 1);
        assert!(instances[0].axes.is_empty());
        assert_eq!(instances[0].id.as_str(), "check");
    }

    #[test]
    fn test_expansion_is_ordered() {
        let job = make_job(Some(MatrixConfig {
            axes: axes(&[("os", &["a", "b", "c"]), ("toolchain", &["x"])]),
            exclude: vec![],
        }));

        let instances = MatrixExpander::new().expand(&job);
        assert_eq!(instances.len(), 3);

        let ids: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "check[os=a,toolchain=x]",
                "check[os=b,toolchain=x]",
                "check[os=c,toolchain=x]",
            ]
        );
    }

    #[test]
    fn test_two_axes_product_order() {
        let job = make_job(Some(MatrixConfig {
            axes: axes(&[("os", &["linux", "macos"]), ("rust", &["stable", "beta"])]),
            exclude: vec![],
        }));

        let instances = MatrixExpander::new().expand(&job);
        let ids: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "check[os=linux,rust=stable]",
                "check[os=linux,rust=beta]",
                "check[os=macos,rust=stable]",
                "check[os=macos,rust=beta]",
            ]
        );
    }

    #[test]
    fn test_empty_axis_yields_zero_instances() {
        let job = make_job(Some(MatrixConfig {
            axes: axes(&[("os", &["linux", "macos"]), ("rust", &[])]),
            exclude: vec![],
        }));

        let instances = MatrixExpander::new().expand(&job);
        assert!(instances.is_empty());
    }

    #[test]
    fn test_exclude_removes_combination() {
        let mut exclude = IndexMap::new();
        exclude.insert("os".to_string(), "macos".to_string());
        exclude.insert("rust".to_string(), "beta".to_string());

        let job = make_job(Some(MatrixConfig {
            axes: axes(&[("os", &["linux", "macos"]), ("rust", &["stable", "beta"])]),
            exclude: vec![exclude],
        }));

        let instances = MatrixExpander::new().expand(&job);
        assert_eq!(instances.len(), 3);
        assert!(
            instances
                .iter()
                .all(|i| i.id.as_str() != "check[os=macos,rust=beta]")
        );
    }
}
