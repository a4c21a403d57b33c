//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerFilter>,
    pub jobs: Vec<JobDefinition>,
    #[serde(default)]
    pub version_check: Option<VersionCheckConfig>,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    4
}

impl PipelineDefinition {
    /// Look up a job definition by name.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// A trigger filter: glob patterns over branch or tag names.
///
/// A pipeline with no filters runs for any trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerFilter {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    pub steps: Vec<StepDefinition>,
    /// Admission to this job is re-verified by the gate evaluator: every
    /// instance of every dependency must have succeeded before it runs.
    #[serde(default)]
    pub gate_required: bool,
    /// Environment variable holding the scoped credential for this job.
    /// Only honored together with `gate_required`.
    #[serde(default)]
    pub credential_env: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    pub run: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_minutes: u32,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_step_timeout() -> u32 {
    30
}

/// Matrix axes for fanning one job into parallel variants.
///
/// Axis order and value order are preserved from the declaration; instance
/// ordering depends on both.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    pub axes: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VersionCheckConfig {
    /// Name of the job whose captured output is the extracted version.
    pub job: String,
    #[serde(default)]
    pub normalize: VersionNormalize,
}

/// Normalization applied to both sides before the byte-exact comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VersionNormalize {
    #[default]
    Exact,
    StripVPrefix,
}
