//! Trigger matching: a pure predicate evaluated once, before the DAG
//! is built.

use trellis_core::pipeline::{PipelineDefinition, TriggerFilter};

/// Event that can trigger a pipeline run.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    Branch { name: String },
    Tag { name: String },
    Manual,
}

impl TriggerEvent {
    /// The reference value for the version consistency check, when the
    /// event carries one.
    pub fn reference_version(&self) -> Option<&str> {
        match self {
            TriggerEvent::Tag { name } => Some(name),
            _ => None,
        }
    }
}

/// Matcher for determining whether a pipeline should run at all.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a pipeline should run for an event. A pipeline without
    /// filters runs for any event; manual dispatch bypasses filters.
    pub fn matches(&self, pipeline: &PipelineDefinition, event: &TriggerEvent) -> bool {
        if pipeline.triggers.is_empty() || matches!(event, TriggerEvent::Manual) {
            return true;
        }

        pipeline
            .triggers
            .iter()
            .any(|filter| self.filter_matches(filter, event))
    }

    fn filter_matches(&self, filter: &TriggerFilter, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Branch { name } => self.branch_matches(&filter.branches, name),
            TriggerEvent::Tag { name } => self.tag_matches(&filter.tags, name),
            TriggerEvent::Manual => true,
        }
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true; // Match all branches if no patterns specified
        }
        patterns.iter().any(|p| glob_match(p, branch))
    }

    fn tag_matches(&self, patterns: &[String], tag: &str) -> bool {
        if patterns.is_empty() {
            return false; // Don't match tags unless explicitly specified
        }
        patterns.iter().any(|p| glob_match(p, tag))
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if text.starts_with(&prefix_slash) {
            return !text[prefix_slash.len()..].contains('/');
        }
        return false;
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.starts_with(parts[0]) && text.ends_with(parts[1]);
        }
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::pipeline::PipelineDefinition;

    fn pipeline_with(triggers: Vec<TriggerFilter>) -> PipelineDefinition {
        PipelineDefinition {
            name: "test".to_string(),
            description: None,
            triggers,
            jobs: vec![],
            version_check: None,
            max_parallel: 4,
        }
    }

    #[test]
    fn test_no_filters_matches_everything() {
        let pipeline = pipeline_with(vec![]);
        let matcher = TriggerMatcher::new();
        assert!(matcher.matches(
            &pipeline,
            &TriggerEvent::Branch {
                name: "main".to_string()
            }
        ));
        assert!(matcher.matches(
            &pipeline,
            &TriggerEvent::Tag {
                name: "v1.0.0".to_string()
            }
        ));
    }

    #[test]
    fn test_tag_filter() {
        let pipeline = pipeline_with(vec![TriggerFilter {
            branches: vec![],
            tags: vec!["v*".to_string()],
        }]);
        let matcher = TriggerMatcher::new();
        assert!(matcher.matches(
            &pipeline,
            &TriggerEvent::Tag {
                name: "v1.2.0".to_string()
            }
        ));
        assert!(!matcher.matches(
            &pipeline,
            &TriggerEvent::Tag {
                name: "nightly".to_string()
            }
        ));
    }

    #[test]
    fn test_tag_event_does_not_match_branch_only_filter() {
        // A filter with empty tags never matches a tag event.
        let pipeline = pipeline_with(vec![TriggerFilter {
            branches: vec!["main".to_string()],
            tags: vec![],
        }]);
        let matcher = TriggerMatcher::new();
        assert!(!matcher.matches(
            &pipeline,
            &TriggerEvent::Tag {
                name: "v1.2.0".to_string()
            }
        ));
    }

    #[test]
    fn test_branch_glob() {
        let pipeline = pipeline_with(vec![TriggerFilter {
            branches: vec!["release/*".to_string()],
            tags: vec![],
        }]);
        let matcher = TriggerMatcher::new();
        assert!(matcher.matches(
            &pipeline,
            &TriggerEvent::Branch {
                name: "release/1.x".to_string()
            }
        ));
        assert!(!matcher.matches(
            &pipeline,
            &TriggerEvent::Branch {
                name: "feature/foo".to_string()
            }
        ));
    }

    #[test]
    fn test_manual_bypasses_filters() {
        let pipeline = pipeline_with(vec![TriggerFilter {
            branches: vec!["main".to_string()],
            tags: vec![],
        }]);
        assert!(TriggerMatcher::new().matches(&pipeline, &TriggerEvent::Manual));
    }

    #[test]
    fn test_reference_version_from_tag() {
        let event = TriggerEvent::Tag {
            name: "v1.2.0".to_string(),
        };
        assert_eq!(event.reference_version(), Some("v1.2.0"));
        assert_eq!(TriggerEvent::Manual.reference_version(), None);
    }
}
