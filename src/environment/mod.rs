//! Environment model: immutable spec plus mutable observed status
//!
//! The Environment is created by the loader, owned by the orchestrator for
//! the duration of a run, and serialised to the per-environment cache file
//! after every observable state change.

mod cache;
mod conditions;
mod status;

pub use cache::CacheFile;
pub use conditions::{conditions_equal, set_condition, Condition, ConditionType};
pub use status::{ClusterPhase, ClusterStatus, NodePhase, NodeRole, NodeStatus};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EnvironmentSpec;

/// Root document persisted in the cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub spec: EnvironmentSpec,

    #[serde(default)]
    pub status: EnvironmentStatus,
}

impl Environment {
    pub fn new(spec: EnvironmentSpec) -> Self {
        Self {
            spec,
            status: EnvironmentStatus::default(),
        }
    }
}

/// Observed state of the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    /// Named observed properties (phase markers, endpoints, kubeconfig path)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterStatus>,

    /// How each component was (or will be) installed
    #[serde(default)]
    pub components: Vec<ComponentProvenance>,
}

impl EnvironmentStatus {
    /// Whether two statuses are logically equal for write suppression:
    /// condition timestamps are ignored, everything else compares directly.
    pub fn logically_equal(&self, other: &EnvironmentStatus) -> bool {
        self.properties == other.properties
            && conditions_equal(&self.conditions, &other.conditions)
            && self.cluster == other.cluster
            && self.components == other.components
    }

    /// Record provenance for a component, replacing any previous entry.
    pub fn record_provenance(&mut self, provenance: ComponentProvenance) {
        self.components
            .retain(|c| c.component != provenance.component);
        self.components.push(provenance);
        self.components.sort_by_key(|c| c.component);
    }
}

/// Installable component identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Driver,
    Runtime,
    Toolkit,
    Kubernetes,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Driver => "driver",
            ComponentKind::Runtime => "runtime",
            ComponentKind::Toolkit => "toolkit",
            ComponentKind::Kubernetes => "kubernetes",
        }
    }
}

/// Record of how a component was installed: source kind, version or track,
/// repo, requested ref and the commit it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentProvenance {
    pub component: ComponentKind,

    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub requested_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_environment() -> Environment {
        let spec: EnvironmentSpec = serde_yaml::from_str(
            r#"
name: round-trip
cluster:
  region: us-west-2
  controlPlane:
    count: 3
  workers:
    count: 2
"#,
        )
        .unwrap();

        let mut env = Environment::new(spec);
        env.status
            .properties
            .insert("phase".to_string(), "ready".to_string());
        set_condition(
            &mut env.status.conditions,
            ConditionType::Available,
            "Ready",
            "all nodes ready",
        );
        env.status.record_provenance(ComponentProvenance {
            component: ComponentKind::Toolkit,
            source: "git".to_string(),
            version: None,
            branch: None,
            repository: Some("https://github.com/NVIDIA/nvidia-container-toolkit".to_string()),
            requested_ref: Some("v1.17.3".to_string()),
            commit: Some("abc123de".to_string()),
        });
        env
    }

    #[test]
    fn test_environment_yaml_round_trip() {
        let env = sample_environment();
        let serialized = serde_yaml::to_string(&env).unwrap();
        let parsed: Environment = serde_yaml::from_str(&serialized).unwrap();
        assert_eq!(env, parsed);
        // Canonical encoder: re-serialising the parsed document is byte-equal
        assert_eq!(serialized, serde_yaml::to_string(&parsed).unwrap());
    }

    #[test]
    fn test_record_provenance_replaces_previous_entry() {
        let mut status = EnvironmentStatus::default();
        for commit in ["aaaaaaaa", "bbbbbbbb"] {
            status.record_provenance(ComponentProvenance {
                component: ComponentKind::Kubernetes,
                source: "git".to_string(),
                version: None,
                branch: None,
                repository: None,
                requested_ref: Some("master".to_string()),
                commit: Some(commit.to_string()),
            });
        }
        assert_eq!(status.components.len(), 1);
        assert_eq!(status.components[0].commit.as_deref(), Some("bbbbbbbb"));
    }

    #[test]
    fn test_logical_equality_ignores_condition_timestamps() {
        let env = sample_environment();
        let mut other = env.clone();
        for c in &mut other.status.conditions {
            c.last_transition_time = c.last_transition_time + chrono::Duration::minutes(5);
        }
        assert!(env.status.logically_equal(&other.status));

        other
            .status
            .properties
            .insert("phase".to_string(), "degraded".to_string());
        assert!(!env.status.logically_equal(&other.status));
    }
}
