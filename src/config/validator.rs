//! Environment spec validation
//!
//! Every invariant is checked before any side effect. Violations are hard
//! errors (ConfigInvalid); there are no silent downgrades.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::errors::{HolodeckError, Result};

use super::types::{
    ClusterSpec, EnvironmentSpec, KubernetesSpec, RuntimeSpec, SourceKind, ToolkitSpec,
};

/// Node labels are interpolated into remote kubectl invocations, so this
/// regex doubles as the shell-injection barrier for label data.
pub static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._\-/]*[A-Za-z0-9])?$").expect("invalid LABEL_RE pattern")
});

static ENV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("invalid ENV_NAME_RE pattern"));

const MAX_CONTROL_PLANES: i64 = 7;
const MIN_ROOT_VOLUME_GB: i64 = 20;

/// Validate the whole spec. Returns the first violated invariant.
pub fn validate(spec: &EnvironmentSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(HolodeckError::ConfigInvalid(
            "environment name is required".to_string(),
        ));
    }
    if !ENV_NAME_RE.is_match(&spec.name) {
        return Err(HolodeckError::ConfigInvalid(format!(
            "environment name {:?} must match {}",
            spec.name,
            ENV_NAME_RE.as_str()
        )));
    }

    if spec.instance.is_none() && spec.cluster.is_none() {
        return Err(HolodeckError::ConfigInvalid(
            "either an instance or a cluster block is required".to_string(),
        ));
    }

    if let Some(cluster) = &spec.cluster {
        validate_cluster(cluster)?;
    }

    if let Some(driver) = &spec.nvidia_driver {
        if driver.install {
            validate_driver_source(driver)?;
        }
    }
    if let Some(runtime) = &spec.container_runtime {
        if runtime.install {
            validate_runtime(runtime)?;
        }
    }
    if let Some(toolkit) = &spec.nvidia_container_toolkit {
        if toolkit.install {
            validate_toolkit(toolkit)?;
        }
    }
    if let Some(kubernetes) = &spec.kubernetes {
        if kubernetes.install {
            validate_kubernetes(kubernetes)?;
        }
    }

    Ok(())
}

fn validate_cluster(cluster: &ClusterSpec) -> Result<()> {
    if cluster.region.is_empty() {
        return Err(HolodeckError::ConfigInvalid(
            "cluster.region is required".to_string(),
        ));
    }

    let cp = &cluster.control_plane;
    if cp.count < 1 || cp.count > MAX_CONTROL_PLANES {
        return Err(HolodeckError::ConfigInvalid(format!(
            "control plane count must be between 1 and {MAX_CONTROL_PLANES}, got {}",
            cp.count
        )));
    }
    if cp.count > 1 && cp.count % 2 == 0 {
        return Err(HolodeckError::ConfigInvalid(format!(
            "control plane count must be an odd number for quorum, got {}",
            cp.count
        )));
    }
    if cp.root_volume_gb < MIN_ROOT_VOLUME_GB {
        return Err(HolodeckError::ConfigInvalid(format!(
            "control plane root volume must be at least {MIN_ROOT_VOLUME_GB} GB, got {}",
            cp.root_volume_gb
        )));
    }
    validate_labels("controlPlane.labels", &cp.labels)?;

    if let Some(workers) = &cluster.workers {
        if workers.count < 0 {
            return Err(HolodeckError::ConfigInvalid(format!(
                "worker count must not be negative, got {}",
                workers.count
            )));
        }
        if workers.root_volume_gb < MIN_ROOT_VOLUME_GB {
            return Err(HolodeckError::ConfigInvalid(format!(
                "worker root volume must be at least {MIN_ROOT_VOLUME_GB} GB, got {}",
                workers.root_volume_gb
            )));
        }
        validate_labels("workers.labels", &workers.labels)?;
    }

    if let Some(ha) = &cluster.ha {
        match ha.etcd_topology.as_str() {
            "stacked" => {}
            "external" => {
                return Err(HolodeckError::ConfigInvalid(
                    "etcdTopology \"external\" is not yet supported".to_string(),
                ));
            }
            other => {
                return Err(HolodeckError::ConfigInvalid(format!(
                    "unknown etcdTopology {other:?}: expected \"stacked\""
                )));
            }
        }
        if !matches!(ha.load_balancer_type.as_str(), "nlb" | "alb") {
            return Err(HolodeckError::ConfigInvalid(format!(
                "unknown loadBalancerType {:?}: expected \"nlb\" or \"alb\"",
                ha.load_balancer_type
            )));
        }
        if ha.enabled {
            if cp.count < 3 {
                return Err(HolodeckError::ConfigInvalid(format!(
                    "HA requires at least 3 control planes, got {}",
                    cp.count
                )));
            }
            if cp.count % 2 == 0 {
                return Err(HolodeckError::ConfigInvalid(format!(
                    "HA requires an odd number of control planes, got {}",
                    cp.count
                )));
            }
        }
    }

    Ok(())
}

/// Check every label key and non-empty value against the label regex.
pub fn validate_labels(path: &str, labels: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in labels {
        if !LABEL_RE.is_match(key) {
            return Err(HolodeckError::ConfigInvalid(format!(
                "{path}: label key {key:?} contains disallowed characters"
            )));
        }
        if !value.is_empty() && !LABEL_RE.is_match(value) {
            return Err(HolodeckError::ConfigInvalid(format!(
                "{path}: label value {value:?} for key {key:?} contains disallowed characters"
            )));
        }
    }
    Ok(())
}

fn validate_driver_source(driver: &super::types::DriverSpec) -> Result<()> {
    match driver.source {
        SourceKind::Package => Ok(()),
        SourceKind::Runfile => {
            if driver.url.as_deref().unwrap_or_default().is_empty() {
                return Err(HolodeckError::ConfigInvalid(
                    "nvidiaDriver: runfile source requires a url".to_string(),
                ));
            }
            Ok(())
        }
        SourceKind::Git => {
            if driver.git_ref.as_deref().unwrap_or_default().is_empty() {
                return Err(HolodeckError::ConfigInvalid(
                    "nvidiaDriver: git source requires a ref".to_string(),
                ));
            }
            Ok(())
        }
        other => Err(HolodeckError::ConfigInvalid(format!(
            "nvidiaDriver: source {:?} is not supported (package, runfile or git)",
            other.as_str()
        ))),
    }
}

fn validate_runtime(runtime: &RuntimeSpec) -> Result<()> {
    if !matches!(runtime.name.as_str(), "" | "docker" | "containerd" | "crio") {
        return Err(HolodeckError::ConfigInvalid(format!(
            "containerRuntime: unknown runtime {:?} (docker, containerd or crio)",
            runtime.name
        )));
    }
    match runtime.source {
        SourceKind::Package | SourceKind::Latest => Ok(()),
        SourceKind::Git => {
            if runtime.git_ref.as_deref().unwrap_or_default().is_empty() {
                return Err(HolodeckError::ConfigInvalid(
                    "containerRuntime: git source requires a ref".to_string(),
                ));
            }
            Ok(())
        }
        other => Err(HolodeckError::ConfigInvalid(format!(
            "containerRuntime: source {:?} is not supported (package, git or latest)",
            other.as_str()
        ))),
    }
}

fn validate_toolkit(toolkit: &ToolkitSpec) -> Result<()> {
    if !matches!(toolkit.channel.as_str(), "stable" | "experimental") {
        return Err(HolodeckError::ConfigInvalid(format!(
            "nvidiaContainerToolkit: unknown channel {:?} (stable or experimental)",
            toolkit.channel
        )));
    }
    match toolkit.source {
        SourceKind::Package | SourceKind::Latest => Ok(()),
        SourceKind::Git => {
            if toolkit.git_ref.as_deref().unwrap_or_default().is_empty() {
                return Err(HolodeckError::ConfigInvalid(
                    "nvidiaContainerToolkit: git source requires a ref".to_string(),
                ));
            }
            Ok(())
        }
        other => Err(HolodeckError::ConfigInvalid(format!(
            "nvidiaContainerToolkit: source {:?} is not supported (package, git or latest)",
            other.as_str()
        ))),
    }
}

fn validate_kubernetes(kubernetes: &KubernetesSpec) -> Result<()> {
    if !matches!(
        kubernetes.installer.as_str(),
        "kubeadm" | "kind" | "microk8s"
    ) {
        return Err(HolodeckError::ConfigInvalid(format!(
            "kubernetes: unknown installer {:?} (kubeadm, kind or microk8s)",
            kubernetes.installer
        )));
    }
    if kubernetes.installer == "microk8s" && kubernetes.source.needs_resolution() {
        return Err(HolodeckError::ConfigInvalid(format!(
            "kubernetes: microk8s cannot be installed from source {:?}",
            kubernetes.source.as_str()
        )));
    }
    match kubernetes.source {
        SourceKind::Release => {
            if kubernetes.version.as_deref().unwrap_or_default().is_empty() {
                return Err(HolodeckError::ConfigInvalid(
                    "kubernetes: release source requires a version".to_string(),
                ));
            }
            Ok(())
        }
        SourceKind::Latest => Ok(()),
        SourceKind::Git => {
            if kubernetes.git_ref.as_deref().unwrap_or_default().is_empty() {
                return Err(HolodeckError::ConfigInvalid(
                    "kubernetes: git source requires a ref".to_string(),
                ));
            }
            Ok(())
        }
        other => Err(HolodeckError::ConfigInvalid(format!(
            "kubernetes: source {:?} is not supported (release, git or latest)",
            other.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_spec(yaml: &str) -> EnvironmentSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn expect_invalid(spec: &EnvironmentSpec, needle: &str) {
        match validate(spec) {
            Err(HolodeckError::ConfigInvalid(message)) => {
                assert!(
                    message.contains(needle),
                    "message {message:?} does not mention {needle:?}"
                );
            }
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_even_control_plane_count_rejected() {
        let spec = cluster_spec(
            r#"
name: even
cluster:
  region: us-west-2
  controlPlane:
    count: 2
"#,
        );
        expect_invalid(&spec, "odd number");
    }

    #[test]
    fn test_control_plane_count_bounds() {
        let spec = cluster_spec(
            r#"
name: nine
cluster:
  region: us-west-2
  controlPlane:
    count: 9
"#,
        );
        expect_invalid(&spec, "between 1 and 7");

        let spec = cluster_spec(
            r#"
name: zero
cluster:
  region: us-west-2
  controlPlane:
    count: 0
"#,
        );
        expect_invalid(&spec, "between 1 and 7");
    }

    #[test]
    fn test_worker_count_zero_valid_negative_rejected() {
        let valid = cluster_spec(
            r#"
name: wzero
cluster:
  region: us-west-2
  controlPlane: {}
  workers:
    count: 0
"#,
        );
        assert!(validate(&valid).is_ok());

        let invalid = cluster_spec(
            r#"
name: wneg
cluster:
  region: us-west-2
  controlPlane: {}
  workers:
    count: -1
"#,
        );
        expect_invalid(&invalid, "negative");
    }

    #[test]
    fn test_root_volume_minimum_both_pools() {
        let spec = cluster_spec(
            r#"
name: smallcp
cluster:
  region: us-west-2
  controlPlane:
    rootVolumeGb: 19
"#,
        );
        expect_invalid(&spec, "at least 20");

        let spec = cluster_spec(
            r#"
name: smallw
cluster:
  region: us-west-2
  controlPlane: {}
  workers:
    count: 1
    rootVolumeGb: 10
"#,
        );
        expect_invalid(&spec, "at least 20");
    }

    #[test]
    fn test_etcd_topology_external_and_unknown_rejected() {
        let spec = cluster_spec(
            r#"
name: ext
cluster:
  region: us-west-2
  controlPlane:
    count: 3
  ha:
    enabled: true
    etcdTopology: external
"#,
        );
        expect_invalid(&spec, "not yet supported");

        let spec = cluster_spec(
            r#"
name: unk
cluster:
  region: us-west-2
  controlPlane:
    count: 3
  ha:
    enabled: true
    etcdTopology: sideways
"#,
        );
        expect_invalid(&spec, "unknown etcdTopology");
    }

    #[test]
    fn test_ha_needs_three_odd_control_planes() {
        let spec = cluster_spec(
            r#"
name: haone
cluster:
  region: us-west-2
  controlPlane:
    count: 1
  ha:
    enabled: true
"#,
        );
        expect_invalid(&spec, "at least 3");

        let spec = cluster_spec(
            r#"
name: hathree
cluster:
  region: us-west-2
  controlPlane:
    count: 3
  ha:
    enabled: true
"#,
        );
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn test_label_regex_barrier() {
        assert!(LABEL_RE.is_match("nvidia.com/gpu"));
        assert!(LABEL_RE.is_match("a"));
        assert!(LABEL_RE.is_match("tier-1"));
        assert!(!LABEL_RE.is_match("$(reboot)"));
        assert!(!LABEL_RE.is_match("a;b"));
        assert!(!LABEL_RE.is_match("-leading"));
        assert!(!LABEL_RE.is_match("trailing-"));

        let spec = cluster_spec(
            r#"
name: badlabel
cluster:
  region: us-west-2
  controlPlane:
    labels:
      "ok-key": "$(id)"
"#,
        );
        expect_invalid(&spec, "disallowed characters");
    }

    #[test]
    fn test_git_source_requires_ref() {
        let spec = cluster_spec(
            r#"
name: noref
instance:
  region: us-west-2
nvidiaContainerToolkit:
  install: true
  source: git
"#,
        );
        expect_invalid(&spec, "requires a ref");
    }

    #[test]
    fn test_runfile_requires_url_release_requires_version() {
        let spec = cluster_spec(
            r#"
name: nourl
instance:
  region: us-west-2
nvidiaDriver:
  install: true
  source: runfile
"#,
        );
        expect_invalid(&spec, "requires a url");

        let spec = cluster_spec(
            r#"
name: nover
instance:
  region: us-west-2
kubernetes:
  install: true
  source: release
"#,
        );
        expect_invalid(&spec, "requires a version");
    }

    #[test]
    fn test_microk8s_with_git_source_rejected() {
        let spec = cluster_spec(
            r#"
name: micro
instance:
  region: us-west-2
kubernetes:
  install: true
  installer: microk8s
  source: git
  ref: master
"#,
        );
        expect_invalid(&spec, "microk8s");
    }

    #[test]
    fn test_missing_instance_and_cluster_rejected() {
        let spec = cluster_spec("name: empty\n");
        expect_invalid(&spec, "instance or a cluster");
    }
}
