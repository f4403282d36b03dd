//! Declarative environment spec types
//!
//! These mirror the on-disk YAML format: a provider, SSH auth material,
//! either a single instance or a cluster block, and one optional block per
//! installable component. Field names follow the file format (camelCase).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root of the declarative environment file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Environment name; drives the cache file path, unique within a run
    pub name: String,

    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default)]
    pub auth: AuthSpec,

    /// Single-node environment. Ignored when `cluster` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceSpec>,

    /// Multi-node environment. Takes precedence over `instance`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvidia_driver: Option<DriverSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<RuntimeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvidia_container_toolkit: Option<ToolkitSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerSpec>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EnvironmentSpec {
    /// Whether this environment models a multi-node cluster
    pub fn is_cluster(&self) -> bool {
        self.cluster.is_some()
    }

    pub fn kernel_requested(&self) -> bool {
        self.kernel.as_ref().is_some_and(|k| !k.version.is_empty())
    }

    pub fn driver_requested(&self) -> bool {
        self.nvidia_driver.as_ref().is_some_and(|d| d.install)
    }

    pub fn runtime_requested(&self) -> bool {
        self.container_runtime.as_ref().is_some_and(|r| r.install)
    }

    pub fn toolkit_requested(&self) -> bool {
        self.nvidia_container_toolkit
            .as_ref()
            .is_some_and(|t| t.install)
    }

    pub fn kubernetes_requested(&self) -> bool {
        self.kubernetes.as_ref().is_some_and(|k| k.install)
    }
}

/// Which driver creates the underlying machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Aws,
    /// Bring-your-own host(s) reachable over SSH
    Ssh,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Ssh => "ssh",
        }
    }
}

/// SSH authentication material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Cloud key-pair name (provider side)
    #[serde(default)]
    pub key_name: String,

    /// Remote username; per-node overrides take precedence
    #[serde(default = "default_username")]
    pub username: String,

    /// Path to the public key uploaded to the provider
    #[serde(default)]
    pub public_key: String,

    /// Path to the private key used for SSH sessions
    #[serde(default)]
    pub private_key: String,
}

impl Default for AuthSpec {
    fn default() -> Self {
        Self {
            key_name: String::new(),
            username: default_username(),
            public_key: String::new(),
            private_key: String::new(),
        }
    }
}

/// Single-node environment block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default)]
    pub region: String,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    /// OS id looked up in the image registry (e.g. "ubuntu22.04")
    #[serde(default = "default_os")]
    pub os: String,

    /// Explicit image id; skips the registry lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default = "default_root_volume_gb")]
    pub root_volume_gb: i64,
}

/// Multi-node cluster block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub region: String,

    pub control_plane: ControlPlaneSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ha: Option<HaSpec>,
}

impl ClusterSpec {
    /// Whether HA is requested and enabled
    pub fn ha_enabled(&self) -> bool {
        self.ha.as_ref().is_some_and(|ha| ha.enabled)
    }
}

/// Control-plane machine pool.
///
/// Counts are signed so an out-of-range value reaches the validator instead
/// of failing deep inside serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    #[serde(default = "default_control_plane_count")]
    pub count: i64,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    #[serde(default = "default_os")]
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Keep the NoSchedule taint so workloads never land on control planes
    #[serde(default)]
    pub dedicated: bool,

    #[serde(default = "default_root_volume_gb")]
    pub root_volume_gb: i64,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for ControlPlaneSpec {
    fn default() -> Self {
        Self {
            count: default_control_plane_count(),
            instance_type: default_instance_type(),
            os: default_os(),
            image: None,
            dedicated: false,
            root_volume_gb: default_root_volume_gb(),
            labels: BTreeMap::new(),
        }
    }
}

/// Worker machine pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    #[serde(default)]
    pub count: i64,

    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    #[serde(default = "default_os")]
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default = "default_root_volume_gb")]
    pub root_volume_gb: i64,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// High-availability control plane configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HaSpec {
    #[serde(default)]
    pub enabled: bool,

    /// "stacked" is the only supported topology; "external" is rejected
    #[serde(default = "default_etcd_topology")]
    pub etcd_topology: String,

    /// "nlb" or "alb"
    #[serde(default = "default_lb_type")]
    pub load_balancer_type: String,
}

/// Optional standalone load-balancer block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    #[serde(default = "default_lb_type", rename = "type")]
    pub lb_type: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// How a component's payload is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Distribution package from the component's package repository
    Package,
    /// Self-contained installer downloaded from a URL
    Runfile,
    /// Released binaries for an explicit version
    Release,
    /// Build from a git ref
    Git,
    /// Track a branch; commit resolved at provision time
    Latest,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Package => "package",
            SourceKind::Runfile => "runfile",
            SourceKind::Release => "release",
            SourceKind::Git => "git",
            SourceKind::Latest => "latest",
        }
    }

    /// Sources whose ref must be resolved against the remote before rendering
    pub fn needs_resolution(&self) -> bool {
        matches!(self, SourceKind::Git | SourceKind::Latest)
    }
}

/// Kernel install intent. Setting a version forces a reboot step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelSpec {
    pub version: String,
}

/// NVIDIA driver install intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSpec {
    #[serde(default = "default_true")]
    pub install: bool,

    #[serde(default = "default_source_package")]
    pub source: SourceKind,

    /// Package pin or runfile driver version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Runfile download URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Optional SHA-256 checksum for the runfile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default = "default_driver_repository")]
    pub repository: String,

    /// Tag, branch, PR ref or commit for git builds
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    /// Branch tracked by `latest`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Container runtime install intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    #[serde(default = "default_true")]
    pub install: bool,

    /// "docker", "containerd" or "crio"; empty defaults to containerd
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_source_package")]
    pub source: SourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// NVIDIA Container Toolkit install intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolkitSpec {
    #[serde(default = "default_true")]
    pub install: bool,

    #[serde(default = "default_source_package")]
    pub source: SourceKind,

    /// Package channel: "stable" or "experimental"
    #[serde(default = "default_toolkit_channel")]
    pub channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "default_toolkit_repository")]
    pub repository: String,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Generate a CDI spec after install
    #[serde(default)]
    pub enable_cdi: bool,

    /// Extra make targets for source builds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub make_targets: Vec<String>,

    /// Extra environment for source builds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Kubernetes install intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    #[serde(default = "default_true")]
    pub install: bool,

    /// "kubeadm", "kind" or "microk8s"
    #[serde(default = "default_installer")]
    pub installer: String,

    #[serde(default = "default_source_release")]
    pub source: SourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "default_kubernetes_repository")]
    pub repository: String,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default = "default_pod_network_cidr")]
    pub pod_network_cidr: String,

    /// Comma-separated feature gates passed through to kubeadm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_gates: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Enable file logging
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log file path template (supports {env_name} placeholder)
    #[serde(default = "default_log_file")]
    pub file: String,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_username() -> String {
    "ubuntu".to_string()
}

fn default_instance_type() -> String {
    "g4dn.xlarge".to_string()
}

fn default_os() -> String {
    "ubuntu22.04".to_string()
}

fn default_root_volume_gb() -> i64 {
    64
}

fn default_control_plane_count() -> i64 {
    1
}

fn default_etcd_topology() -> String {
    "stacked".to_string()
}

fn default_lb_type() -> String {
    "nlb".to_string()
}

fn default_api_port() -> u16 {
    6443
}

fn default_source_package() -> SourceKind {
    SourceKind::Package
}

fn default_source_release() -> SourceKind {
    SourceKind::Release
}

fn default_installer() -> String {
    "kubeadm".to_string()
}

fn default_driver_repository() -> String {
    "https://github.com/NVIDIA/open-gpu-kernel-modules".to_string()
}

fn default_toolkit_channel() -> String {
    "stable".to_string()
}

fn default_toolkit_repository() -> String {
    "https://github.com/NVIDIA/nvidia-container-toolkit".to_string()
}

fn default_kubernetes_repository() -> String {
    "https://github.com/kubernetes/kubernetes".to_string()
}

fn default_pod_network_cidr() -> String {
    "10.244.0.0/16".to_string()
}

fn default_log_file() -> String {
    "/tmp/holodeck-{env_name}.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_spec_parses_with_defaults() {
        let yaml = r#"
name: ci-smoke
provider: aws
cluster:
  region: us-west-2
  controlPlane:
    instanceType: g4dn.xlarge
"#;
        let spec: EnvironmentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "ci-smoke");
        assert_eq!(spec.provider, ProviderKind::Aws);
        let cluster = spec.cluster.unwrap();
        assert_eq!(cluster.control_plane.count, 1);
        assert_eq!(cluster.control_plane.os, "ubuntu22.04");
        assert_eq!(cluster.control_plane.root_volume_gb, 64);
        assert!(!cluster.ha_enabled());
        assert_eq!(spec.auth.username, "ubuntu");
    }

    #[test]
    fn test_component_defaults() {
        let yaml = r#"
name: comp
instance:
  region: eu-north-1
nvidiaDriver:
  install: true
kubernetes:
  install: true
"#;
        let spec: EnvironmentSpec = serde_yaml::from_str(yaml).unwrap();
        let driver = spec.nvidia_driver.unwrap();
        assert_eq!(driver.source, SourceKind::Package);
        assert!(driver.repository.contains("open-gpu-kernel-modules"));
        let k8s = spec.kubernetes.unwrap();
        assert_eq!(k8s.installer, "kubeadm");
        assert_eq!(k8s.source, SourceKind::Release);
        assert_eq!(k8s.pod_network_cidr, "10.244.0.0/16");
    }

    #[test]
    fn test_negative_worker_count_reaches_the_validator() {
        // Counts deserialize as signed so the validator owns the error message
        let yaml = r#"
name: neg
cluster:
  region: us-west-2
  controlPlane: {}
  workers:
    count: -1
"#;
        let spec: EnvironmentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.cluster.unwrap().workers.unwrap().count, -1);
    }

    #[test]
    fn test_ref_field_uses_wire_name() {
        let yaml = r#"
name: refs
instance:
  region: us-east-1
nvidiaContainerToolkit:
  install: true
  source: git
  ref: v1.17.3
"#;
        let spec: EnvironmentSpec = serde_yaml::from_str(yaml).unwrap();
        let toolkit = spec.nvidia_container_toolkit.unwrap();
        assert_eq!(toolkit.source, SourceKind::Git);
        assert_eq!(toolkit.git_ref.as_deref(), Some("v1.17.3"));
    }
}
