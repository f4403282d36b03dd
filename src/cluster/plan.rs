//! Install-step planner
//!
//! Derives the ordered list of install steps for a single node from the
//! environment spec, together with the effective spec the templates render
//! against (runtime defaults resolved, KIND's Docker requirement applied).

use crate::config::{EnvironmentSpec, RuntimeSpec, SourceKind};
use crate::errors::{HolodeckError, Result};

/// Minimum Docker package version whose engine speaks Docker API v1.44,
/// required by KIND when built from source.
pub const MIN_DOCKER_VERSION: &str = "25.0.3";

/// The closed set of install steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Kernel,
    NvDriver,
    Docker,
    Containerd,
    Crio,
    Kubeadm,
    Kind,
    Microk8s,
    ContainerToolkit,
}

impl InstallStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStep::Kernel => "kernel",
            InstallStep::NvDriver => "nvdriver",
            InstallStep::Docker => "docker",
            InstallStep::Containerd => "containerd",
            InstallStep::Crio => "crio",
            InstallStep::Kubeadm => "kubeadm",
            InstallStep::Kind => "kind",
            InstallStep::Microk8s => "microk8s",
            InstallStep::ContainerToolkit => "containerToolkit",
        }
    }

    /// Steps that reboot the host partway through
    pub fn expects_reboot(&self) -> bool {
        matches!(self, InstallStep::Kernel)
    }

    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            InstallStep::Docker | InstallStep::Containerd | InstallStep::Crio
        )
    }
}

/// An ordered plan plus the effective spec it was derived from.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub steps: Vec<InstallStep>,
    pub spec: EnvironmentSpec,
}

/// Derive the install plan for one node.
///
/// `include_kubernetes` is false during base provisioning (phase 1), where
/// kernel/driver/runtime/toolkit are installed but the Kubernetes step is
/// deferred to a later phase.
pub fn plan(spec: &EnvironmentSpec, include_kubernetes: bool) -> Result<InstallPlan> {
    let mut effective = spec.clone();
    let mut steps = Vec::new();

    let installer = spec
        .kubernetes
        .as_ref()
        .filter(|k| k.install)
        .map(|k| k.installer.as_str())
        .unwrap_or_default();

    // MicroK8s bundles its runtime and replaces the whole plan
    if installer == "microk8s" {
        let kubernetes = effective.kubernetes.as_ref().expect("checked above");
        if kubernetes.source.needs_resolution() {
            return Err(HolodeckError::ConfigInvalid(format!(
                "microk8s cannot be installed from source {:?}",
                kubernetes.source.as_str()
            )));
        }
        return Ok(InstallPlan {
            steps: if include_kubernetes {
                vec![InstallStep::Microk8s]
            } else {
                Vec::new()
            },
            spec: effective,
        });
    }

    if spec.kernel_requested() {
        steps.push(InstallStep::Kernel);
    }

    if spec.driver_requested() {
        steps.push(InstallStep::NvDriver);
    }

    // KIND built from source needs a Docker new enough for API v1.44,
    // whatever runtime the user asked for
    if installer == "kind" {
        let kubernetes = effective.kubernetes.as_ref().expect("checked above");
        if kubernetes.source.needs_resolution() {
            force_docker_runtime(&mut effective);
        }
    }

    if effective.runtime_requested() {
        let runtime = effective
            .container_runtime
            .as_mut()
            .expect("runtime_requested implies a runtime block");
        if runtime.name.is_empty() {
            runtime.name = "containerd".to_string();
        }
        let step = match runtime.name.as_str() {
            "docker" => InstallStep::Docker,
            "containerd" => InstallStep::Containerd,
            "crio" => InstallStep::Crio,
            other => {
                return Err(HolodeckError::ConfigInvalid(format!(
                    "unknown container runtime {other:?}"
                )));
            }
        };
        steps.push(step);
    }

    if spec.toolkit_requested() {
        if !steps.iter().any(InstallStep::is_runtime) {
            return Err(HolodeckError::ConfigInvalid(
                "nvidiaContainerToolkit requires a container runtime install".to_string(),
            ));
        }
        steps.push(InstallStep::ContainerToolkit);
    }

    if include_kubernetes && spec.kubernetes_requested() {
        let step = match installer {
            "kubeadm" | "" => InstallStep::Kubeadm,
            "kind" => InstallStep::Kind,
            other => {
                return Err(HolodeckError::ConfigInvalid(format!(
                    "unknown kubernetes installer {other:?}"
                )));
            }
        };
        steps.push(step);
    }

    Ok(InstallPlan {
        steps,
        spec: effective,
    })
}

/// Force Docker as the runtime with at least the minimum package version,
/// unless the user pinned a version themselves.
fn force_docker_runtime(spec: &mut EnvironmentSpec) {
    let runtime = spec.container_runtime.get_or_insert_with(|| RuntimeSpec {
        install: true,
        name: String::new(),
        source: SourceKind::Package,
        version: None,
        repository: None,
        git_ref: None,
        branch: None,
    });
    runtime.install = true;
    runtime.name = "docker".to_string();
    if runtime.version.is_none() {
        runtime.version = Some(MIN_DOCKER_VERSION.to_string());
    }
}
