//! Cluster orchestration
//!
//! The outer state machine that turns a fleet of bare instances into a
//! running Kubernetes cluster:
//! - `plan` - ordered install steps per node
//! - `bootstrap` - fresh join credentials after kubeadm init
//! - `health` - kubectl-based health reporting
//!
//! Phases run strictly in order; all nodes must finish a phase before the
//! next begins. On any failure the run halts, the environment is marked
//! Degraded, and the partial cluster is left in place for inspection.

pub mod bootstrap;
pub mod health;
pub mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{expand_home, EnvironmentSpec, SourceKind};
use crate::environment::{
    set_condition, CacheFile, ClusterPhase, ComponentKind, ComponentProvenance, ConditionType,
    Environment, NodePhase, NodeRole, NodeStatus,
};
use crate::errors::{HolodeckError, Result};
use crate::output::OutputLine;
use crate::provider::NodeHandle;
use crate::provision::validate::{checked, NODE_NAME_RE};
use crate::provision::{ResolvedComponents, ScriptRenderer};
use crate::resolver::RefResolver;
use crate::ssh::{KnownHostsStore, RemoteExecutor, SshConfig};

use bootstrap::JoinCredentials;
use health::HealthReport;
use plan::InstallPlan;

/// Ready wait: 30 polls, 10 seconds apart (5 minutes).
const READY_WAIT_ATTEMPTS: u32 = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(10);

const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
const KUBEADM_CONFIG_PATH: &str = "/etc/kubernetes/kubeadm-config.yaml";
const KIND_CONFIG_PATH: &str = "/etc/kubernetes/kind.yaml";

/// Label stamped onto every node of a managed cluster.
const MANAGED_LABEL: &str = "nvidia.com/holodeck.managed=true";

/// Owns an Environment for the duration of a provisioning run.
pub struct ClusterOrchestrator {
    env: Environment,
    cache: CacheFile,
    renderer: ScriptRenderer,
    resolver: RefResolver,
    known_hosts: Arc<KnownHostsStore>,
    private_key: PathBuf,
    kubeconfig_out: Option<PathBuf>,
    cache_root: Option<PathBuf>,
    output: mpsc::Sender<OutputLine>,
    cancel: CancellationToken,
}

impl ClusterOrchestrator {
    pub fn new(
        env: Environment,
        cache: CacheFile,
        cache_root: Option<PathBuf>,
        kubeconfig_out: Option<PathBuf>,
        output: mpsc::Sender<OutputLine>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let private_key = expand_home(Path::new(&env.spec.auth.private_key))
            .map_err(|e| HolodeckError::ConfigInvalid(e.to_string()))?;
        let known_hosts = Arc::new(KnownHostsStore::open(cache_root.as_deref())?);
        Ok(Self {
            env,
            cache,
            renderer: ScriptRenderer::new()?,
            resolver: RefResolver::new(),
            known_hosts,
            private_key,
            kubeconfig_out,
            cache_root,
            output,
            cancel,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn into_environment(self) -> Environment {
        self.env
    }

    /// Record the fleet the provider created and fix the control-plane
    /// endpoint for the lifetime of the run.
    pub fn adopt_nodes(
        &mut self,
        nodes: Vec<NodeHandle>,
        load_balancer_dns: Option<String>,
    ) -> Result<()> {
        let cluster = self.env.status.cluster.get_or_insert_with(Default::default);
        cluster.nodes = nodes
            .into_iter()
            .map(|handle| NodeStatus {
                name: handle.name,
                role: handle.role,
                instance_id: handle.instance_id,
                public_ip: handle.public_ip,
                private_ip: handle.private_ip,
                ssh_username: handle.ssh_username,
                phase: NodePhase::Pending,
                message: String::new(),
            })
            .collect();
        cluster.load_balancer_dns = load_balancer_dns.unwrap_or_default();
        cluster.total_nodes = cluster.nodes.len();
        cluster.ready_nodes = 0;
        cluster.phase = ClusterPhase::Creating;

        let endpoint = cluster.select_endpoint().ok_or_else(|| {
            HolodeckError::ConfigInvalid("fleet contains no control-plane node".to_string())
        })?;
        cluster.control_plane_endpoint = endpoint;

        self.persist()?;
        Ok(())
    }

    /// Run the full provisioning state machine.
    pub async fn provision(&mut self) -> Result<()> {
        let node_count = self
            .env
            .status
            .cluster
            .as_ref()
            .map(|c| c.nodes.len())
            .unwrap_or(0);
        if node_count == 0 {
            return Err(HolodeckError::ConfigInvalid(
                "environment has no provisioned nodes; run `holodeck create` first".to_string(),
            ));
        }

        // An unchanged, already-Ready environment reprovisions to nothing;
        // returning before any transition keeps the cache file untouched
        let already_ready = self
            .env
            .status
            .cluster
            .as_ref()
            .is_some_and(|c| c.phase == ClusterPhase::Ready)
            && self
                .env
                .status
                .conditions
                .iter()
                .any(|c| c.condition_type == ConditionType::Available && c.status);
        if already_ready {
            let _ = self
                .output
                .send(OutputLine::info("environment is already Ready; nothing to do"))
                .await;
            return Ok(());
        }

        let installer = self.installer().to_string();
        if self.env.spec.is_cluster() && self.env.spec.kubernetes_requested() && installer != "kubeadm"
        {
            return Err(HolodeckError::ConfigInvalid(format!(
                "multi-node clusters require the kubeadm installer, not {installer:?}"
            )));
        }

        let resolved = self.resolve_components().await?;

        // Phase 1: base provisioning (kernel, driver, runtime, toolkit)
        let base_plan = plan::plan(&self.env.spec, false)?;
        self.transition(
            ConditionType::Progressing,
            "BaseProvisioning",
            "installing kernel, driver, runtime and toolkit",
            ClusterPhase::Provisioning,
        )?;
        for index in 0..node_count {
            self.run_phase_on_node(index, "base-provisioning", &base_plan, &resolved)
                .await?;
        }

        if !self.env.spec.kubernetes_requested() {
            self.mark_ready()?;
            return Ok(());
        }

        // Phase 2: Kubernetes prerequisites (binaries for the selected
        // version or commit); for kind/microk8s this step brings the whole
        // cluster up on the single node
        let full_plan = plan::plan(&self.env.spec, true)?;
        let kubernetes_plan = InstallPlan {
            steps: full_plan.steps[base_plan.steps.len()..].to_vec(),
            spec: full_plan.spec.clone(),
        };
        self.transition(
            ConditionType::Progressing,
            "KubernetesPrerequisites",
            "installing kubernetes components",
            ClusterPhase::Provisioning,
        )?;
        if installer == "kind" {
            let kind_config = self.renderer.render_kind_config(&full_plan.spec)?;
            let node = self.node(0).clone();
            self.executor_for(&node)
                .upload(&node.name, kind_config.into_bytes(), KIND_CONFIG_PATH)
                .await
                .map_err(|e| self.degrade(&node.name, "kubernetes-prerequisites", e))?;
        }
        for index in 0..node_count {
            self.run_phase_on_node(index, "kubernetes-prerequisites", &kubernetes_plan, &resolved)
                .await?;
        }

        match installer.as_str() {
            "kubeadm" => self.bootstrap_kubeadm_cluster(&full_plan.spec).await?,
            // kind and microk8s created the cluster in phase 2
            _ => self.fetch_kubeconfig(&installer).await?,
        }

        self.mark_ready()?;
        Ok(())
    }

    /// Phases 3-5: init the first control plane, mint credentials, join the
    /// remaining nodes, then label, taint and wait for Ready.
    async fn bootstrap_kubeadm_cluster(&mut self, spec: &EnvironmentSpec) -> Result<()> {
        let ha = spec.cluster.as_ref().is_some_and(|c| c.ha_enabled());
        let endpoint = self.cluster().control_plane_endpoint.clone();
        let first = self.first_control_plane()?;

        // Phase 3: first control-plane init
        self.transition(
            ConditionType::Progressing,
            "ControlPlaneInit",
            "initialising the first control plane",
            ClusterPhase::Provisioning,
        )?;
        {
            let node = self.node(first).clone();
            let executor = self.executor_for(&node);
            let kubeadm_config =
                self.renderer
                    .render_kubeadm_config(spec, &endpoint, &node.private_ip, ha)?;
            let init_script = self.renderer.render_init_script(ha)?;

            let result = async {
                executor
                    .upload(&node.name, kubeadm_config.into_bytes(), KUBEADM_CONFIG_PATH)
                    .await?;
                executor
                    .run_script(&node.name, &init_script, false, self.output.clone())
                    .await
            }
            .await;
            result.map_err(|e| self.degrade(&node.name, "control-plane-init", e))?;
        }

        // Phase 4: fresh join credentials, in memory only
        let credentials = {
            let node = self.node(first).clone();
            let executor = self.executor_for(&node);
            bootstrap::mint_credentials(&executor, &node.name, ha)
                .await
                .map_err(|e| self.degrade(&node.name, "credential-extraction", e))?
        };

        // Phase 5: joins (control planes strictly before workers), then
        // labels, taints and the bounded Ready wait
        self.transition(
            ConditionType::Progressing,
            "JoiningNodes",
            "joining remaining control planes and workers",
            ClusterPhase::Provisioning,
        )?;
        let joiners: Vec<usize> = self
            .control_plane_indices()
            .into_iter()
            .skip(1)
            .chain(self.worker_indices())
            .collect();
        for index in joiners {
            self.join_node(index, &endpoint, &credentials).await?;
        }

        drop(credentials);

        let node = self.node(first).clone();
        self.configure_nodes(&node)
            .await
            .map_err(|e| self.degrade(&node.name, "node-configuration", e))?;
        self.wait_for_ready(&node)
            .await
            .map_err(|e| self.degrade(&node.name, "ready-wait", e))?;
        self.fetch_kubeconfig("kubeadm").await?;
        Ok(())
    }

    /// Run one plan on one node, streaming output and updating its phase.
    async fn run_phase_on_node(
        &mut self,
        index: usize,
        phase: &str,
        install_plan: &InstallPlan,
        resolved: &ResolvedComponents,
    ) -> Result<()> {
        if install_plan.steps.is_empty() {
            return Ok(());
        }
        self.set_node_phase(index, NodePhase::Provisioning, phase)?;

        let node = self.node(index).clone();
        let executor = self.executor_for(&node);
        let _ = self
            .output
            .send(OutputLine::info(format!(
                "[{}] {phase}: {}",
                node.name,
                install_plan
                    .steps
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
            .await;

        for step in &install_plan.steps {
            if self.cancel.is_cancelled() {
                return Err(HolodeckError::Cancelled);
            }
            tracing::info!(node = %node.name, step = step.as_str(), "running install step");
            let script = self
                .renderer
                .render_step(*step, &install_plan.spec, resolved)?;
            executor
                .run_script(&node.name, &script, step.expects_reboot(), self.output.clone())
                .await
                .map_err(|e| self.degrade(&node.name, phase, e))?;
        }

        self.set_node_phase(index, NodePhase::Running, phase)?;
        Ok(())
    }

    async fn join_node(
        &mut self,
        index: usize,
        endpoint: &str,
        credentials: &JoinCredentials,
    ) -> Result<()> {
        let node = self.node(index).clone();
        let control_plane = node.role == NodeRole::ControlPlane;
        let script = self.renderer.render_join_script(
            endpoint,
            &credentials.token,
            &credentials.ca_cert_hash,
            credentials.certificate_key.as_deref(),
            control_plane,
        )?;

        let _ = self
            .output
            .send(OutputLine::info(format!(
                "[{}] joining as {}",
                node.name,
                node.role.as_str()
            )))
            .await;

        let executor = self.executor_for(&node);
        executor
            .run_script(&node.name, &script, false, self.output.clone())
            .await
            .map_err(|e| self.degrade(&node.name, "join", e))?;
        self.set_node_phase(index, NodePhase::Running, "join")?;
        Ok(())
    }

    /// Label every node, apply role labels, and handle the control-plane
    /// taint according to the dedicated flag.
    async fn configure_nodes(&mut self, control_plane: &NodeStatus) -> Result<()> {
        let executor = self.executor_for(control_plane);
        let kubectl = format!("sudo kubectl --kubeconfig {ADMIN_KUBECONFIG}");

        let table = executor
            .capture(
                &control_plane.name,
                &format!("{kubectl} get nodes -o wide"),
            )
            .await?;
        let cluster_nodes = health::parse_nodes_wide(&table);
        if cluster_nodes.is_empty() {
            return Err(HolodeckError::ClusterBootstrap {
                node: control_plane.name.clone(),
                phase: "node-configuration".to_string(),
                message: "kubectl reported no nodes after join".to_string(),
            });
        }

        let (cp_labels, worker_labels, dedicated) = match &self.env.spec.cluster {
            Some(cluster) => (
                cluster.control_plane.labels.clone(),
                cluster
                    .workers
                    .as_ref()
                    .map(|w| w.labels.clone())
                    .unwrap_or_default(),
                cluster.control_plane.dedicated,
            ),
            None => (Default::default(), Default::default(), false),
        };
        // The labels were validated at load time; re-check right before they
        // are interpolated into remote commands
        crate::config::validate_labels("controlPlane.labels", &cp_labels)?;
        crate::config::validate_labels("workers.labels", &worker_labels)?;

        let mut commands = Vec::new();
        for cluster_node in &cluster_nodes {
            let name = checked("node name", &cluster_node.name, &NODE_NAME_RE)?;
            commands.push(format!(
                "{kubectl} label node {name} {MANAGED_LABEL} --overwrite"
            ));

            let labels = if cluster_node.is_control_plane() {
                &cp_labels
            } else {
                &worker_labels
            };
            for (key, value) in labels {
                commands.push(format!(
                    "{kubectl} label node {name} {key}={value} --overwrite"
                ));
            }

            // Dedicated control planes keep the default NoSchedule taint
            if cluster_node.is_control_plane() && !dedicated {
                commands.push(format!(
                    "{kubectl} taint nodes {name} node-role.kubernetes.io/control-plane:NoSchedule- || true"
                ));
            }
        }

        for command in commands {
            executor.capture(&control_plane.name, &command).await?;
        }

        let _ = self
            .output
            .send(OutputLine::info("applied node labels and taints"))
            .await;
        Ok(())
    }

    /// Poll until every node reports Ready, bounded by the 5-minute window.
    async fn wait_for_ready(&mut self, control_plane: &NodeStatus) -> Result<()> {
        let executor = self.executor_for(control_plane);
        let kubectl = format!("sudo kubectl --kubeconfig {ADMIN_KUBECONFIG}");
        let expected = self.cluster().nodes.len();

        let _ = self
            .output
            .send(OutputLine::info(format!(
                "waiting for {expected} node(s) to become Ready"
            )))
            .await;

        for attempt in 1..=READY_WAIT_ATTEMPTS {
            if self.cancel.is_cancelled() {
                return Err(HolodeckError::Cancelled);
            }
            let table = executor
                .capture(&control_plane.name, &format!("{kubectl} get nodes -o wide"))
                .await
                .unwrap_or_default();
            let nodes = health::parse_nodes_wide(&table);
            let ready = nodes.iter().filter(|n| n.is_ready()).count();

            if ready >= expected && !nodes.is_empty() {
                let cluster = self.cluster_mut();
                cluster.ready_nodes = ready;
                for node in &mut cluster.nodes {
                    node.phase = NodePhase::Ready;
                }
                self.persist()?;
                return Ok(());
            }

            tracing::debug!(attempt, ready, expected, "nodes not ready yet");
            tokio::select! {
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
                _ = self.cancel.cancelled() => return Err(HolodeckError::Cancelled),
            }
        }

        Err(HolodeckError::ClusterBootstrap {
            node: control_plane.name.clone(),
            phase: "ready-wait".to_string(),
            message: format!(
                "not all nodes became Ready within {} seconds",
                READY_WAIT_ATTEMPTS as u64 * READY_POLL_INTERVAL.as_secs()
            ),
        })
    }

    /// Health check against the first control plane.
    pub async fn health(&self) -> Result<HealthReport> {
        let first = self.first_control_plane()?;
        let node = self.node(first).clone();
        let executor = self.executor_for(&node);
        let kubeconfig = match self.installer() {
            "kubeadm" => ADMIN_KUBECONFIG.to_string(),
            _ => format!("/home/{}/.kube/config", self.username_for(&node)),
        };
        health::check(&executor, &node.name, &kubeconfig).await
    }

    /// Pull the admin kubeconfig back to the operator, rewriting the server
    /// address to the public endpoint, keyed by the node's instance id.
    async fn fetch_kubeconfig(&mut self, installer: &str) -> Result<()> {
        let first = self.first_control_plane()?;
        let node = self.node(first).clone();
        let executor = self.executor_for(&node);

        let command = match installer {
            "kind" => "sudo kind get kubeconfig --name holodeck".to_string(),
            "microk8s" => "sudo microk8s config".to_string(),
            _ => format!("sudo cat {ADMIN_KUBECONFIG}"),
        };
        let content = executor.capture(&node.name, &command).await?;
        let rewritten = rewrite_kubeconfig_server(&content, &node.public_ip)
            .unwrap_or(content);

        let path = match &self.kubeconfig_out {
            Some(path) => path.clone(),
            None => {
                let root = match &self.cache_root {
                    Some(root) => root.clone(),
                    None => dirs::cache_dir().ok_or_else(|| {
                        HolodeckError::ConfigInvalid(
                            "cannot determine user cache directory".to_string(),
                        )
                    })?,
                };
                root.join("holodeck")
                    .join(format!("kubeconfig-{}", node.instance_id))
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HolodeckError::io(parent.to_path_buf(), e))?;
        }
        std::fs::write(&path, rewritten).map_err(|e| HolodeckError::io(path.clone(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)
                .map_err(|e| HolodeckError::io(path.clone(), e))?;
        }

        self.env
            .status
            .properties
            .insert("kubeconfig".to_string(), path.display().to_string());
        let _ = self
            .output
            .send(OutputLine::success(format!(
                "kubeconfig written to {}",
                path.display()
            )))
            .await;
        self.persist()?;
        Ok(())
    }

    /// Resolve git/latest refs for every component ahead of rendering and
    /// record provenance in the status.
    async fn resolve_components(&mut self) -> Result<ResolvedComponents> {
        let mut resolved = ResolvedComponents::new();
        let spec = self.env.spec.clone();

        let mut wanted: Vec<(ComponentKind, SourceKind, String, Option<String>, Option<String>, Option<String>)> =
            Vec::new();

        if let Some(driver) = spec.nvidia_driver.as_ref().filter(|d| d.install) {
            wanted.push((
                ComponentKind::Driver,
                driver.source,
                driver.repository.clone(),
                driver.git_ref.clone(),
                driver.branch.clone(),
                driver.version.clone(),
            ));
        }
        if let Some(runtime) = spec.container_runtime.as_ref().filter(|r| r.install) {
            let repository = runtime.repository.clone().unwrap_or_else(|| {
                crate::provision::runtime_repository(&runtime.name).to_string()
            });
            wanted.push((
                ComponentKind::Runtime,
                runtime.source,
                repository,
                runtime.git_ref.clone(),
                runtime.branch.clone(),
                runtime.version.clone(),
            ));
        }
        if let Some(toolkit) = spec.nvidia_container_toolkit.as_ref().filter(|t| t.install) {
            wanted.push((
                ComponentKind::Toolkit,
                toolkit.source,
                toolkit.repository.clone(),
                toolkit.git_ref.clone(),
                toolkit.branch.clone(),
                toolkit.version.clone(),
            ));
        }
        if let Some(kubernetes) = spec.kubernetes.as_ref().filter(|k| k.install) {
            wanted.push((
                ComponentKind::Kubernetes,
                kubernetes.source,
                kubernetes.repository.clone(),
                kubernetes.git_ref.clone(),
                kubernetes.branch.clone(),
                kubernetes.version.clone(),
            ));
        }

        for (component, source, repository, git_ref, branch, version) in wanted {
            let mut provenance = ComponentProvenance {
                component,
                source: source.as_str().to_string(),
                version,
                branch: branch.clone(),
                repository: Some(repository.clone()),
                requested_ref: git_ref.clone(),
                commit: None,
            };

            if source.needs_resolution() {
                let reference = match source {
                    SourceKind::Git => git_ref.clone().ok_or_else(|| {
                        HolodeckError::ConfigInvalid(format!(
                            "{} git source requires a ref",
                            component.as_str()
                        ))
                    })?,
                    _ => branch
                        .clone()
                        .unwrap_or_else(|| default_branch(component).to_string()),
                };
                let _ = self
                    .output
                    .send(OutputLine::info(format!(
                        "resolving {} ref {reference}",
                        component.as_str()
                    )))
                    .await;
                let commit = self.resolver.resolve(&repository, &reference).await?;
                tracing::info!(
                    component = component.as_str(),
                    reference = %reference,
                    commit = %commit.short,
                    "resolved ref"
                );
                provenance.commit = Some(commit.short.clone());
                provenance.requested_ref = Some(reference);
                resolved.insert(component, commit);
            }

            self.env.status.record_provenance(provenance);
        }

        self.persist()?;
        Ok(resolved)
    }

    fn mark_ready(&mut self) -> Result<()> {
        let total = self.cluster().nodes.len();
        {
            let cluster = self.cluster_mut();
            cluster.phase = ClusterPhase::Ready;
            cluster.total_nodes = total;
            for node in &mut cluster.nodes {
                if node.phase != NodePhase::Ready {
                    node.phase = NodePhase::Ready;
                }
            }
            cluster.ready_nodes = total;
        }
        self.env
            .status
            .properties
            .insert("phase".to_string(), "ready".to_string());
        set_condition(
            &mut self.env.status.conditions,
            ConditionType::Available,
            "Ready",
            "environment provisioned and healthy",
        );
        self.persist()?;
        Ok(())
    }

    /// Record a failure: the offending node goes Failed, the environment
    /// goes Degraded, the partial cluster stays up for inspection.
    fn degrade(&mut self, node_name: &str, phase: &str, error: HolodeckError) -> HolodeckError {
        tracing::error!(node = node_name, phase, error = %error, "provisioning failed");
        {
            let cluster = self.cluster_mut();
            cluster.phase = ClusterPhase::Degraded;
            if let Some(node) = cluster.nodes.iter_mut().find(|n| n.name == node_name) {
                node.phase = NodePhase::Failed;
                node.message = format!("failed during {phase}");
            }
        }
        self.env
            .status
            .properties
            .insert("phase".to_string(), "degraded".to_string());
        set_condition(
            &mut self.env.status.conditions,
            ConditionType::Degraded,
            "NodeFailed",
            &format!("node {node_name} failed during {phase}: {error}"),
        );
        if let Err(persist_error) = self.persist() {
            tracing::warn!(error = %persist_error, "failed to persist degraded status");
        }
        error
    }

    fn transition(
        &mut self,
        condition: ConditionType,
        reason: &str,
        message: &str,
        phase: ClusterPhase,
    ) -> Result<()> {
        self.cluster_mut().phase = phase;
        self.env
            .status
            .properties
            .insert("phase".to_string(), reason.to_string());
        set_condition(&mut self.env.status.conditions, condition, reason, message);
        self.persist()
    }

    fn set_node_phase(&mut self, index: usize, phase: NodePhase, message: &str) -> Result<()> {
        {
            let node = &mut self.cluster_mut().nodes[index];
            node.phase = phase;
            node.message = message.to_string();
        }
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        self.cache.write_if_changed(&self.env).map(|_| ())
    }

    fn installer(&self) -> &str {
        self.env
            .spec
            .kubernetes
            .as_ref()
            .filter(|k| k.install)
            .map(|k| k.installer.as_str())
            .unwrap_or("kubeadm")
    }

    fn cluster(&self) -> &crate::environment::ClusterStatus {
        self.env
            .status
            .cluster
            .as_ref()
            .expect("provision checked the fleet exists")
    }

    fn cluster_mut(&mut self) -> &mut crate::environment::ClusterStatus {
        self.env
            .status
            .cluster
            .get_or_insert_with(Default::default)
    }

    fn node(&self, index: usize) -> &NodeStatus {
        &self.cluster().nodes[index]
    }

    fn first_control_plane(&self) -> Result<usize> {
        self.control_plane_indices()
            .first()
            .copied()
            .ok_or_else(|| {
                HolodeckError::ConfigInvalid("fleet contains no control-plane node".to_string())
            })
    }

    fn control_plane_indices(&self) -> Vec<usize> {
        self.cluster()
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.role == NodeRole::ControlPlane)
            .map(|(i, _)| i)
            .collect()
    }

    fn worker_indices(&self) -> Vec<usize> {
        self.cluster()
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.role == NodeRole::Worker)
            .map(|(i, _)| i)
            .collect()
    }

    fn username_for(&self, node: &NodeStatus) -> String {
        node.ssh_username
            .clone()
            .unwrap_or_else(|| self.env.spec.auth.username.clone())
    }

    fn executor_for(&self, node: &NodeStatus) -> RemoteExecutor {
        let config = SshConfig::new(
            node.public_ip.clone(),
            self.username_for(node),
            self.private_key.clone(),
        );
        RemoteExecutor::new(config, Arc::clone(&self.known_hosts), self.cancel.clone())
    }
}

/// Rewrite the kubeconfig server URL to the public endpoint so the operator
/// can reach the API from outside the VPC.
fn rewrite_kubeconfig_server(kubeconfig: &str, public_host: &str) -> Option<String> {
    let mut document: serde_yaml::Value = serde_yaml::from_str(kubeconfig).ok()?;
    let clusters = document.get_mut("clusters")?.as_sequence_mut()?;
    for entry in clusters {
        if let Some(cluster) = entry.get_mut("cluster") {
            cluster["server"] = serde_yaml::Value::String(format!("https://{public_host}:6443"));
        }
    }
    serde_yaml::to_string(&document).ok()
}

fn default_branch(component: ComponentKind) -> &'static str {
    match component {
        ComponentKind::Kubernetes => "master",
        _ => "main",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_kubeconfig_server() {
        let kubeconfig = "\
apiVersion: v1
kind: Config
clusters:
  - name: kubernetes
    cluster:
      certificate-authority-data: QUJD
      server: https://10.0.0.1:6443
";
        let rewritten = rewrite_kubeconfig_server(kubeconfig, "203.0.113.9").unwrap();
        assert!(rewritten.contains("https://203.0.113.9:6443"));
        assert!(!rewritten.contains("10.0.0.1:6443"));
    }

    #[test]
    fn test_rewrite_kubeconfig_tolerates_garbage() {
        assert!(rewrite_kubeconfig_server(": not yaml {", "h").is_none());
        assert!(rewrite_kubeconfig_server("apiVersion: v1\n", "h").is_none());
    }

    #[test]
    fn test_default_branches() {
        assert_eq!(default_branch(ComponentKind::Kubernetes), "master");
        assert_eq!(default_branch(ComponentKind::Toolkit), "main");
    }

    #[tokio::test]
    async fn test_provision_on_ready_cache_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let spec: crate::config::EnvironmentSpec =
            serde_yaml::from_str("name: idem\nprovider: ssh\ninstance:\n  region: none\n").unwrap();
        let mut env = Environment::new(spec);
        env.status.cluster = Some(crate::environment::ClusterStatus {
            nodes: vec![NodeStatus {
                name: "idem-control-plane-0".to_string(),
                role: NodeRole::ControlPlane,
                instance_id: "ssh-192.0.2.1".to_string(),
                public_ip: "192.0.2.1".to_string(),
                private_ip: "192.0.2.1".to_string(),
                ssh_username: None,
                phase: NodePhase::Ready,
                message: String::new(),
            }],
            control_plane_endpoint: "192.0.2.1".to_string(),
            load_balancer_dns: String::new(),
            total_nodes: 1,
            ready_nodes: 1,
            phase: ClusterPhase::Ready,
        });
        set_condition(
            &mut env.status.conditions,
            ConditionType::Available,
            "Ready",
            "environment provisioned and healthy",
        );

        let cache = CacheFile::for_environment(Some(dir.path()), "idem").unwrap();
        assert!(cache.write_if_changed(&env).unwrap());
        let before = std::fs::read_to_string(cache.path()).unwrap();

        let (output, _drain) = mpsc::channel(16);
        let mut orchestrator = ClusterOrchestrator::new(
            env,
            cache.clone(),
            Some(dir.path().to_path_buf()),
            None,
            output,
            CancellationToken::new(),
        )
        .unwrap();
        orchestrator.provision().await.unwrap();

        assert_eq!(before, std::fs::read_to_string(cache.path()).unwrap());
    }
}
