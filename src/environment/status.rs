//! Observed cluster and node state

use serde::{Deserialize, Serialize};

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    #[serde(rename = "control-plane")]
    ControlPlane,
    #[serde(rename = "worker")]
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
        }
    }
}

/// Per-node lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodePhase {
    #[default]
    Pending,
    Provisioning,
    Running,
    Ready,
    Failed,
    Terminating,
}

/// Cluster-wide lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Creating,
    Provisioning,
    Ready,
    Degraded,
    Deleting,
    Failed,
}

/// Observed state of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub name: String,

    pub role: NodeRole,

    #[serde(default)]
    pub instance_id: String,

    #[serde(default)]
    pub public_ip: String,

    #[serde(default)]
    pub private_ip: String,

    /// Per-node SSH username; falls back to the environment-level username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_username: Option<String>,

    #[serde(default)]
    pub phase: NodePhase,

    #[serde(default)]
    pub message: String,
}

/// Observed state of the whole cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub nodes: Vec<NodeStatus>,

    /// Fixed for the lifetime of a run: LB DNS when HA, else the first
    /// control plane's private IP
    #[serde(default)]
    pub control_plane_endpoint: String,

    #[serde(default)]
    pub load_balancer_dns: String,

    #[serde(default)]
    pub total_nodes: usize,

    #[serde(default)]
    pub ready_nodes: usize,

    #[serde(default)]
    pub phase: ClusterPhase,
}

impl ClusterStatus {
    /// Select the control-plane endpoint: the load balancer when one exists,
    /// otherwise the first control plane's private IP.
    pub fn select_endpoint(&self) -> Option<String> {
        if !self.load_balancer_dns.is_empty() {
            return Some(self.load_balancer_dns.clone());
        }
        self.nodes
            .iter()
            .find(|n| n.role == NodeRole::ControlPlane)
            .map(|n| n.private_ip.clone())
    }
}
