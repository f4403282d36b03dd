//! Cluster health reporting
//!
//! Runs kubectl on the first control plane over SSH and synthesises a
//! health report from the node table. The table parser is pure so it can be
//! tested without a cluster.

use crate::errors::Result;
use crate::ssh::RemoteExecutor;

/// Health of one node as reported by `kubectl get nodes -o wide`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHealth {
    pub name: String,
    pub status: String,
    pub roles: String,
    pub version: String,
    pub internal_ip: String,
}

impl NodeHealth {
    pub fn is_ready(&self) -> bool {
        // "Ready" but not "NotReady"; scheduling-disabled suffixes still count
        self.status.split(',').any(|s| s == "Ready")
    }

    pub fn is_control_plane(&self) -> bool {
        self.roles.split(',').any(|r| r == "control-plane")
    }
}

/// Synthesised cluster health.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub api_server_running: bool,
    pub nodes: Vec<NodeHealth>,
    pub total_nodes: usize,
    pub ready_nodes: usize,
}

impl HealthReport {
    /// Healthy iff the API server answers, every node is Ready, and the
    /// cluster has at least one node.
    pub fn is_healthy(&self) -> bool {
        self.api_server_running && self.total_nodes > 0 && self.ready_nodes == self.total_nodes
    }
}

/// Run the health check against a control plane.
pub async fn check(
    executor: &RemoteExecutor,
    node: &str,
    kubeconfig: &str,
) -> Result<HealthReport> {
    let cluster_info = executor
        .capture(
            node,
            &format!("sudo kubectl --kubeconfig {kubeconfig} cluster-info"),
        )
        .await;
    let api_server_running = cluster_info
        .map(|output| output.contains("is running"))
        .unwrap_or(false);

    let nodes = if api_server_running {
        let table = executor
            .capture(
                node,
                &format!("sudo kubectl --kubeconfig {kubeconfig} get nodes -o wide"),
            )
            .await?;
        parse_nodes_wide(&table)
    } else {
        Vec::new()
    };

    let ready_nodes = nodes.iter().filter(|n| n.is_ready()).count();
    Ok(HealthReport {
        api_server_running,
        total_nodes: nodes.len(),
        ready_nodes,
        nodes,
    })
}

/// Parse the `kubectl get nodes -o wide` table.
///
/// Columns: NAME STATUS ROLES AGE VERSION INTERNAL-IP EXTERNAL-IP ...
pub fn parse_nodes_wide(output: &str) -> Vec<NodeHealth> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 6 {
                return None;
            }
            Some(NodeHealth {
                name: columns[0].to_string(),
                status: columns[1].to_string(),
                roles: columns[2].to_string(),
                version: columns[4].to_string(),
                internal_ip: columns[5].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODES_WIDE: &str = "\
NAME           STATUS     ROLES           AGE   VERSION   INTERNAL-IP   EXTERNAL-IP   OS-IMAGE             KERNEL-VERSION   CONTAINER-RUNTIME
cp-0           Ready      control-plane   10m   v1.31.1   10.0.0.1      <none>        Ubuntu 22.04.4 LTS   6.5.0-1018-aws   containerd://1.7.12
worker-0       Ready      <none>          9m    v1.31.1   10.0.0.11     <none>        Ubuntu 22.04.4 LTS   6.5.0-1018-aws   containerd://1.7.12
worker-1       NotReady   <none>          9m    v1.31.1   10.0.0.12     <none>        Ubuntu 22.04.4 LTS   6.5.0-1018-aws   containerd://1.7.12
";

    #[test]
    fn test_parse_nodes_wide_table() {
        let nodes = parse_nodes_wide(NODES_WIDE);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].name, "cp-0");
        assert_eq!(nodes[0].internal_ip, "10.0.0.1");
        assert_eq!(nodes[0].version, "v1.31.1");
        assert!(nodes[0].is_control_plane());
        assert!(nodes[0].is_ready());
        assert!(!nodes[1].is_control_plane());
        assert!(!nodes[2].is_ready());
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        assert!(parse_nodes_wide("NAME STATUS\n\nshort line\n").is_empty());
        assert!(parse_nodes_wide("").is_empty());
    }

    #[test]
    fn test_not_ready_never_counts_as_ready() {
        let nodes = parse_nodes_wide(NODES_WIDE);
        let not_ready = &nodes[2];
        assert_eq!(not_ready.status, "NotReady");
        assert!(!not_ready.is_ready());
    }

    #[test]
    fn test_health_verdict() {
        let mut report = HealthReport {
            api_server_running: true,
            nodes: parse_nodes_wide(NODES_WIDE),
            total_nodes: 3,
            ready_nodes: 2,
        };
        assert!(!report.is_healthy());

        report.ready_nodes = 3;
        assert!(report.is_healthy());

        report.api_server_running = false;
        assert!(!report.is_healthy());

        let empty = HealthReport {
            api_server_running: true,
            nodes: Vec::new(),
            total_nodes: 0,
            ready_nodes: 0,
        };
        assert!(!empty.is_healthy());
    }
}
