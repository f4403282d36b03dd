//! Bring-your-own-host provider
//!
//! Adopts hosts the operator already has (lab machines, long-lived EC2
//! instances) instead of creating cloud resources. The first host becomes
//! the control plane, the rest join as workers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::environment::{Condition, Environment, NodeRole};
use crate::errors::{HolodeckError, Result};

use super::{CloudProvider, NodeHandle};

pub struct SshHostProvider {
    hosts: Vec<String>,
    username: String,
    private_key: PathBuf,
}

impl SshHostProvider {
    pub fn new(hosts: Vec<String>, username: impl Into<String>, private_key: PathBuf) -> Self {
        Self {
            hosts,
            username: username.into(),
            private_key,
        }
    }
}

#[async_trait]
impl CloudProvider for SshHostProvider {
    async fn create(&self, env: &Environment) -> Result<Vec<NodeHandle>> {
        self.dry_run(env).await?;

        let nodes = self
            .hosts
            .iter()
            .enumerate()
            .map(|(index, host)| {
                let role = if index == 0 {
                    NodeRole::ControlPlane
                } else {
                    NodeRole::Worker
                };
                NodeHandle {
                    name: format!("{}-{}-{}", env.spec.name, role.as_str(), index),
                    role,
                    instance_id: format!("ssh-{host}"),
                    // Adopted hosts are reached directly; the dial address
                    // doubles as the in-cluster address
                    public_ip: host.clone(),
                    private_ip: host.clone(),
                    ssh_username: Some(self.username.clone()),
                }
            })
            .collect();
        Ok(nodes)
    }

    async fn delete(&self, _env: &Environment) -> Result<()> {
        // Nothing owned; the hosts belong to the operator
        Ok(())
    }

    async fn status(&self) -> Result<Vec<Condition>> {
        Ok(Vec::new())
    }

    async fn dry_run(&self, _env: &Environment) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(HolodeckError::ConfigInvalid(
                "the ssh provider needs at least one --host".to_string(),
            ));
        }
        if !self.private_key.exists() {
            return Err(HolodeckError::ConfigInvalid(format!(
                "ssh private key not found: {}",
                self.private_key.display()
            )));
        }
        Ok(())
    }

    async fn update_tags(
        &self,
        _tags: &BTreeMap<String, String>,
        _resources: &[String],
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentSpec;

    fn env() -> Environment {
        let spec: EnvironmentSpec =
            serde_yaml::from_str("name: byo\nprovider: ssh\ninstance:\n  region: none\n").unwrap();
        Environment::new(spec)
    }

    #[tokio::test]
    async fn test_first_host_is_control_plane() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let provider = SshHostProvider::new(
            vec!["192.0.2.10".to_string(), "192.0.2.11".to_string()],
            "ubuntu",
            key.path().to_path_buf(),
        );
        let nodes = provider.create(&env()).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].role, NodeRole::ControlPlane);
        assert_eq!(nodes[1].role, NodeRole::Worker);
        assert_eq!(nodes[0].private_ip, "192.0.2.10");
        assert_eq!(nodes[0].ssh_username.as_deref(), Some("ubuntu"));
    }

    #[tokio::test]
    async fn test_dry_run_requires_hosts_and_key() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let no_hosts = SshHostProvider::new(Vec::new(), "ubuntu", key.path().to_path_buf());
        assert!(no_hosts.dry_run(&env()).await.is_err());

        let missing_key = SshHostProvider::new(
            vec!["192.0.2.10".to_string()],
            "ubuntu",
            PathBuf::from("/nonexistent/id_ed25519"),
        );
        assert!(missing_key.dry_run(&env()).await.is_err());
    }
}
