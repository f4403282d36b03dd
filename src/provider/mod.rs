//! Cloud provider boundary
//!
//! The orchestrator consumes a narrow capability set; providers are
//! interchangeable behind the trait and the orchestrator never downcasts.
//! The AWS EC2 and vSphere drivers live outside this crate; shipped here are
//! the bring-your-own-host SSH provider and the image registry.

pub mod ami;
mod ssh_hosts;

pub use ssh_hosts::SshHostProvider;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::ProviderKind;
use crate::environment::{Condition, Environment, NodeRole};
use crate::errors::{HolodeckError, Result};

/// A machine created (or adopted) by a provider.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub name: String,
    pub role: NodeRole,
    pub instance_id: String,
    pub public_ip: String,
    pub private_ip: String,
    /// Overrides the environment-level SSH username when set
    pub ssh_username: Option<String>,
}

/// The capability set the core consumes.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create all underlying resources and return the node fleet.
    async fn create(&self, env: &Environment) -> Result<Vec<NodeHandle>>;

    /// Idempotent teardown of everything `create` made.
    async fn delete(&self, env: &Environment) -> Result<()>;

    /// Currently observed provider-side conditions.
    async fn status(&self) -> Result<Vec<Condition>>;

    /// Pre-flight validation of the spec against the provider.
    async fn dry_run(&self, env: &Environment) -> Result<()>;

    /// Optional resource tagging.
    async fn update_tags(
        &self,
        tags: &BTreeMap<String, String>,
        resources: &[String],
    ) -> Result<()>;
}

/// Construct the provider selected by the spec. The cloud drivers are
/// external collaborators; only the SSH provider is built in.
pub fn for_environment(env: &Environment) -> Result<Box<dyn CloudProvider>> {
    match env.spec.provider {
        ProviderKind::Ssh => Err(HolodeckError::Provider(
            "the ssh provider needs explicit hosts; pass --ssh --host on the command line"
                .to_string(),
        )),
        ProviderKind::Aws => Err(HolodeckError::Provider(
            "the aws driver is not linked into this build; point holodeck at existing hosts with --ssh"
                .to_string(),
        )),
    }
}

#[cfg(test)]
pub mod fake {
    //! In-crate fake standing in for the external cloud drivers.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeProvider {
        pub nodes: Vec<NodeHandle>,
        pub deleted: Mutex<bool>,
    }

    #[async_trait]
    impl CloudProvider for FakeProvider {
        async fn create(&self, _env: &Environment) -> Result<Vec<NodeHandle>> {
            Ok(self.nodes.clone())
        }

        async fn delete(&self, _env: &Environment) -> Result<()> {
            *self.deleted.lock().unwrap() = true;
            Ok(())
        }

        async fn status(&self) -> Result<Vec<Condition>> {
            Ok(Vec::new())
        }

        async fn dry_run(&self, _env: &Environment) -> Result<()> {
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
}

#[cfg(test)]
mod tests {
    use super::fake::FakeProvider;
    use super::*;
    use crate::config::EnvironmentSpec;

    fn env() -> Environment {
        let spec: EnvironmentSpec =
            serde_yaml::from_str("name: boundary\ninstance:\n  region: us-west-2\n").unwrap();
        Environment::new(spec)
    }

    #[tokio::test]
    async fn test_boundary_is_consumed_through_the_trait_object() {
        let provider: Box<dyn CloudProvider> = Box::new(FakeProvider {
            nodes: vec![NodeHandle {
                name: "cp-0".to_string(),
                role: NodeRole::ControlPlane,
                instance_id: "i-0abc".to_string(),
                public_ip: "203.0.113.5".to_string(),
                private_ip: "10.0.0.1".to_string(),
                ssh_username: None,
            }],
            ..Default::default()
        });

        let env = env();
        provider.dry_run(&env).await.unwrap();
        let nodes = provider.create(&env).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].role, NodeRole::ControlPlane);
        provider.delete(&env).await.unwrap();
        assert!(provider.status().await.unwrap().is_empty());
    }

    #[test]
    fn test_unlinked_drivers_are_named_provider_errors() {
        let env = env();
        assert!(matches!(
            for_environment(&env),
            Err(HolodeckError::Provider(_))
        ));
    }
}
