//! `holodeck create` - create the cloud resources for an environment

use anyhow::{Context, Result};

use crate::config::EnvFileLoader;
use crate::environment::{set_condition, CacheFile, ClusterPhase, ConditionType, Environment};
use crate::logging;
use crate::provider;

use super::EnvFlags;

pub async fn run(flags: EnvFlags) -> Result<()> {
    let spec = EnvFileLoader::new(flags.env_file.as_deref()).load()?;
    logging::init_logging(&spec.logging, &spec.name)?;

    let cache = CacheFile::for_environment(flags.cachepath.as_deref(), &spec.name)?;
    if cache.exists() {
        anyhow::bail!(
            "environment {:?} already exists (cache at {}); delete it first",
            spec.name,
            cache.path().display()
        );
    }

    let mut env = Environment::new(spec);
    set_condition(
        &mut env.status.conditions,
        ConditionType::Progressing,
        "Creating",
        "creating cloud resources",
    );
    cache.write_if_changed(&env)?;

    let provider = provider::for_environment(&env)?;
    provider
        .dry_run(&env)
        .await
        .context("pre-flight validation failed")?;
    let nodes = provider.create(&env).await?;

    let cluster = env.status.cluster.get_or_insert_with(Default::default);
    cluster.nodes = nodes
        .into_iter()
        .map(|handle| crate::environment::NodeStatus {
            name: handle.name,
            role: handle.role,
            instance_id: handle.instance_id,
            public_ip: handle.public_ip,
            private_ip: handle.private_ip,
            ssh_username: handle.ssh_username,
            phase: crate::environment::NodePhase::Pending,
            message: String::new(),
        })
        .collect();
    cluster.total_nodes = cluster.nodes.len();
    cluster.phase = ClusterPhase::Creating;
    if let Some(endpoint) = cluster.select_endpoint() {
        cluster.control_plane_endpoint = endpoint;
    }

    set_condition(
        &mut env.status.conditions,
        ConditionType::Progressing,
        "Created",
        "cloud resources created; run provision next",
    );
    cache.write_if_changed(&env)?;

    println!(
        "environment {:?} created with {} node(s); cache at {}",
        env.spec.name,
        env.status.cluster.as_ref().map(|c| c.nodes.len()).unwrap_or(0),
        cache.path().display()
    );
    Ok(())
}
