//! `holodeck delete` - tear an environment down

use anyhow::{Context, Result};

use crate::config::{EnvFileLoader, ProviderKind};
use crate::environment::{set_condition, CacheFile, ClusterPhase, ConditionType};
use crate::logging;
use crate::provider;

use super::EnvFlags;

pub async fn run(flags: EnvFlags) -> Result<()> {
    let spec = EnvFileLoader::new(flags.env_file.as_deref()).load()?;
    logging::init_logging(&spec.logging, &spec.name)?;

    let cache = CacheFile::for_environment(flags.cachepath.as_deref(), &spec.name)?;
    if !cache.exists() {
        println!("environment {:?} has no cache entry; nothing to delete", spec.name);
        return Ok(());
    }

    let mut env = cache.load().context("failed to read the environment cache")?;

    if let Some(cluster) = &mut env.status.cluster {
        cluster.phase = ClusterPhase::Deleting;
    }
    set_condition(
        &mut env.status.conditions,
        ConditionType::Progressing,
        "Deleting",
        "tearing down cloud resources",
    );
    cache.write_if_changed(&env)?;

    match env.spec.provider {
        // Adopted hosts belong to the operator; only the cache entry goes
        ProviderKind::Ssh => {}
        ProviderKind::Aws => {
            let provider = provider::for_environment(&env)?;
            provider.delete(&env).await?;
        }
    }

    set_condition(
        &mut env.status.conditions,
        ConditionType::Terminated,
        "Deleted",
        "environment deleted",
    );
    cache.write_if_changed(&env)?;
    cache.remove()?;

    println!("environment {:?} deleted", env.spec.name);
    Ok(())
}
