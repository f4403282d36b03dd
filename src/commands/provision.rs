//! `holodeck provision` - drive an environment to a running cluster

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterOrchestrator;
use crate::config::{expand_home, EnvFileLoader, ProviderKind};
use crate::environment::{CacheFile, Environment};
use crate::logging;
use crate::output::{spawn_printer, OutputLine};
use crate::provider::{CloudProvider, SshHostProvider};

use super::ProvisionFlags;

pub async fn run(flags: ProvisionFlags) -> Result<()> {
    let mut spec = EnvFileLoader::new(flags.env_file.as_deref()).load()?;
    logging::init_logging(&spec.logging, &spec.name)?;

    // CLI overrides for the BYO-SSH path
    if flags.ssh {
        spec.provider = ProviderKind::Ssh;
    }
    if let Some(user) = &flags.user {
        spec.auth.username = user.clone();
    }
    if let Some(key) = &flags.key {
        spec.auth.private_key = key.clone();
    }
    if spec.auth.private_key.is_empty() {
        return Err(anyhow!(
            "no SSH private key configured; set auth.privateKey or pass --key"
        ));
    }

    let cache = CacheFile::for_environment(flags.cachepath.as_deref(), &spec.name)?;
    let env = if cache.exists() {
        let mut cached = cache.load().context("failed to read the environment cache")?;
        // The env file stays declarative between runs; observed status is
        // whatever the last run recorded
        cached.spec = spec.clone();
        cached
    } else {
        Environment::new(spec.clone())
    };

    let (output, printer) = spawn_printer(256);
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let mut orchestrator = ClusterOrchestrator::new(
        env,
        cache,
        flags.cachepath.clone(),
        flags.kubeconfig.clone(),
        output.clone(),
        cancel,
    )?;

    let has_nodes = orchestrator
        .environment()
        .status
        .cluster
        .as_ref()
        .is_some_and(|c| !c.nodes.is_empty());

    if flags.ssh && !has_nodes {
        let key_path = expand_home(Path::new(&spec.auth.private_key))?;
        let provider =
            SshHostProvider::new(flags.host.clone(), spec.auth.username.as_str(), key_path);
        let nodes = provider.create(orchestrator.environment()).await?;
        orchestrator.adopt_nodes(nodes, None)?;
    } else if !has_nodes {
        return Err(anyhow!(
            "environment {:?} has no provisioned nodes; run `holodeck create` first",
            spec.name
        ));
    }

    let result = orchestrator.provision().await;

    match &result {
        Ok(()) if orchestrator.environment().spec.kubernetes_requested() => {
            let _ = output
                .send(OutputLine::success("environment provisioned"))
                .await;
            match orchestrator.health().await {
                Ok(report) => {
                    let verdict = if report.is_healthy() { "Healthy" } else { "Degraded" };
                    let _ = output
                        .send(OutputLine::info(format!(
                            "cluster {verdict}: api-server={} nodes={}/{} ready",
                            if report.api_server_running { "Running" } else { "Unreachable" },
                            report.ready_nodes,
                            report.total_nodes
                        )))
                        .await;
                    for node in &report.nodes {
                        let _ = output
                            .send(OutputLine::info(format!(
                                "  {:<24} {:<10} {:<16} {:<10} {}",
                                node.name, node.status, node.roles, node.version, node.internal_ip
                            )))
                            .await;
                    }
                }
                Err(e) => {
                    let _ = output
                        .send(OutputLine::warning(format!("health check failed: {e}")))
                        .await;
                }
            }
        }
        Ok(()) => {
            let _ = output
                .send(OutputLine::success("environment provisioned"))
                .await;
        }
        Err(e) => {
            let _ = output
                .send(OutputLine::error(format!("provisioning failed: {e}")))
                .await;
        }
    }

    // Flush the printer before surfacing the result
    drop(orchestrator);
    drop(output);
    let _ = printer.await;

    result.map_err(Into::into)
}
