//! ==============================================================================
//! supervisor.rs - wiring and lifecycle of the two roles
//! ==============================================================================
//!
//! hub:
//!     open the store, build the ingestor + snapshot reader around it,
//!     serve until interrupted.
//!
//! node:
//!     build the agent's capabilities from config and run the control loop
//!     in its own task. a clean return (operator interrupt) ends the process.
//!     anything else (setup failure, fatal agent error, panic) is logged,
//!     followed by a fixed delay and a re-exec of the whole process.
//!
//! ==============================================================================

use crate::agent::{Agent, AgentIo, AgentSettings, HostLink, HttpTransport, SystemClock};
use crate::config::HostConfig;
use crate::ingest::Ingestor;
use crate::server::{self, AppState};
use crate::shutdown::{self, ShutdownSignal};
use crate::snapshot::SnapshotReader;
use crate::store::ReadingStore;
use crate::{hal, sensor};

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;

pub async fn run_hub(config: &HostConfig, shutdown: ShutdownSignal) -> Result<()> {
    let path = config.storage.path.clone();
    let store = tokio::task::spawn_blocking(move || ReadingStore::open(path))
        .await
        .context("store setup task failed")?
        .context("failed to open reading store")?;
    let store = Arc::new(store);

    match store.count() {
        Ok(n) => tracing::info!("[STARTUP] ✓ Store ready ({} readings)", n),
        Err(e) => tracing::warn!("[STARTUP] Store opened but count failed: {}", e),
    }

    let state = AppState {
        ingestor: Arc::new(
            Ingestor::new(store.clone(), Arc::new(config.producer_set()))
                .with_payload_echo(config.logging.show_sensor_data),
        ),
        snapshot: SnapshotReader::new(store),
    };

    let mut signal = shutdown;
    server::serve(&config.server, state, async move {
        shutdown::requested(&mut signal).await;
    })
    .await
}

/// assemble the agent from config
pub fn build_agent(config: &HostConfig, shutdown: ShutdownSignal) -> Result<Agent> {
    let node = &config.node;

    let link = HostLink::new(&node.hub_url, node.connect_timeout())
        .context("invalid node.hub_url")?
        .with_attach_command(node.attach_command.clone())
        .with_check_command(node.link_check_command.clone());
    let transport = HttpTransport::new(&node.hub_url, node.send_timeout())
        .context("failed to build http client")?;
    tracing::info!("[STARTUP] Hub at {} ({})", link.hub_addr(), transport.endpoint());

    let io = AgentIo {
        link: Box::new(link),
        transport: Box::new(transport),
        sensor: sensor::from_config(&config.sensor)?,
        indicator: hal::status_indicator(node.status_led_pin)?,
        clock: Arc::new(SystemClock),
    };

    Ok(Agent::new(AgentSettings::from_config(node, &config.logging), io, shutdown))
}

pub async fn run_node(config: &HostConfig, shutdown: ShutdownSignal) -> Result<()> {
    let agent = build_agent(config, shutdown);
    supervise(agent, config.node.restart_delay(), restart_process).await
}

/// run the agent to completion; on failure wait `delay`, then `restart`
async fn supervise<R>(agent: Result<Agent>, delay: Duration, restart: R) -> Result<()>
where
    R: FnOnce() -> Result<()>,
{
    let outcome = match agent {
        Ok(mut agent) => match tokio::spawn(async move { agent.run().await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!(e)),
            Err(join) if join.is_panic() => Err(anyhow!("agent panicked: {}", join)),
            Err(join) => Err(anyhow!("agent task aborted: {}", join)),
        },
        Err(e) => Err(e.context("node setup failed")),
    };

    match outcome {
        Ok(()) => {
            tracing::info!("[SHUTDOWN] Goodbye!");
            Ok(())
        }
        Err(e) => {
            tracing::error!("[FATAL] {:#}", e);
            tracing::error!("[FATAL] Trying to restart in {} seconds...", delay.as_secs());
            tokio::time::sleep(delay).await;
            restart()
        }
    }
}

/// replace this process with a fresh copy of itself, same arguments
#[cfg(unix)]
fn restart_process() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    // exec only returns on failure
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(anyhow!(err).context(format!("failed to re-exec {}", exe.display())))
}

#[cfg(not(unix))]
fn restart_process() -> Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .spawn()
        .with_context(|| format!("failed to restart {}", exe.display()))?;
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NetworkLink;
    use crate::config::Role;
    use crate::domain::Payload;
    use crate::error::ConnectivityError;
    use crate::hal::{LogIndicator, StatusIndicator};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::watch;

    struct NoNetwork;

    #[async_trait]
    impl NetworkLink for NoNetwork {
        async fn attach(&self) -> Result<(), ConnectivityError> {
            Err(ConnectivityError::Attach("no network".into()))
        }

        async fn is_up(&self) -> bool {
            false
        }
    }

    struct BrokenLed;

    impl StatusIndicator for BrokenLed {
        fn set(&self, _on: bool) -> Result<()> {
            Err(anyhow!("gpio2 busy"))
        }

        fn is_on(&self) -> bool {
            false
        }
    }

    /// an offline agent whose shutdown has already been requested
    fn stopped_agent(indicator: Box<dyn StatusIndicator>) -> (watch::Sender<bool>, Agent) {
        let mut config = HostConfig::default();
        config.node.producer_id = "group_4".into();
        config.node.hub_url = "http://127.0.0.1:9".into();

        let (tx, rx) = watch::channel(true);
        let io = AgentIo {
            link: Box::new(NoNetwork),
            transport: Box::new(HttpTransport::new(&config.node.hub_url, Duration::from_secs(1)).unwrap()),
            sensor: Box::new(|| -> Result<Payload> { Ok(Payload::new()) }),
            indicator,
            clock: Arc::new(SystemClock),
        };
        let settings = AgentSettings::from_config(&config.node, &config.logging);
        (tx, Agent::new(settings, io, rx))
    }

    #[tokio::test]
    async fn clean_stop_does_not_restart() {
        let (_tx, agent) = stopped_agent(Box::new(LogIndicator::new()));
        let restarted = AtomicBool::new(false);

        supervise(Ok(agent), Duration::ZERO, || {
            restarted.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert!(!restarted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fatal_agent_error_restarts_after_delay() {
        let (_tx, agent) = stopped_agent(Box::new(BrokenLed));
        let restarted = AtomicBool::new(false);

        supervise(Ok(agent), Duration::ZERO, || {
            restarted.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert!(restarted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn setup_failure_restarts_and_reports_restart_errors() {
        let outcome = supervise(Err(anyhow!("no gpio chip")), Duration::ZERO, || {
            Err(anyhow!("exec failed"))
        })
        .await;
        assert!(outcome.unwrap_err().to_string().contains("exec failed"));
    }

    #[test]
    fn builds_agent_from_node_config() {
        let mut config = HostConfig::default();
        config.cluster.role = Role::Node;
        config.node.producer_id = "group_4".into();
        config.node.hub_url = "http://127.0.0.1:9000".into();

        let (_tx, rx) = watch::channel(false);
        let agent = build_agent(&config, rx).unwrap();
        assert_eq!(agent.state(), crate::agent::LinkState::Disconnected);
    }

    #[test]
    fn bad_hub_url_fails_setup() {
        let mut config = HostConfig::default();
        config.node.producer_id = "group_4".into();
        config.node.hub_url = "hub without scheme".into();

        let (_tx, rx) = watch::channel(false);
        assert!(build_agent(&config, rx).is_err());
    }
}
