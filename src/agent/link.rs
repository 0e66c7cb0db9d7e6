//! ==============================================================================
//! link.rs - network attach and link checks for a producer node
//! ==============================================================================
//!
//! purpose:
//!     a node is "attached" when the host has a working network path toward
//!     the hub. whether the hub itself answers is the transport's business:
//!     a dead hub fails sends, it doesn't take the link down.
//!
//! checks, in order of preference:
//!     - link_check_command: exits 0 while attached (nm-online, a script
//!       reading wpa_cli status, ...)
//!     - route lookup: a udp socket connected toward the hub. no packet is
//!       sent; the kernel only has to find a route, which it can't once the
//!       interface is gone.
//!
//! relationships:
//!     - used by: agent (attach during Connecting, is_up every iteration)
//!     - uses: tokio::process (attach/check commands), tokio::net (route lookup)
//!
//! ==============================================================================

use crate::error::ConnectivityError;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

#[async_trait]
pub trait NetworkLink: Send + Sync {
    /// one attach attempt. the agent owns retries and backoff.
    async fn attach(&self) -> Result<(), ConnectivityError>;

    /// cheap check run at the top of every iteration
    async fn is_up(&self) -> bool;
}

pub struct HostLink {
    hub_addr: String,
    attach_command: Vec<String>,
    check_command: Vec<String>,
    connect_timeout: Duration,
    check_timeout: Duration,
}

impl HostLink {
    /// `hub_url` is the same base url the transport posts to
    pub fn new(hub_url: &str, connect_timeout: Duration) -> Result<Self, ConnectivityError> {
        Ok(Self {
            hub_addr: hub_socket_addr(hub_url)?,
            attach_command: Vec::new(),
            check_command: Vec::new(),
            connect_timeout,
            check_timeout: Duration::from_secs(5),
        })
    }

    /// run before every attach attempt (joining a wifi network, ...)
    pub fn with_attach_command(mut self, command: Vec<String>) -> Self {
        self.attach_command = command;
        self
    }

    pub fn with_check_command(mut self, command: Vec<String>) -> Self {
        self.check_command = command;
        self
    }

    pub fn hub_addr(&self) -> &str {
        &self.hub_addr
    }

    async fn check(&self) -> Result<(), ConnectivityError> {
        if self.check_command.is_empty() {
            self.route_to_hub().await
        } else {
            run_command(&self.check_command, self.check_timeout).await
        }
    }

    async fn route_to_hub(&self) -> Result<(), ConnectivityError> {
        let unreachable = |reason: String| ConnectivityError::Unreachable {
            addr: self.hub_addr.clone(),
            reason,
        };

        let lookup = tokio::time::timeout(self.check_timeout, tokio::net::lookup_host(&self.hub_addr))
            .await
            .map_err(|_| unreachable("name lookup timed out".into()))?
            .map_err(|e| unreachable(format!("name lookup failed: {}", e)))?;

        let mut last = String::from("no addresses");
        for addr in lookup {
            match routable(addr).await {
                Ok(()) => return Ok(()),
                Err(e) => last = e.to_string(),
            }
        }
        Err(unreachable(last))
    }
}

#[async_trait]
impl NetworkLink for HostLink {
    async fn attach(&self) -> Result<(), ConnectivityError> {
        if !self.attach_command.is_empty() {
            run_command(&self.attach_command, self.connect_timeout).await?;
        }
        self.check().await?;
        tracing::info!("[LINK] Network attached (hub at {})", self.hub_addr);
        Ok(())
    }

    async fn is_up(&self) -> bool {
        self.check().await.is_ok()
    }
}

async fn routable(addr: SocketAddr) -> std::io::Result<()> {
    let local: SocketAddr = if addr.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = tokio::net::UdpSocket::bind(local).await?;
    socket.connect(addr).await
}

async fn run_command(command: &[String], timeout: Duration) -> Result<(), ConnectivityError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };

    tracing::debug!("[LINK] Running {}", program);
    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ConnectivityError::Attach(format!("{} timed out", program)))?
    .map_err(|e| ConnectivityError::Attach(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConnectivityError::Attach(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// "http://10.15.22.38:9000/" -> "10.15.22.38:9000"
fn hub_socket_addr(hub_url: &str) -> Result<String, ConnectivityError> {
    let url = reqwest::Url::parse(hub_url)
        .map_err(|e| ConnectivityError::InvalidUrl(format!("{}: {}", hub_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ConnectivityError::InvalidUrl(format!("{}: no host", hub_url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ConnectivityError::InvalidUrl(format!("{}: no port", hub_url)))?;
    Ok(format!("{}:{}", host, port))
}
