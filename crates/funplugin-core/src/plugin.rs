//! Serving a registry as a plugin process.
//!
//! Start order matters to the host: the listener must already be accepting
//! when the handshake line appears on stdout, because the host may dial the
//! address as soon as it reads the line.

use crate::announce::{announce, select_port, Handshake};
use crate::config::{ProtocolConfig, ServeConfig};
use crate::dispatch::Dispatcher;
use crate::ipc::server::{RpcServer, RpcServerHandle};
use crate::lifecycle::{wait_for_shutdown, ShutdownToken};
use crate::registry::FunctionRegistry;
use crate::Result;
use std::io::Write;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// A running plugin server.
pub struct PluginServer {
    handshake: Handshake,
    handle: RpcServerHandle,
    shutdown_grace: Duration,
}

impl PluginServer {
    /// Bind a port and start serving without announcing.
    pub async fn start(registry: Arc<FunctionRegistry>, config: ServeConfig) -> Result<Self> {
        config.validate()?;

        let port = select_port(&config.port)?;
        let listener = TcpListener::bind(SocketAddrV4::new(ProtocolConfig::LOOPBACK, port)).await?;

        let dispatcher = Arc::new(Dispatcher::new(registry, config.workers));
        let handle = RpcServer::start(listener, dispatcher, &config)?;
        let handshake = Handshake::new(handle.addr(), config.protocol);

        Ok(Self {
            handshake,
            handle,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.addr()
    }

    /// Write the handshake line to `out` and flush.
    pub fn announce_to<W: Write>(&self, out: W) -> Result<()> {
        announce(&self.handshake, out)?;
        info!("Announced handshake: {}", self.handshake);
        Ok(())
    }

    /// Block until an OS signal or `token` asks for shutdown, then stop.
    pub async fn run_until(self, token: ShutdownToken) -> Result<()> {
        let waited = wait_for_shutdown(&token).await;
        self.stop().await;
        waited
    }

    /// Stop accepting and close the listener after the configured grace.
    pub async fn stop(mut self) {
        info!("Stopping plugin server on {}", self.handle.addr());
        self.handle.shutdown_gracefully(self.shutdown_grace).await;
    }
}

/// Start serving `registry` and announce the handshake on stdout.
pub async fn serve(registry: Arc<FunctionRegistry>, config: ServeConfig) -> Result<PluginServer> {
    let server = PluginServer::start(registry, config).await?;
    server.announce_to(std::io::stdout().lock())?;
    Ok(server)
}

/// Serve with defaults (protocol from `HRP_PLUGIN_TYPE`) until interrupted.
pub async fn serve_forever(registry: FunctionRegistry) -> Result<()> {
    let server = serve(Arc::new(registry), ServeConfig::from_env()).await?;
    server.run_until(ShutdownToken::new()).await
}
