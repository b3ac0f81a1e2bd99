//! TCP RPC server for the plugin process.
//!
//! Accepts connections from the plugin host on an already-bound loopback
//! listener and dispatches JSON-RPC method calls.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is handled in its own
//! spawned task. The dispatcher is shared via `Arc` and must do its own
//! synchronization.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::ServeConfig;
use crate::{PluginError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Handle to a running RPC server. Dropping shuts down the server.
pub struct RpcServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    active_connections: Arc<AtomicUsize>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Stop accepting new connections.
    ///
    /// Open connections keep being served until `close_connections` is
    /// called or the handle is dropped.
    pub fn stop_accepting(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Signal all active connection handlers to close.
    pub fn close_connections(&self) {
        let _ = self.conn_shutdown_tx.send(true);
    }

    /// Shut down the server.
    ///
    /// Stops accepting new connections and signals all active connection
    /// handlers to close.
    pub fn shutdown(&mut self) {
        self.stop_accepting();
        self.close_connections();
    }

    /// Stop accepting, give open connections up to `grace` to finish, then
    /// close the rest and wait for the accept loop to exit.
    pub async fn shutdown_gracefully(&mut self, grace: Duration) {
        self.stop_accepting();

        let deadline = tokio::time::Instant::now() + grace;
        while self.active_connections() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.close_connections();
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                warn!("RPC accept loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Trait for dispatching RPC method calls.
#[async_trait::async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    /// Dispatch a JSON-RPC method call and return the result.
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, PluginError>;
}

/// RPC server that serves plugin host connections.
pub struct RpcServer;

impl RpcServer {
    /// Start serving on an already-bound listener.
    ///
    /// The listener is accepting as soon as this returns. The server runs in
    /// background tokio tasks.
    pub fn start<D: RpcDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        config: &ServeConfig,
    ) -> Result<RpcServerHandle> {
        let addr = listener.local_addr()?;

        info!("RPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(accept_loop(
            listener,
            dispatch,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections.clone(),
            ConnectionLimits {
                max_connections: config.max_connections,
                max_message_size: config.max_message_size,
            },
        ));

        Ok(RpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            active_connections,
            task_handle: Some(task_handle),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_connections: usize,
    max_message_size: usize,
}

/// Responses a connection may queue before request tasks wait on the writer.
const RESPONSE_QUEUE_DEPTH: usize = 64;

async fn accept_loop<D: RpcDispatch>(
    listener: TcpListener,
    dispatch: Arc<D>,
    mut stop_rx: oneshot::Receiver<()>,
    close_rx: watch::Receiver<bool>,
    active_connections: Arc<AtomicUsize>,
    limits: ConnectionLimits,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut stop_rx => {
                info!("RPC server stopped accepting");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            },
        };

        if active_connections.load(Ordering::Acquire) >= limits.max_connections {
            warn!(
                "Rejecting connection from {}: {} connections already open",
                peer, limits.max_connections
            );
            continue;
        }
        active_connections.fetch_add(1, Ordering::AcqRel);

        let connection = Connection {
            peer,
            dispatch: dispatch.clone(),
            close_rx: close_rx.clone(),
            max_message_size: limits.max_message_size,
        };
        let active_connections = active_connections.clone();
        tokio::spawn(async move {
            debug!("Connection from {}", peer);
            if let Err(e) = connection.serve(stream).await {
                debug!("Connection {} ended: {}", peer, e);
            }
            active_connections.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// Why a connection stopped reading requests.
enum ReadEnd {
    PeerClosed,
    ServerClosing,
}

/// One accepted host connection.
///
/// Every request frame is dispatched in its own task, so calls on the same
/// connection run concurrently. A single writer task sends responses in the
/// order they complete; the host matches them to requests by id.
struct Connection<D> {
    peer: SocketAddr,
    dispatch: Arc<D>,
    close_rx: watch::Receiver<bool>,
    max_message_size: usize,
}

impl<D: RpcDispatch> Connection<D> {
    async fn serve(mut self, stream: TcpStream) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE_DEPTH);
        let mut writer = tokio::spawn(write_responses(writer, response_rx));
        let mut in_flight = JoinSet::new();

        let ended = self.read_requests(reader, response_tx, &mut in_flight).await;
        let result = match ended {
            // The host may only have closed its write side, so answer what
            // was already received unless the server is closing.
            Ok(ReadEnd::PeerClosed) => {
                let finish = async {
                    while in_flight.join_next().await.is_some() {}
                    match (&mut writer).await {
                        Ok(written) => written,
                        Err(e) => Err(PluginError::Other(format!("response writer failed: {}", e))),
                    }
                };
                tokio::select! {
                    written = finish => written,
                    _ = self.close_rx.changed() => Ok(()),
                }
            }
            Ok(ReadEnd::ServerClosing) => Ok(()),
            Err(e) => Err(e),
        };

        in_flight.abort_all();
        writer.abort();
        debug!("Connection {} closed", self.peer);
        result
    }

    async fn read_requests(
        &mut self,
        mut reader: OwnedReadHalf,
        responses: mpsc::Sender<RpcResponse>,
        in_flight: &mut JoinSet<()>,
    ) -> Result<ReadEnd> {
        loop {
            let frame = tokio::select! {
                read = read_frame(&mut reader, self.max_message_size) => match read? {
                    Some(frame) => frame,
                    None => return Ok(ReadEnd::PeerClosed),
                },
                _ = self.close_rx.changed() => return Ok(ReadEnd::ServerClosing),
            };

            let dispatch = self.dispatch.clone();
            let responses = responses.clone();
            in_flight.spawn(async move {
                let response = process_request(&frame, dispatch.as_ref()).await;
                // Only fails once the writer is gone, and then nobody is listening.
                let _ = responses.send(response).await;
            });

            // Reap finished requests so the set only tracks running ones.
            while in_flight.try_join_next().is_some() {}
        }
    }
}

async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut responses: mpsc::Receiver<RpcResponse>,
) -> Result<()> {
    while let Some(response) = responses.recv().await {
        write_frame(&mut writer, &serde_json::to_vec(&response)?).await?;
    }
    Ok(())
}

async fn process_request<D: RpcDispatch>(frame: &[u8], dispatch: &D) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_slice(frame) {
        Ok(request) => request,
        Err(e) => return RpcResponse::error(None, -32700, format!("Parse error: {}", e)),
    };

    if request.jsonrpc != "2.0" {
        return RpcResponse::error(
            request.id,
            -32600,
            "Invalid Request: expected jsonrpc 2.0".to_string(),
        );
    }

    let params = request
        .params
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

    match dispatch.dispatch(&request.method, params).await {
        Ok(result) => RpcResponse::success(request.id, result),
        Err(e) => RpcResponse::error(request.id, e.to_rpc_error_code(), e.to_string()),
    }
}
