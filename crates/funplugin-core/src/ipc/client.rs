//! Host-side client for a plugin process.
//!
//! Connects to the address announced in the handshake line and exposes the
//! two plugin methods. Arguments are encoded as a JSON list and the returned
//! payload is decoded as JSON, so `7` comes back as a number and `"a1b"` as a
//! string.
//!
//! # Concurrency
//!
//! One connection carries any number of outstanding requests. A writer task
//! owns the write half and a reader task routes each response to its waiting
//! request by id, so a caller that gives up on a request (for example through
//! `tokio::time::timeout`) never sees another request's response.

use super::protocol::{
    read_frame, write_frame, CallParams, CallResult, GetNamesResult, RpcRequest, RpcResponse,
    METHOD_CALL, METHOD_GET_NAMES,
};
use crate::announce::Handshake;
use crate::codec::encode_args;
use crate::config::ServerConfig;
use crate::{PluginError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Requests that may be queued for the writer at once.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Client connected to a plugin's RPC server.
pub struct PluginClient {
    addr: SocketAddr,
    outbound: mpsc::Sender<Vec<u8>>,
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl PluginClient {
    /// Connect to a plugin at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(ServerConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PluginError::ConnectionLost { addr })?
            .map_err(|_| PluginError::ConnectionLost { addr })?;

        debug!("Connected to plugin at {}", addr);

        let (read_half, write_half) = stream.into_split();
        let pending = Arc::new(PendingRequests::new());
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let reader = tokio::spawn(read_responses(read_half, pending.clone(), addr));
        let writer = tokio::spawn(write_requests(write_half, outbound_rx, pending.clone(), addr));

        Ok(Self {
            addr,
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    /// Parse a handshake line and connect to the address it announces.
    pub async fn from_handshake(line: &str) -> Result<Self> {
        let handshake: Handshake = line.parse()?;
        Self::connect(handshake.addr).await
    }

    /// List the plugin's registered function names.
    pub async fn get_names(&self) -> Result<Vec<String>> {
        let result = self.request(METHOD_GET_NAMES, serde_json::json!({})).await?;
        let names: GetNamesResult = serde_json::from_value(result)?;
        Ok(names.names)
    }

    /// Call a function and decode its result as JSON.
    pub async fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let payload = self.call_raw(name, &encode_args(args)?).await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Call a function with an already-encoded argument list and return the
    /// encoded result.
    pub async fn call_raw(&self, name: &str, args: &[u8]) -> Result<Vec<u8>> {
        let args = String::from_utf8(args.to_vec()).map_err(|e| PluginError::MalformedArguments {
            message: e.to_string(),
        })?;
        let params = serde_json::to_value(CallParams {
            name: name.to_string(),
            args,
        })?;

        let result = self.request(METHOD_CALL, params).await?;
        let result: CallResult = serde_json::from_value(result)?;
        Ok(result.value.into_bytes())
    }

    /// Send one JSON-RPC request and wait for its response.
    ///
    /// Dropping the returned future abandons the request; its response is
    /// discarded when it arrives.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let lost = || PluginError::ConnectionLost { addr: self.addr };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&RpcRequest::new(method, params, id))?;

        let response = self.pending.register(id).ok_or_else(lost)?;
        let _waiting = Waiting {
            pending: &self.pending,
            id,
        };

        self.outbound.send(payload).await.map_err(|_| lost())?;
        let response = response.await.map_err(|_| lost())?;

        if let Some(err) = response.error {
            return Err(PluginError::Remote {
                code: err.code,
                message: err.message,
            });
        }

        response
            .result
            .ok_or_else(|| PluginError::Other("plugin response missing result".to_string()))
    }

    /// Get the address of the connected plugin.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

type ResponseSlot = oneshot::Sender<RpcResponse>;

/// Requests waiting for a response, keyed by id.
///
/// The map is `None` once the connection is gone: waiting requests are failed
/// by dropping their slots and new ones are refused.
struct PendingRequests {
    slots: Mutex<Option<HashMap<u64, ResponseSlot>>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Some(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<u64, ResponseSlot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) -> Option<oneshot::Receiver<RpcResponse>> {
        let (slot, response) = oneshot::channel();
        self.lock().as_mut()?.insert(id, slot);
        Some(response)
    }

    fn forget(&self, id: u64) {
        if let Some(slots) = self.lock().as_mut() {
            slots.remove(&id);
        }
    }

    fn complete(&self, response: RpcResponse) {
        let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
            warn!("Dropping plugin response without a request id");
            return;
        };

        let slot = self.lock().as_mut().and_then(|slots| slots.remove(&id));
        match slot {
            // The receiver may have been dropped in the meantime.
            Some(slot) => {
                let _ = slot.send(response);
            }
            None => debug!("Dropping response to abandoned request {}", id),
        }
    }

    fn close(&self) {
        self.lock().take();
    }
}

/// Removes a request's slot when its caller stops waiting.
struct Waiting<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.pending.forget(self.id);
    }
}

async fn read_responses(mut reader: OwnedReadHalf, pending: Arc<PendingRequests>, addr: SocketAddr) {
    loop {
        let frame = match read_frame(&mut reader, ServerConfig::MAX_MESSAGE_SIZE).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from plugin at {}: {}", addr, e);
                break;
            }
        };

        match serde_json::from_slice::<RpcResponse>(&frame) {
            Ok(response) => pending.complete(response),
            Err(e) => {
                warn!("Unparseable response from plugin at {}: {}", addr, e);
                break;
            }
        }
    }

    debug!("Connection to plugin at {} closed", addr);
    pending.close();
}

async fn write_requests(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    pending: Arc<PendingRequests>,
    addr: SocketAddr,
) {
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("Failed to write to plugin at {}: {}", addr, e);
            pending.close();
            return;
        }
    }
}
