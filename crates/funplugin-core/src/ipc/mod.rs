//! Local RPC between a plugin process and its host.
//!
//! Uses length-prefixed JSON-RPC 2.0 over `127.0.0.1` TCP connections.
//!
//! # Architecture
//!
//! - **Server**: Runs in the plugin process, accepts connections, dispatches method calls
//! - **Client**: Runs in the host, connects to the announced address and calls functions
//! - **Protocol**: Shared framing and JSON-RPC types used by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::PluginClient;
pub use protocol::{RpcRequest, RpcResponse};
pub use server::{RpcDispatch, RpcServer, RpcServerHandle};
