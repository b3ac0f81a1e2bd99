//! Funplugin - serve named functions to a plugin host over local RPC.
//!
//! A plugin process registers functions by name, binds a loopback port,
//! announces it with a single handshake line on stdout and then answers
//! `GetNames` and `Call` requests until it is told to stop.
//!
//! # Example
//!
//! ```rust,no_run
//! use funplugin::FunctionRegistry;
//!
//! #[tokio::main]
//! async fn main() -> funplugin::Result<()> {
//!     let registry = FunctionRegistry::new();
//!     registry.register("sum_two_int", |a: i64, b: i64| a + b);
//!     registry.register("greet", |name: String| format!("hello {}", name));
//!
//!     // Prints `1|1|tcp|127.0.0.1:PORT|grpc` and serves until Ctrl-C.
//!     funplugin::serve_forever(registry).await
//! }
//! ```

pub mod announce;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod plugin;
pub mod registry;

// Re-export commonly used types
pub use announce::{announce, select_port, Handshake};
pub use codec::{decode_args, encode_args, encode_return, ReturnValue};
pub use config::{PluginProtocol, PortRange, PortSelection, ServeConfig};
pub use dispatch::Dispatcher;
pub use error::{PluginError, Result};
pub use ipc::PluginClient;
pub use lifecycle::{shutdown_signal, wait_for_shutdown, ShutdownToken};
pub use plugin::{serve, serve_forever, PluginServer};
pub use registry::{Arity, FunctionRegistry, IntoCallResult, IntoPluginFunction, RegisteredFunction};
