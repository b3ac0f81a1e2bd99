//! Resolves, invokes and encodes function calls.
//!
//! A call runs through four stages, each returning `Result` so that the first
//! failure aborts the rest:
//!
//! ```text
//! resolve(name) -> decode(args) -> invoke(fn, args) -> encode(value)
//! ```
//!
//! Invocations run on tokio's blocking pool, gated by a semaphore sized to the
//! worker pool. Calls beyond the pool size wait for a free permit.

use crate::codec::{decode_args, encode_return};
use crate::ipc::protocol::{CallParams, CallResult, GetNamesResult, METHOD_CALL, METHOD_GET_NAMES};
use crate::ipc::server::RpcDispatch;
use crate::registry::FunctionRegistry;
use crate::{PluginError, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Serves `GetNames` and `Call` against a registry.
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>, workers: usize) -> Self {
        Self {
            registry,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Names of all currently registered functions.
    pub fn get_names(&self) -> Vec<String> {
        self.registry.list_names()
    }

    /// Invoke `name` with an encoded argument list and encode its result.
    pub async fn call(&self, name: &str, args: &[u8]) -> Result<Vec<u8>> {
        let function = self.registry.resolve(name)?;
        let args = decode_args(args)?;

        debug!("call function: {}({:?})", name, args);

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| PluginError::Other("worker pool closed".to_string()))?;

        let value = tokio::task::spawn_blocking(move || function.invoke(&args))
            .await
            .map_err(|e| PluginError::InvocationFailed {
                name: name.to_string(),
                message: panic_message(e),
            })??;

        encode_return(&value)
    }

    async fn handle_call(&self, params: Value) -> Result<Value> {
        let params: CallParams =
            serde_json::from_value(params).map_err(|e| PluginError::InvalidParams {
                message: e.to_string(),
            })?;

        let value = self.call(&params.name, params.args.as_bytes()).await?;
        let value = String::from_utf8(value).map_err(|e| PluginError::Other(e.to_string()))?;

        Ok(serde_json::to_value(CallResult { value })?)
    }
}

#[async_trait::async_trait]
impl RpcDispatch for Dispatcher {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        let result = match method {
            METHOD_GET_NAMES => {
                debug!("GetNames called");
                Ok(serde_json::to_value(GetNamesResult {
                    names: self.get_names(),
                })?)
            }
            METHOD_CALL => self.handle_call(params).await,
            other => Err(PluginError::MethodNotFound {
                method: other.to_string(),
            }),
        };

        if let Err(e) = &result {
            warn!("{} failed: {}", method, e);
        }
        result
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}
