//! Integration tests for the funplugin-rpc plugin binary.
//!
//! These tests spawn the binary the way a host does, read the handshake line
//! from its stdout and call the example functions over the announced address.

use funplugin::{Handshake, PluginClient, PluginError, PluginProtocol};
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

struct PluginProcess {
    child: tokio::process::Child,
    handshake: Handshake,
}

impl PluginProcess {
    async fn client(&self) -> PluginClient {
        PluginClient::connect(self.handshake.addr)
            .await
            .expect("Failed to connect to plugin")
    }

    async fn stop(mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

fn plugin_binary() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_funplugin-rpc") {
        return Ok(PathBuf::from(path));
    }

    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("funplugin-rpc");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_funplugin-rpc not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

/// Start the plugin binary and wait for its handshake line.
async fn start_plugin(args: &[&str], plugin_type: Option<&str>) -> Result<PluginProcess, String> {
    let mut command = tokio::process::Command::new(plugin_binary()?);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    match plugin_type {
        Some(value) => command.env("HRP_PLUGIN_TYPE", value),
        None => command.env_remove("HRP_PLUGIN_TYPE"),
    };

    let mut child = command
        .spawn()
        .map_err(|e| format!("failed to spawn funplugin-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let line = match tokio::time::timeout(Duration::from_secs(20), lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Err("plugin exited before announcing".to_string()),
        Ok(Err(e)) => return Err(format!("failed reading plugin stdout: {e}")),
        Err(_) => return Err("timed out waiting for handshake".to_string()),
    };

    let handshake = line
        .parse::<Handshake>()
        .map_err(|e| format!("invalid handshake line '{line}': {e}"))?;

    Ok(PluginProcess { child, handshake })
}

#[tokio::test]
async fn test_handshake_line() {
    let plugin = start_plugin(&[], None).await.unwrap();
    let handshake = &plugin.handshake;

    assert_eq!(handshake.core_version, 1);
    assert_eq!(handshake.app_version, 1);
    assert_eq!(handshake.network, "tcp");
    assert_eq!(handshake.protocol, PluginProtocol::Grpc);
    assert!(handshake.addr.ip().is_loopback());
    assert!((20000..=60000).contains(&handshake.addr.port()));
    assert_eq!(
        handshake.to_string(),
        format!("1|1|tcp|127.0.0.1:{}|grpc", handshake.addr.port())
    );

    plugin.stop().await;
}

#[tokio::test]
async fn test_get_names() {
    let plugin = start_plugin(&[], None).await.unwrap();
    let client = plugin.client().await;

    let mut names = client.get_names().await.unwrap();
    names.sort();
    assert_eq!(
        names,
        vec![
            "concatenate",
            "setup_hook_example",
            "sum",
            "sum_ints",
            "sum_strings",
            "sum_two_int",
            "sum_two_string",
            "teardown_hook_example",
        ]
    );

    plugin.stop().await;
}

#[tokio::test]
async fn test_call_example_functions() {
    let plugin = start_plugin(&[], None).await.unwrap();
    let client = plugin.client().await;

    assert_eq!(client.call_raw("sum_two_int", b"[3,4]").await.unwrap(), b"7");
    assert_eq!(
        client.call_raw("concatenate", br#"["a",1,"b"]"#).await.unwrap(),
        br#""a1b""#
    );
    assert_eq!(
        client
            .call("sum", &[json!(1), json!(2), json!(3.5)])
            .await
            .unwrap(),
        json!(6.5)
    );
    assert_eq!(
        client
            .call("sum_strings", &[json!("x"), json!("y")])
            .await
            .unwrap(),
        json!("xy")
    );
    assert_eq!(
        client
            .call("setup_hook_example", &[json!("demo")])
            .await
            .unwrap(),
        json!("setup_hook_example: demo")
    );

    plugin.stop().await;
}

#[tokio::test]
async fn test_call_unknown_function() {
    let plugin = start_plugin(&[], None).await.unwrap();
    let client = plugin.client().await;

    match client.call("nonexistent", &[]).await.unwrap_err() {
        PluginError::Remote { code, message } => {
            assert_eq!(code, -32001);
            assert_eq!(message, "Function nonexistent not registered!");
        }
        other => panic!("Expected Remote error, got: {:?}", other),
    }

    // Still serving afterwards.
    assert_eq!(
        client.call("sum_two_int", &[json!(1), json!(1)]).await.unwrap(),
        json!(2)
    );

    plugin.stop().await;
}

#[tokio::test]
async fn test_concurrent_instances_get_distinct_ports() {
    let starts = (0..4).map(|_| start_plugin(&[], None));
    let plugins: Vec<PluginProcess> = futures::future::join_all(starts)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let mut ports: Vec<u16> = plugins.iter().map(|p| p.handshake.addr.port()).collect();
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), plugins.len());

    for plugin in &plugins {
        let client = plugin.client().await;
        assert_eq!(
            client.call("sum_two_int", &[json!(3), json!(4)]).await.unwrap(),
            json!(7)
        );
    }

    for plugin in plugins {
        plugin.stop().await;
    }
}

#[tokio::test]
async fn test_protocol_selection() {
    let plugin = start_plugin(&[], Some("rpc")).await.unwrap();
    assert_eq!(plugin.handshake.protocol, PluginProtocol::NetRpc);
    plugin.stop().await;

    let plugin = start_plugin(&["--protocol", "grpc"], Some("rpc"))
        .await
        .unwrap();
    assert_eq!(plugin.handshake.protocol, PluginProtocol::Grpc);
    plugin.stop().await;
}

#[tokio::test]
async fn test_port_range_override() {
    let plugin = start_plugin(&["--port-min", "41000", "--port-max", "41999"], None)
        .await
        .unwrap();
    assert!((41000..=41999).contains(&plugin.handshake.addr.port()));
    plugin.stop().await;
}

#[tokio::test]
async fn test_log_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let log_path = temp_dir.path().join("plugin.log");
    let log_arg = log_path.to_string_lossy().to_string();

    let plugin = start_plugin(&["--log-file", &log_arg], None).await.unwrap();
    let client = plugin.client().await;
    client.call("sum_two_int", &[json!(1), json!(2)]).await.unwrap();
    plugin.stop().await;

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let first = contents.lines().next().expect("log file is empty");
    let entry: serde_json::Value = serde_json::from_str(first).unwrap();
    assert!(entry.get("level").is_some());
    assert!(contents.contains("register function: sum_two_int"));
}
