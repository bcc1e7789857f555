//! Demo server exposing remote shells over a WebSocket.
//!
//! Run with: cargo run -p shell-server
//!
//! Then connect a WebSocket client to ws://127.0.0.1:5985/ws. Settings are
//! read from the JSON file named by `REMOTE_SHELL_CONFIG`, if set.

use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context as _;
use axum::{Router, routing::get};
use remote_shell_core::{Backend, EngineConfig};
use remote_shell_executor::{EchoBackend, ProcessBackend, ProcessConfig};
use remote_shell_session::ShellEngine;
use remote_shell_transport::websocket::create_ws_router;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "REMOTE_SHELL_CONFIG";

/// Which backend runs the commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BackendKind {
    /// Accept everything, echo Send data back to Receive.
    #[default]
    Echo,
    /// Run commands as local child processes.
    Process,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5985))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: SocketAddr,
    #[serde(default)]
    backend: BackendKind,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    process: ProcessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            backend: BackendKind::default(),
            engine: EngineConfig::default(),
            process: ProcessConfig::default(),
        }
    }
}

impl ServerConfig {
    fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    fn backend(&self) -> Arc<dyn Backend> {
        match self.backend {
            BackendKind::Echo => Arc::new(EchoBackend::new()),
            BackendKind::Process => Arc::new(ProcessBackend::new(self.process.clone())),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::load()?;
    tracing::info!(backend = ?config.backend, max_shells = config.engine.max_shells, "Loaded config");

    let engine = Arc::new(ShellEngine::with_config(
        config.backend(),
        config.engine.clone(),
    ));

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(create_ws_router(Arc::clone(&engine)));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Server listening on ws://{}/ws", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server failed")?;

    let freed = engine.shutdown().await;
    tracing::info!(freed, "Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind.port(), 5985);
        assert_eq!(config.backend, BackendKind::Echo);
    }

    #[test]
    fn test_config_overrides() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"bind":"0.0.0.0:8080","backend":"process","engine":{"max_shells":4},"process":{"working_dir":"/tmp"}}"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Process);
        assert_eq!(config.engine.max_shells, 4);
        assert_eq!(config.process.read_buffer_size, 4096);
        assert_eq!(config.process.working_dir.as_deref(), Some(Path::new("/tmp")));
    }
}
