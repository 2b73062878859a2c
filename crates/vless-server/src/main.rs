//! vless-server: VLESS over WebSocket relay.
//!
//! Accepts WebSocket upgrades on a single secret path, authenticates the
//! first binary message against a configured UUID and relays bytes to the
//! requested TCP destination. Also serves a status page and a subscription
//! document on the same port.

mod config;
mod gate;
mod http;
mod label;
mod liveness;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{Overrides, ServerConfig};
use label::{IspLabel, DEFAULT_META_URL};
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// VLESS over WebSocket relay server
#[derive(Parser, Debug)]
#[command(name = "vless-server", version, about = "VLESS over WebSocket relay")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.vless/config.toml")]
    config: String,

    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Client UUID
    #[arg(long, env = "UUID")]
    uuid: Option<String>,

    /// WebSocket path (defaults to the first 8 characters of the UUID)
    #[arg(long, env = "WSPATH")]
    ws_path: Option<String>,

    /// Subscription path
    #[arg(long, env = "SUB_PATH")]
    sub_path: Option<String>,

    /// Node name prefix in generated links
    #[arg(long, env = "NAME")]
    name: Option<String>,

    /// Public domain used for TLS links
    #[arg(long, env = "DOMAIN")]
    domain: Option<String>,

    /// Subscription mode (plain, tls, both)
    #[arg(long, env = "SUB_MODE")]
    sub_mode: Option<String>,

    /// Heartbeat interval in seconds
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            uuid: self.uuid.clone(),
            ws_path: self.ws_path.clone(),
            sub_path: self.sub_path.clone(),
            name: self.name.clone(),
            domain: self.domain.clone(),
            sub_mode: self.sub_mode.clone(),
            heartbeat_secs: self.heartbeat_secs,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    // Load server config (defaults, file, then env/CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if !server_config.credential.is_standard_uuid() {
        warn!("configured UUID is not a standard RFC 4122 UUID");
    }

    let label = IspLabel::new(DEFAULT_META_URL);
    label.warm_up();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = server_config.port,
        ws_path = %server_config.relay_target(),
        sub_path = %server_config.sub_target(),
        mode = %server_config.sub_mode,
        "starting vless-server"
    );

    let relay_server = RelayServer::new(server_config, label);

    tokio::select! {
        result = relay_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("vless-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "vless-server",
            "--port",
            "8443",
            "--ws-path",
            "/tunnel",
            "--sub-mode",
            "both",
        ])
        .unwrap();
        let o = cli.overrides();
        assert_eq!(o.port, Some(8443));
        assert_eq!(o.ws_path.as_deref(), Some("/tunnel"));
        assert_eq!(o.sub_mode.as_deref(), Some("both"));
        assert_eq!(cli.config, "~/.vless/config.toml");
    }
}
