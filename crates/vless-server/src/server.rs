//! Core server: accepts sockets and routes each one to the upgrade gate,
//! a relay session, or the plain HTTP endpoints.
//!
//! Owns the immutable configuration, the credential, the heartbeat
//! supervisor and the display label. Every connection runs in its own task;
//! a failure in one never reaches another or the listener.

use crate::config::ServerConfig;
use crate::gate::{self, GateDecision, UpgradeGate};
use crate::http::{self, HttpContext};
use crate::label::IspLabel;
use crate::liveness::LivenessSupervisor;
use crate::session::RelaySession;
use crate::transport::{websocket, Rewind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use vless_core::{Credential, VlessError, VlessResult};

/// How long a client may take to send its request head.
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(30);

/// The relay server instance.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    credential: Arc<Credential>,
    gate: UpgradeGate,
    supervisor: LivenessSupervisor,
    http: HttpContext,
}

impl RelayServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig, label: IspLabel) -> Self {
        let config = Arc::new(config);
        let credential = Arc::new(config.credential.clone());
        let gate = UpgradeGate::new(config.relay_target());
        let supervisor = LivenessSupervisor::new(config.heartbeat);
        let http = HttpContext {
            config: config.clone(),
            label,
        };

        Self {
            config,
            credential,
            gate,
            supervisor,
            http,
        }
    }

    #[cfg(test)]
    pub fn supervisor(&self) -> &LivenessSupervisor {
        &self.supervisor
    }

    /// Bind the configured port and serve until the task is dropped.
    pub async fn run(self) -> VlessResult<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.port)
            .parse()
            .map_err(|e| VlessError::Other(format!("invalid address: {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| VlessError::Transport(format!("bind {addr} failed: {e}")))?;
        info!(addr = %addr, "listener started");
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> VlessResult<()> {
        let server = Arc::new(self);
        tokio::spawn(server.supervisor.clone().run());

        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let srv = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = srv.handle_connection(stream, remote).await {
                            debug!(remote = %remote, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, remote: SocketAddr) -> VlessResult<()> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(remote = %remote, error = %e, "failed to set TCP_NODELAY");
        }

        let (head, consumed) =
            tokio::time::timeout(REQUEST_HEAD_TIMEOUT, gate::read_request_head(&mut stream))
                .await
                .map_err(|_| VlessError::Transport("request head timed out".into()))??;

        if !head.is_upgrade() {
            return http::serve(&mut stream, &head, &self.http).await;
        }

        if let GateDecision::Reject(reason) = self.gate.check(&head.method, &head.target) {
            // Dropping the socket closes it with nothing written.
            debug!(remote = %remote, reason = %reason, "upgrade rejected");
            return Ok(());
        }

        let ws = websocket::accept(Rewind::new(consumed, stream)).await?;
        let liveness = self.supervisor.register();
        let session_id = generate_session_id();
        debug!(
            session_id = %session_id,
            remote = %remote,
            transport_id = liveness.id(),
            "upgrade admitted"
        );

        let reason = RelaySession::new(session_id, remote, ws, liveness, self.credential.clone())
            .run()
            .await;
        if let crate::session::CloseReason::RelayIoError(ref e) = reason {
            warn!(remote = %remote, error = %e, "relay ended with I/O error");
        }
        Ok(())
    }
}

/// Generate a random session ID for log correlation.
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
