//! Opening the outbound stream for a session.

use std::future::Future;
use std::io;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens the outbound socket once a handshake names a destination.
pub trait Dialer {
    fn dial(&self, host: &str, port: u16) -> impl Future<Output = io::Result<TcpStream>> + Send;
}

/// Plain TCP connect with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, host: &str, port: u16) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let host = host.to_string();
        async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(host = %host, port, error = %e, "failed to set TCP_NODELAY on outbound socket");
            }
            Ok(stream)
        }
    }
}
