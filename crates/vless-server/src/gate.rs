//! Request-head classification and the upgrade admission gate.
//!
//! Every accepted socket starts with an HTTP/1.1 request head. Requests that
//! ask for a protocol upgrade go through [`UpgradeGate`]; a rejected upgrade
//! is dropped without writing a single byte. Everything else is ordinary
//! HTTP handled by [`crate::http`].

use tokio::io::{AsyncRead, AsyncReadExt};
use vless_core::{VlessError, VlessResult};

/// Upper bound on the request head.
pub const MAX_HEAD_LEN: usize = 8192;

const MAX_HEADERS: usize = 64;

/// The parts of a request head the server routes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Raw request target, query string included.
    pub target: String,
    pub host: Option<String>,
    /// Value of the `Upgrade` header, if any.
    pub upgrade: Option<String>,
}

impl RequestHead {
    pub fn is_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }
}

/// Parse a complete head from `buf`. `Ok(None)` means more bytes are needed.
pub fn parse_head(buf: &[u8]) -> VlessResult<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let status = req
        .parse(buf)
        .map_err(|e| VlessError::Transport(format!("bad request head: {e}")))?;
    if status.is_partial() {
        return Ok(None);
    }

    let header = |name: &str| {
        req.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| String::from_utf8_lossy(h.value).trim().to_string())
    };

    Ok(Some(RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        host: header("host"),
        upgrade: header("upgrade"),
    }))
}

/// Read from `stream` until a complete request head is buffered.
///
/// Returns the head and every byte consumed so far, so an admitted upgrade
/// can replay them.
pub async fn read_request_head<S>(stream: &mut S) -> VlessResult<(RequestHead, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(VlessError::Transport(
                "connection closed before request head".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head) = parse_head(&buf)? {
            return Ok((head, buf));
        }
        if buf.len() >= MAX_HEAD_LEN {
            return Err(VlessError::Transport(format!(
                "request head exceeds {MAX_HEAD_LEN} bytes"
            )));
        }
    }
}

/// Why an upgrade was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Method(String),
    Path(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Method(m) => write!(f, "method not allowed: {m}"),
            RejectReason::Path(p) => write!(f, "path not allowed: {p}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Reject(RejectReason),
}

/// Admits upgrades that use the single supported method on the exact relay
/// path. No trailing-slash or query-string tolerance.
#[derive(Debug, Clone)]
pub struct UpgradeGate {
    method: &'static str,
    target: String,
}

impl UpgradeGate {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            method: "GET",
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn check(&self, method: &str, target: &str) -> GateDecision {
        if method != self.method {
            return GateDecision::Reject(RejectReason::Method(method.to_string()));
        }
        if target != self.target {
            return GateDecision::Reject(RejectReason::Path(target.to_string()));
        }
        GateDecision::Admit
    }
}
