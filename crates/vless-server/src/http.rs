//! Plain HTTP endpoints served on the relay port: a status page and the
//! base64 subscription document. One response per connection.

use crate::config::ServerConfig;
use crate::gate::RequestHead;
use crate::label::IspLabel;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use vless_core::{build_links, encode_subscription, LinkParams, VlessResult};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// State the HTTP endpoints read from.
#[derive(Clone)]
pub struct HttpContext {
    pub config: Arc<ServerConfig>,
    pub label: IspLabel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Response {
    fn text(status: u16, reason: &'static str, body: String) -> Self {
        Self {
            status,
            reason,
            headers: vec![("Content-Type", TEXT_PLAIN.to_string())],
            body,
        }
    }

    /// Serialize as an HTTP/1.1 response that closes the connection.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        out.push_str("Connection: close\r\n\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

/// Answer one non-upgrade request and close the write side.
pub async fn serve<S>(stream: &mut S, head: &RequestHead, ctx: &HttpContext) -> VlessResult<()>
where
    S: AsyncWrite + Unpin,
{
    let response = route(head, ctx).await;
    debug!(method = %head.method, target = %head.target, status = response.status, "http request");
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn route(head: &RequestHead, ctx: &HttpContext) -> Response {
    let config = &ctx.config;
    if head.target == "/" {
        status_page(config)
    } else if head.target == config.sub_target() {
        subscription(head, ctx).await
    } else {
        Response::text(404, "Not Found", "Not Found\n".to_string())
    }
}

fn status_page(config: &ServerConfig) -> Response {
    Response::text(
        200,
        "OK",
        format!(
            "VLESS/WS Server Running\nMode: {}\nWS Path: {}\n",
            config.sub_mode,
            config.relay_target()
        ),
    )
}

async fn subscription(head: &RequestHead, ctx: &HttpContext) -> Response {
    let config = &ctx.config;
    let label = ctx.label.resolve().await;
    let host_header = head
        .host
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.domain, config.port));

    let links = build_links(
        &LinkParams {
            uuid: config.credential.as_str(),
            ws_path: &config.ws_path,
            name: &config.name,
            label: label.as_deref(),
            domain: &config.domain,
            listen_port: config.port,
            mode: config.sub_mode,
        },
        &host_header,
    );

    let mut response = Response::text(200, "OK", format!("{}\n", encode_subscription(&links)));
    response
        .headers
        .push(("Content-Disposition", "inline".to_string()));
    response
        .headers
        .push(("Cache-Control", "no-store".to_string()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, Overrides};
    use crate::label::LabelState;

    fn ctx() -> HttpContext {
        let config = ServerConfig::resolve(ConfigFile::default(), Overrides::default()).unwrap();
        HttpContext {
            config: Arc::new(config),
            label: IspLabel::with_state(LabelState::Ready("US-Test_Net".into())),
        }
    }

    fn head(target: &str, host: Option<&str>) -> RequestHead {
        RequestHead {
            method: "GET".into(),
            target: target.into(),
            host: host.map(str::to_string),
            upgrade: None,
        }
    }

    #[tokio::test]
    async fn status_page_lists_path_and_mode() {
        let resp = route(&head("/", None), &ctx()).await;
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("Mode: plain"));
        assert!(resp.body.contains("WS Path: /5efabea4"));
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let resp = route(&head("/sub/", None), &ctx()).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, "Not Found\n");
    }

    #[tokio::test]
    async fn subscription_encodes_links_for_request_host() {
        let resp = route(&head("/sub", Some("node.example:8080")), &ctx()).await;
        assert_eq!(resp.status, 200);
        assert!(resp
            .headers
            .contains(&("Cache-Control", "no-store".to_string())));
        assert!(resp.body.ends_with('\n'));

        let expected = encode_subscription(
            "vless://5efabea4-f6d4-91fd-b8f0-17e004c89c60@node.example:8080\
             ?encryption=none&type=ws&host=node.example&path=%2F5efabea4#Web-US-Test_Net",
        );
        assert_eq!(resp.body.trim_end(), expected);
    }

    #[test]
    fn response_serialization() {
        let bytes = Response::text(404, "Not Found", "x".into()).to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 1\r\n"));
        assert!(text.ends_with("Connection: close\r\n\r\nx"));
    }
}
