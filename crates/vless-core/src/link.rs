//! Client share links and the base64 subscription document.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Which link flavours a subscription contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubMode {
    /// Direct `ws://` on the address the client used to reach us.
    #[default]
    Plain,
    /// `wss://` through a TLS front on port 443 of the configured domain.
    Tls,
    Both,
}

impl SubMode {
    /// Case-insensitive; unknown values fall back to [`SubMode::Plain`].
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" => SubMode::Tls,
            "both" => SubMode::Both,
            _ => SubMode::Plain,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubMode::Plain => "plain",
            SubMode::Tls => "tls",
            SubMode::Both => "both",
        }
    }

    fn includes_plain(self) -> bool {
        matches!(self, SubMode::Plain | SubMode::Both)
    }

    fn includes_tls(self) -> bool {
        matches!(self, SubMode::Tls | SubMode::Both)
    }
}

impl std::fmt::Display for SubMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split an HTTP `Host` header into hostname and optional port.
///
/// Accepts `name`, `name:port`, `[v6]` and `[v6]:port`.
pub fn parse_host_header(value: &str) -> (String, Option<u16>) {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => {
                let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
                (host.to_string(), port)
            }
            None => (value.to_string(), None),
        };
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
            Ok(p) => (host.to_string(), Some(p)),
            Err(_) => (value.to_string(), None),
        },
        _ => (value.to_string(), None),
    }
}

/// Everything needed to render the links for one subscription request.
#[derive(Debug, Clone)]
pub struct LinkParams<'a> {
    /// Credential in UUID text form.
    pub uuid: &'a str,
    /// Relay path without the leading slash.
    pub ws_path: &'a str,
    /// Node-name prefix.
    pub name: &'a str,
    /// Display label appended to the name, `None` renders as `Unknown`.
    pub label: Option<&'a str>,
    /// Public domain used for TLS links.
    pub domain: &'a str,
    /// Port the server listens on, used when the Host header carries none.
    pub listen_port: u16,
    pub mode: SubMode,
}

/// Render the links for `host_header`, one per line, plain first.
pub fn build_links(params: &LinkParams<'_>, host_header: &str) -> String {
    let node_name = format!("{}-{}", params.name, params.label.unwrap_or("Unknown"));
    let path = urlencoding::encode(&format!("/{}", params.ws_path)).into_owned();
    let mut lines = Vec::with_capacity(2);

    if params.mode.includes_plain() {
        let (host, port) = parse_host_header(host_header);
        let port = port.unwrap_or(params.listen_port);
        lines.push(format!(
            "vless://{uuid}@{host}:{port}?encryption=none&type=ws&host={host}&path={path}#{node_name}",
            uuid = params.uuid,
        ));
    }

    if params.mode.includes_tls() {
        let d = params.domain;
        lines.push(format!(
            "vless://{uuid}@{d}:443?encryption=none&security=tls&sni={d}&fp=chrome&type=ws&host={d}&path={path}#{node_name}",
            uuid = params.uuid,
        ));
    }

    lines.join("\n")
}

/// Base64 subscription body for the given links.
pub fn encode_subscription(links: &str) -> String {
    BASE64.encode(links.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: SubMode) -> LinkParams<'static> {
        LinkParams {
            uuid: "5efabea4-f6d4-91fd-b8f0-17e004c89c60",
            ws_path: "5efabea4",
            name: "Web",
            label: Some("US-Example_Org"),
            domain: "example.com",
            listen_port: 3000,
            mode,
        }
    }

    #[test]
    fn sub_mode_parsing() {
        assert_eq!(SubMode::parse_lenient("TLS"), SubMode::Tls);
        assert_eq!(SubMode::parse_lenient("both"), SubMode::Both);
        assert_eq!(SubMode::parse_lenient("plain"), SubMode::Plain);
        assert_eq!(SubMode::parse_lenient("bogus"), SubMode::Plain);
    }

    #[test]
    fn host_header_forms() {
        assert_eq!(parse_host_header("example.com"), ("example.com".into(), None));
        assert_eq!(
            parse_host_header("example.com:12345"),
            ("example.com".into(), Some(12345))
        );
        assert_eq!(parse_host_header("[::1]:3000"), ("::1".into(), Some(3000)));
        assert_eq!(parse_host_header("[::1]"), ("::1".into(), None));
        assert_eq!(parse_host_header("host:abc"), ("host:abc".into(), None));
    }

    #[test]
    fn plain_link_uses_request_host() {
        let links = build_links(&params(SubMode::Plain), "node.example.net:8443");
        assert_eq!(
            links,
            "vless://5efabea4-f6d4-91fd-b8f0-17e004c89c60@node.example.net:8443\
             ?encryption=none&type=ws&host=node.example.net&path=%2F5efabea4#Web-US-Example_Org"
        );
    }

    #[test]
    fn plain_link_falls_back_to_listen_port() {
        let links = build_links(&params(SubMode::Plain), "1.2.3.4");
        assert!(links.contains("@1.2.3.4:3000?"));
    }

    #[test]
    fn both_modes_plain_first() {
        let mut p = params(SubMode::Both);
        p.label = None;
        let links = build_links(&p, "h:1");
        let lines: Vec<&str> = links.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("type=ws&host=h"));
        assert!(lines[1].starts_with("vless://5efabea4-f6d4-91fd-b8f0-17e004c89c60@example.com:443?"));
        assert!(lines[1].contains("security=tls&sni=example.com&fp=chrome"));
        assert!(lines[1].ends_with("#Web-Unknown"));
    }

    #[test]
    fn subscription_is_standard_base64() {
        assert_eq!(encode_subscription("abc\n"), "YWJjCg==");
    }
}
