//! Per-connection relay state machine.
//!
//! ```text
//! AwaitingHandshake ──first message──▶ Connecting ──outbound open──▶ Relaying
//!        │                                │                            │
//!        └──────── parse failure ─────────┴── connect failure ─────────┴──▶ Closed
//! ```
//!
//! The session owns the inbound WebSocket, its heartbeat registration and,
//! from `Connecting` on, the outbound socket. [`RelaySession::run`] consumes
//! the session, so every handle is released exactly once when it returns,
//! whichever side ended it.
//!
//! Two futures race for the whole life of a session: the state machine
//! itself and a watchdog serving the heartbeat supervisor. A termination
//! from the supervisor therefore lands whatever the state machine is
//! blocked on. While relaying, each direction runs as its own future, so a
//! stalled write on one side never holds up the other.

use super::dial::{Dialer, TcpDialer};
use super::outcome::{CloseReason, SessionState};
use crate::liveness::{LivenessHandle, Probe, Pulse};
use crate::transport::websocket::{self, Inbound, MAX_WS_FRAME_SIZE};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use vless_core::{parse_handshake, Credential, Handshake};

/// Read buffer for the outbound socket.
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Inbound bytes held while the outbound socket is still opening.
const MAX_EARLY_DATA: usize = MAX_WS_FRAME_SIZE;

pub struct RelaySession<S, D = TcpDialer> {
    id: String,
    remote: SocketAddr,
    ws: WebSocketStream<S>,
    liveness: LivenessHandle,
    credential: Arc<Credential>,
    dialer: D,
}

impl<S> RelaySession<S> {
    pub fn new(
        id: String,
        remote: SocketAddr,
        ws: WebSocketStream<S>,
        liveness: LivenessHandle,
        credential: Arc<Credential>,
    ) -> Self {
        Self {
            id,
            remote,
            ws,
            liveness,
            credential,
            dialer: TcpDialer,
        }
    }
}

impl<S, D> RelaySession<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: Dialer,
{
    #[cfg(test)]
    pub(crate) fn with_dialer<E: Dialer>(self, dialer: E) -> RelaySession<S, E> {
        RelaySession {
            id: self.id,
            remote: self.remote,
            ws: self.ws,
            liveness: self.liveness,
            credential: self.credential,
            dialer,
        }
    }

    /// Drive the session to completion and release both transports.
    pub async fn run(self) -> CloseReason {
        let RelaySession {
            id,
            remote,
            ws,
            mut liveness,
            credential,
            dialer,
        } = self;

        let (sink, stream) = ws.split();
        // Capacity 1: one pending ping is enough.
        let (ping_tx, pings) = mpsc::channel(1);
        let mut flow = Flow {
            id,
            state: SessionState::AwaitingHandshake,
            sink,
            stream,
            pings,
            pulse: liveness.pulse(),
        };

        let reason = tokio::select! {
            reason = flow.drive(&credential, &dialer) => reason,
            reason = watchdog(&mut liveness, ping_tx) => reason,
        };
        flow.transition(SessionState::Closed);
        debug!(
            session_id = %flow.id,
            remote = %remote,
            kind = reason.kind(),
            reason = %reason,
            "session closed"
        );
        reason
    }
}

/// Serve supervisor probes until the supervisor gives up on the transport.
async fn watchdog(liveness: &mut LivenessHandle, ping_tx: mpsc::Sender<()>) -> CloseReason {
    loop {
        match liveness.next_probe().await {
            // Full means a ping is already waiting to go out.
            Probe::Send => {
                let _ = ping_tx.try_send(());
            }
            Probe::Terminate => return CloseReason::HeartbeatTimeout,
        }
    }
}

/// The state machine's view of the inbound side.
struct Flow<S> {
    id: String,
    state: SessionState,
    sink: SplitSink<WebSocketStream<S>, Message>,
    stream: SplitStream<WebSocketStream<S>>,
    pings: mpsc::Receiver<()>,
    pulse: Pulse,
}

impl<S> Flow<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn drive<D: Dialer>(&mut self, credential: &Credential, dialer: &D) -> CloseReason {
        let first = match self.next_message().await {
            Ok(data) => data,
            Err(reason) => return reason,
        };

        let Handshake { request, payload } = match parse_handshake(&first, credential) {
            Ok(hs) => hs,
            Err(e) => return CloseReason::HandshakeMalformed(e),
        };
        let payload = payload.to_vec();

        self.transition(SessionState::Connecting);
        debug!(
            session_id = %self.id,
            dest = %request.destination(),
            command = request.command,
            "connecting outbound"
        );

        // Inbound data that arrives before the socket opens goes out after
        // the handshake payload.
        let mut early: Vec<Vec<u8>> = Vec::new();
        let mut early_len = 0usize;
        let mut outbound = {
            let connect = dialer.dial(&request.host, request.port);
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    res = &mut connect => match res {
                        Ok(stream) => break stream,
                        Err(e) => return CloseReason::OutboundConnectFailed(e.to_string()),
                    },
                    message = self.next_message() => match message {
                        Ok(data) => {
                            early_len += data.len();
                            if early_len > MAX_EARLY_DATA {
                                return CloseReason::RelayIoError(format!(
                                    "more than {MAX_EARLY_DATA} bytes sent before the outbound connection opened"
                                ));
                            }
                            early.push(data);
                        }
                        Err(reason) => return reason,
                    },
                }
            }
        };

        if let Err(e) = websocket::send_binary(&mut self.sink, &request.acknowledgment()).await {
            return CloseReason::AckFailed(e.to_string());
        }

        for chunk in std::iter::once(payload).chain(early) {
            if chunk.is_empty() {
                continue;
            }
            if let Err(e) = outbound.write_all(&chunk).await {
                return CloseReason::RelayIoError(format!("outbound write: {e}"));
            }
        }

        self.transition(SessionState::Relaying);
        self.relay(&mut outbound).await
    }

    /// Next data message before relaying starts, answering ping requests
    /// and recording pongs along the way. Cancel safe between messages.
    async fn next_message(&mut self) -> Result<Vec<u8>, CloseReason> {
        loop {
            tokio::select! {
                Some(()) = self.pings.recv() => {
                    websocket::send_ping(&mut self.sink)
                        .await
                        .map_err(|e| CloseReason::RelayIoError(e.to_string()))?;
                }
                inbound = websocket::recv(&mut self.stream) => match inbound {
                    Ok(Inbound::Data(data)) => return Ok(data),
                    Ok(Inbound::Pong) => self.pulse.beat(),
                    Ok(Inbound::Closed) => return Err(CloseReason::InboundClosed),
                    Err(e) => return Err(CloseReason::RelayIoError(e.to_string())),
                },
            }
        }
    }

    /// Copy bytes both ways until either side ends. No draining.
    async fn relay(&mut self, outbound: &mut TcpStream) -> CloseReason {
        let (mut rd, mut wr) = outbound.split();
        let Flow {
            sink,
            stream,
            pings,
            pulse,
            ..
        } = self;

        let upstream = async {
            loop {
                match websocket::recv(&mut *stream).await {
                    Ok(Inbound::Data(data)) => {
                        if let Err(e) = wr.write_all(&data).await {
                            return CloseReason::RelayIoError(format!("outbound write: {e}"));
                        }
                    }
                    Ok(Inbound::Pong) => pulse.beat(),
                    Ok(Inbound::Closed) => return CloseReason::InboundClosed,
                    Err(e) => return CloseReason::RelayIoError(e.to_string()),
                }
            }
        };

        let downstream = async {
            let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
            loop {
                tokio::select! {
                    Some(()) = pings.recv() => {
                        if let Err(e) = websocket::send_ping(&mut *sink).await {
                            return CloseReason::RelayIoError(e.to_string());
                        }
                    }
                    res = rd.read(&mut buf) => match res {
                        Ok(0) => return CloseReason::OutboundClosed,
                        Ok(n) => {
                            if let Err(e) = websocket::send_binary(&mut *sink, &buf[..n]).await {
                                return CloseReason::RelayIoError(e.to_string());
                            }
                        }
                        Err(e) => return CloseReason::RelayIoError(format!("outbound read: {e}")),
                    },
                }
            }
        };

        tokio::select! {
            reason = upstream => reason,
            reason = downstream => reason,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::LivenessSupervisor;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use vless_core::{encode_handshake, AddressType, HandshakeError};

    type Client = WebSocketStream<DuplexStream>;

    fn credential() -> Credential {
        Credential::parse("5efabea4-f6d4-91fd-b8f0-17e004c89c60").unwrap()
    }

    /// Never finishes connecting.
    struct StalledDialer;

    impl Dialer for StalledDialer {
        fn dial(
            &self,
            _host: &str,
            _port: u16,
        ) -> impl std::future::Future<Output = std::io::Result<TcpStream>> + Send {
            std::future::pending()
        }
    }

    async fn start(sup: &LivenessSupervisor) -> (Client, JoinHandle<CloseReason>) {
        start_with(sup, TcpDialer).await
    }

    async fn start_with<D>(sup: &LivenessSupervisor, dialer: D) -> (Client, JoinHandle<CloseReason>)
    where
        D: Dialer + Send + Sync + 'static,
    {
        let (a, b) = tokio::io::duplex(1 << 16);
        let server =
            WebSocketStream::from_raw_socket(a, Role::Server, Some(websocket::config())).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        let session = RelaySession::new(
            "test".into(),
            "127.0.0.1:50000".parse().unwrap(),
            server,
            sup.register(),
            Arc::new(credential()),
        )
        .with_dialer(dialer);
        (client, tokio::spawn(session.run()))
    }

    fn handshake(port: u16, payload: &[u8]) -> Vec<u8> {
        encode_handshake(&credential(), AddressType::Ipv4, "127.0.0.1", port, payload).unwrap()
    }

    async fn next_binary(client: &mut Client) -> Vec<u8> {
        loop {
            match client.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected binary message, got {other:?}"),
            }
        }
    }

    /// Nothing but control frames until the stream ends.
    async fn assert_no_data(client: &mut Client) {
        while let Some(msg) = client.next().await {
            match msg {
                Ok(Message::Binary(_)) | Ok(Message::Text(_)) => panic!("unexpected data: {msg:?}"),
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn relays_both_ways_after_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        client
            .send(Message::Binary(handshake(port, b"hello")))
            .await
            .unwrap();

        let (mut dest, _) = listener.accept().await.unwrap();
        assert_eq!(next_binary(&mut client).await, vec![0, 0]);

        let mut buf = [0u8; 5];
        dest.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        client.send(Message::Binary(b"more".to_vec())).await.unwrap();
        let mut buf = [0u8; 4];
        dest.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"more");

        dest.write_all(b"reply").await.unwrap();
        assert_eq!(next_binary(&mut client).await, b"reply".to_vec());

        client.close(None).await.unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::InboundClosed);

        // Outbound socket was released with the session.
        let mut rest = Vec::new();
        dest.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(sup.count(), 0);
    }

    #[tokio::test]
    async fn payload_precedes_follow_up_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, _task) = start(&sup).await;

        // Second message sent without waiting for the acknowledgment.
        client.send(Message::Binary(handshake(port, b"A"))).await.unwrap();
        client.send(Message::Binary(b"B".to_vec())).await.unwrap();

        let (mut dest, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        dest.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"AB");
    }

    #[tokio::test]
    async fn credential_mismatch_writes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        let mut msg = handshake(port, &[]);
        msg[5] ^= 0x01;
        client.send(Message::Binary(msg)).await.unwrap();

        assert_eq!(
            task.await.unwrap(),
            CloseReason::HandshakeMalformed(HandshakeError::CredentialMismatch)
        );
        assert_no_data(&mut client).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(100), listener.accept())
                .await
                .is_err(),
            "outbound socket must never be opened"
        );
        assert_eq!(sup.count(), 0);
    }

    #[tokio::test]
    async fn short_text_message_is_malformed() {
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;
        client.send(Message::Text("hello".into())).await.unwrap();
        assert!(matches!(
            task.await.unwrap(),
            CloseReason::HandshakeMalformed(HandshakeError::TooShort { .. })
        ));
    }

    #[tokio::test]
    async fn connect_failure_writes_nothing() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        client.send(Message::Binary(handshake(port, &[]))).await.unwrap();
        assert!(matches!(
            task.await.unwrap(),
            CloseReason::OutboundConnectFailed(_)
        ));
        assert_no_data(&mut client).await;
    }

    #[tokio::test]
    async fn outbound_close_tears_down_inbound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        client.send(Message::Binary(handshake(port, &[]))).await.unwrap();
        let (dest, _) = listener.accept().await.unwrap();
        assert_eq!(next_binary(&mut client).await, vec![0, 0]);
        drop(dest);

        assert_eq!(task.await.unwrap(), CloseReason::OutboundClosed);
        assert_no_data(&mut client).await;
    }

    #[tokio::test]
    async fn missed_heartbeat_terminates_idle_session() {
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        assert_eq!(sup.tick(), 0);
        assert_eq!(sup.tick(), 1);
        assert_eq!(task.await.unwrap(), CloseReason::HeartbeatTimeout);
        assert_eq!(sup.count(), 0);
        assert_no_data(&mut client).await;
    }

    #[tokio::test]
    async fn pong_keeps_session_registered() {
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        assert_eq!(sup.tick(), 0);
        match client.next().await {
            Some(Ok(Message::Ping(_))) => {}
            other => panic!("expected ping, got {other:?}"),
        }
        client.send(Message::Pong(Vec::new())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sup.tick(), 0);
        assert_eq!(sup.count(), 1);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn heartbeat_terminates_session_while_connecting() {
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start_with(&sup, StalledDialer).await;

        client.send(Message::Binary(handshake(9, b"x"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        assert_eq!(sup.tick(), 0);
        assert_eq!(sup.tick(), 1);
        assert_eq!(task.await.unwrap(), CloseReason::HeartbeatTimeout);
        assert_eq!(sup.count(), 0);
        assert_no_data(&mut client).await;
    }

    #[tokio::test]
    async fn heartbeat_terminates_session_stalled_on_inbound_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start(&sup).await;

        client.send(Message::Binary(handshake(port, &[]))).await.unwrap();
        let (mut dest, _) = listener.accept().await.unwrap();
        assert_eq!(next_binary(&mut client).await, vec![0, 0]);

        // The client stops reading while the destination keeps sending, so
        // the session ends up blocked writing to the WebSocket.
        let flood = tokio::spawn(async move {
            let chunk = vec![0u8; 64 * 1024];
            while dest.write_all(&chunk).await.is_ok() {}
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());

        assert_eq!(sup.tick(), 0);
        assert_eq!(sup.tick(), 1);
        let reason = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session must end once the supervisor drops it")
            .unwrap();
        assert_eq!(reason, CloseReason::HeartbeatTimeout);
        assert_eq!(sup.count(), 0);
        flood.abort();
        drop(client);
    }

    #[tokio::test]
    async fn echo_destination_with_large_frames_keeps_flowing() {
        const FRAMES: usize = 16;
        const FRAME_LEN: usize = 512 * 1024;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Reads, then writes back, one buffer at a time.
        let echo = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let (mut rd, mut wr) = sock.split();
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });

        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (client, task) = start(&sup).await;
        let (mut tx, mut rx) = client.split();

        tx.send(Message::Binary(handshake(port, &[]))).await.unwrap();
        let sender = tokio::spawn(async move {
            for i in 0..FRAMES {
                tx.send(Message::Binary(vec![i as u8; FRAME_LEN]))
                    .await
                    .unwrap();
            }
            tx
        });

        let expected = 2 + FRAMES * FRAME_LEN;
        let received = tokio::time::timeout(Duration::from_secs(20), async {
            let mut got = Vec::with_capacity(expected);
            while got.len() < expected {
                match rx.next().await {
                    Some(Ok(Message::Binary(data))) => got.extend_from_slice(&data),
                    Some(Ok(_)) => continue,
                    other => panic!("stream ended early: {other:?}"),
                }
            }
            got
        })
        .await
        .expect("relay stalled");

        assert_eq!(&received[..2], &[0, 0]);
        assert_eq!(received.len(), expected);
        for (i, frame) in received[2..].chunks(FRAME_LEN).enumerate() {
            assert!(frame.iter().all(|&b| b == i as u8), "frame {i} out of order");
        }

        let _tx = sender.await.unwrap();
        assert!(!task.is_finished());
        echo.abort();
    }

    #[tokio::test]
    async fn early_data_beyond_limit_ends_session() {
        let sup = LivenessSupervisor::new(Duration::from_secs(30));
        let (mut client, task) = start_with(&sup, StalledDialer).await;

        client.send(Message::Binary(handshake(9, &[]))).await.unwrap();
        let chunk = vec![7u8; MAX_EARLY_DATA / 2 + 1];
        client.send(Message::Binary(chunk.clone())).await.unwrap();
        let _ = client.send(Message::Binary(chunk)).await;

        assert!(matches!(
            task.await.unwrap(),
            CloseReason::RelayIoError(_)
        ));
        assert_eq!(sup.count(), 0);
        assert_no_data(&mut client).await;
    }
}
