//! End-to-end client tests against a scripted in-process server.
//!
//! The transport is a tokio duplex pipe; every `connect` hands the server
//! end to the test over a channel, so reconnects are observable as fresh
//! "accepts". The server side drives a real responder handshake and frame
//! cipher, so these tests cover the whole stack from handle to wire bytes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use treeline_client::{
    Client, ClientConfig, CloseReason, CredentialStore, Credentials, LifecycleEvent,
    MemoryCredentialStore, RequestError, SubscriptionFilter,
};
use treeline_core::error::TransportError;
use treeline_core::retry::Backoff;
use treeline_core::transport::Transport;
use treeline_crypto::handshake::{HandshakeEngine, HandshakeOutcome, Role};
use treeline_crypto::{FrameCipher, StaticKeypair};
use treeline_proto::frame::encode_frame;
use treeline_proto::{FrameBuffer, Node, decode, encode};

struct DuplexTransport {
    dials: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Transport for DuplexTransport {
    type SendHalf = WriteHalf<DuplexStream>;
    type RecvHalf = ReadHalf<DuplexStream>;

    async fn connect(&self) -> Result<(Self::SendHalf, Self::RecvHalf), TransportError> {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        self.dials.send(server_end).map_err(|_| TransportError::Closed)?;
        let (reader, writer) = tokio::io::split(client_end);
        Ok((writer, reader))
    }
}

/// Scripted server side of one connection.
struct ServerPeer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    frames: FrameBuffer,
    cipher: Option<FrameCipher>,
}

impl ServerPeer {
    async fn accept(listener: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        let stream = listener.recv().await.expect("client dialed");
        let (reader, writer) = tokio::io::split(stream);
        Self { reader, writer, frames: FrameBuffer::new(), cipher: None }
    }

    /// Next whole frame, or `None` once the client hangs up.
    async fn next_frame_opt(&mut self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.frames.next_frame() {
                return Some(frame);
            }
            let mut buf = BytesMut::with_capacity(8192);
            let n = self.reader.read_buf(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            self.frames.extend(&buf);
        }
    }

    async fn next_frame(&mut self) -> Bytes {
        self.next_frame_opt().await.expect("client hung up mid-script")
    }

    async fn send_framed(&mut self, payload: &[u8]) {
        let mut out = BytesMut::new();
        encode_frame(payload, &mut out).unwrap();
        self.writer.write_all(&out).await.unwrap();
    }

    /// Run the responder handshake and return the client's login node.
    async fn establish(&mut self) -> Node {
        let mut engine = HandshakeEngine::new(Role::Responder, StaticKeypair::generate());
        assert!(engine.start().unwrap().is_none());

        let hello = self.next_frame().await;
        let HandshakeOutcome::Reply(accept) = engine.consume(&hello).unwrap() else {
            panic!("responder must reply to hello");
        };
        self.send_framed(&accept).await;

        let finish = self.next_frame().await;
        let HandshakeOutcome::Established { reply: None, keys } =
            engine.consume(&finish).unwrap()
        else {
            panic!("responder must establish on finish");
        };
        self.cipher = Some(FrameCipher::new(*keys));

        let login = self.recv_node().await;
        assert_eq!(login.tag(), "auth");
        login
    }

    async fn recv_node(&mut self) -> Node {
        let frame = self.next_frame().await;
        let plaintext = self.cipher.as_mut().unwrap().open(&frame).unwrap();
        decode(&plaintext).unwrap()
    }

    /// Like [`ServerPeer::recv_node`], `None` once the client hangs up.
    async fn recv_node_opt(&mut self) -> Option<Node> {
        let frame = self.next_frame_opt().await?;
        let plaintext = self.cipher.as_mut().unwrap().open(&frame).unwrap();
        Some(decode(&plaintext).unwrap())
    }

    async fn send_node(&mut self, node: &Node) {
        let payload = encode(node).unwrap();
        let sealed = self.cipher.as_mut().unwrap().seal(&payload).unwrap();
        self.send_framed(&sealed).await;
    }
}

fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_millis(300),
        tick_interval: Duration::from_millis(50),
        backoff: Backoff::new(Duration::from_millis(50), Duration::from_millis(200)),
        ..ClientConfig::default()
    }
}

fn start_client() -> (Client, mpsc::UnboundedReceiver<DuplexStream>, Arc<MemoryCredentialStore>) {
    let (dials, listener) = mpsc::unbounded_channel();
    let store = Arc::new(MemoryCredentialStore::new());
    let client = Client::connect(
        DuplexTransport { dials },
        Credentials::generate("test-token"),
        store.clone(),
        test_config(),
    );
    (client, listener, store)
}

async fn wait_established(client: &Client) {
    let mut lifecycle = client.lifecycle();
    lifecycle
        .wait_for(|event| matches!(event, LifecycleEvent::Established { .. }))
        .await
        .expect("driver alive");
}

#[tokio::test]
async fn responses_correlate_out_of_order() {
    let (client, mut listener, _store) = start_client();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(&mut listener).await;
        peer.establish().await;
        peer.send_node(&Node::new("success")).await;

        // Gather all three requests, then answer newest-first.
        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(peer.recv_node().await);
        }
        for request in requests.iter().rev() {
            let reply = Node::new("iq")
                .with_attr("type", "result")
                .with_attr("id", request.attr("id").unwrap())
                .with_attr("seq", request.attr("seq").unwrap());
            peer.send_node(&reply).await;
        }
        // Hold the connection open until the client is done.
        let _ = tokio::time::timeout(Duration::from_secs(5), peer.next_frame_opt()).await;
    });

    wait_established(&client).await;

    let request = |seq: &'static str| {
        let client = client.clone();
        async move {
            client
                .request(Node::new("iq").with_attr("type", "get").with_attr("seq", seq))
                .await
        }
    };
    let (a, b, c) = tokio::join!(request("0"), request("1"), request("2"));

    assert_eq!(a.unwrap().attr("seq"), Some("0"));
    assert_eq!(b.unwrap().attr("seq"), Some("1"));
    assert_eq!(c.unwrap().attr("seq"), Some("2"));

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn caller_set_correlation_id_is_preserved() {
    let (client, mut listener, _store) = start_client();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(&mut listener).await;
        peer.establish().await;
        peer.send_node(&Node::new("success")).await;

        // The id on the wire must be the one the caller chose.
        let request = peer.recv_node().await;
        assert_eq!(request.attr("id"), Some("usync-7"));
        peer.send_node(
            &Node::new("iq").with_attr("type", "result").with_attr("id", "usync-7"),
        )
        .await;
        let _ = tokio::time::timeout(Duration::from_secs(5), peer.next_frame_opt()).await;
    });

    wait_established(&client).await;

    let response = client
        .request(Node::new("iq").with_attr("type", "get").with_attr("id", "usync-7"))
        .await
        .unwrap();
    assert_eq!(response.attr("id"), Some("usync-7"));

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn slow_request_times_out_without_stalling_others() {
    let (client, mut listener, _store) = start_client();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(&mut listener).await;
        peer.establish().await;
        peer.send_node(&Node::new("success")).await;

        // Answer only the request marked "fast"; leave the other hanging.
        for _ in 0..2 {
            let request = peer.recv_node().await;
            if request.attr("seq") == Some("fast") {
                let reply = Node::new("iq")
                    .with_attr("type", "result")
                    .with_attr("id", request.attr("id").unwrap())
                    .with_attr("seq", "fast");
                peer.send_node(&reply).await;
            }
        }

        // The connection itself stays healthy for a follow-up request.
        let request = peer.recv_node().await;
        let reply = Node::new("iq")
            .with_attr("type", "result")
            .with_attr("id", request.attr("id").unwrap());
        peer.send_node(&reply).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), peer.next_frame_opt()).await;
    });

    wait_established(&client).await;

    let slow = client.request_with_timeout(
        Node::new("iq").with_attr("type", "get").with_attr("seq", "slow"),
        Duration::from_millis(150),
    );
    let fast = client.request(Node::new("iq").with_attr("type", "get").with_attr("seq", "fast"));
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow, Err(RequestError::Timeout));
    assert!(slow.unwrap_err().is_transient());
    assert_eq!(fast.unwrap().attr("seq"), Some("fast"));

    // A timed-out request does not poison the connection.
    let follow_up = client.request(Node::new("iq").with_attr("type", "get")).await;
    assert!(follow_up.is_ok());

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn reconnects_with_fresh_handshake_and_kept_identity() {
    let (client, mut listener, store) = start_client();

    let server = tokio::spawn(async move {
        // First connection: log the client in, then drop the transport.
        let mut peer = ServerPeer::accept(&mut listener).await;
        let first_login = peer.establish().await;
        assert_eq!(first_login.attr("jid"), None);
        peer.send_node(&Node::new("success").with_attr("jid", "777001@tl.net")).await;
        drop(peer);

        // The client dials again on its own; the login now carries the
        // assigned address from the previous session.
        let mut peer = ServerPeer::accept(&mut listener).await;
        let second_login = peer.establish().await;
        assert_eq!(second_login.attr("jid"), Some("777001@tl.net"));
        peer.send_node(&Node::new("success").with_attr("jid", "777001@tl.net")).await;

        // Answer requests until the client closes; a request that timed out
        // client-side may still consume a reply here.
        while let Some(request) = peer.recv_node_opt().await {
            let reply = Node::new("iq")
                .with_attr("type", "result")
                .with_attr("id", request.attr("id").unwrap());
            peer.send_node(&reply).await;
        }
    });

    wait_established(&client).await;

    // The first connection never answers requests and drops right away, so
    // retry until the second incarnation serves one.
    let response = loop {
        match client.request(Node::new("iq").with_attr("type", "get")).await {
            Ok(response) => break response,
            Err(error) => {
                assert!(error.is_transient(), "unexpected failure: {error}");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    };
    assert_eq!(response.attr("type"), Some("result"));

    // The assigned address was persisted across incarnations.
    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.jid.unwrap().to_string(), "777001@tl.net");

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn fire_and_forget_sends_carry_no_correlation_id() {
    let (client, mut listener, _store) = start_client();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(&mut listener).await;
        peer.establish().await;
        peer.send_node(&Node::new("success")).await;

        let receipt = peer.recv_node().await;
        assert_eq!(receipt.tag(), "receipt");
        assert_eq!(receipt.attr("to"), Some("5550002@tl.net"));
        assert_eq!(receipt.attr("id"), None);
        let _ = tokio::time::timeout(Duration::from_secs(5), peer.next_frame_opt()).await;
    });

    wait_established(&client).await;
    client.send(Node::new("receipt").with_attr("to", "5550002@tl.net")).await.unwrap();

    client.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn auth_rejection_is_terminal() {
    let (client, mut listener, _store) = start_client();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(&mut listener).await;
        peer.establish().await;
        peer.send_node(
            &Node::new("failure").with_attr("code", "401").with_attr("reason", "token revoked"),
        )
        .await;

        // A rejected client must not dial again.
        let redial = tokio::time::timeout(Duration::from_millis(500), listener.recv()).await;
        assert!(redial.is_err(), "client reconnected after credential rejection");
    });

    client.closed().await;
    assert_eq!(
        *client.lifecycle().borrow(),
        LifecycleEvent::Closed(CloseReason::AuthRejected { code: 401 })
    );

    let result = client.request(Node::new("iq")).await;
    assert_eq!(result, Err(RequestError::ConnectionClosed));

    server.await.unwrap();
}

#[tokio::test]
async fn reconnect_budget_caps_redial_attempts() {
    let (dials, mut listener) = mpsc::unbounded_channel();
    let store = Arc::new(MemoryCredentialStore::new());
    let config = ClientConfig { max_reconnect_attempts: Some(2), ..test_config() };
    let _client = Client::connect(
        DuplexTransport { dials },
        Credentials::generate("test-token"),
        store,
        config,
    );

    // Initial dial plus two budgeted retries; every accept drops the stream.
    for _ in 0..3 {
        let stream = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .expect("dial within the reconnect budget")
            .expect("transport alive");
        drop(stream);
    }
    let extra = tokio::time::timeout(Duration::from_millis(500), listener.recv()).await;
    assert!(extra.is_err(), "client dialed past its reconnect budget");
}

#[tokio::test]
async fn pushes_reach_matching_subscribers() {
    let (client, mut listener, _store) = start_client();

    let mut messages = client.subscribe(SubscriptionFilter::for_tag("message")).await.unwrap();
    let mut system = client
        .subscribe(SubscriptionFilter::for_tag("notification").with_category("system"))
        .await
        .unwrap();

    let server = tokio::spawn(async move {
        let mut peer = ServerPeer::accept(&mut listener).await;
        peer.establish().await;
        peer.send_node(&Node::new("success")).await;

        peer.send_node(&Node::text("message", "push one")).await;
        peer.send_node(&Node::new("notification").with_attr("category", "billing")).await;
        peer.send_node(&Node::new("notification").with_attr("category", "system")).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), peer.next_frame_opt()).await;
    });

    wait_established(&client).await;

    let message = messages.recv().await.unwrap();
    assert_eq!(message.as_text(), Some("push one"));

    let note = system.recv().await.unwrap();
    assert_eq!(note.attr("category"), Some("system"));

    client.close().await;
    server.await.unwrap();
}
