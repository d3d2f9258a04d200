// ============================================
// File: crates/mcrelay-server/tests/session_flow.rs
// ============================================
//! End-to-end session tests against in-memory clients and backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use mcrelay_common::{BackendAddr, Direction};
use mcrelay_core::crypto::SharedSecret;
use mcrelay_core::protocol::login::{
    decode_disconnect, encode_set_compression, ids, EncryptionRequest, EncryptionResponse,
    Handshake, LoginStart, LoginSuccess,
};
use mcrelay_core::protocol::{Packet, Phase};
use mcrelay_server::handlers::{
    event_fn, handler_fn, EventBusBuilder, FailurePolicy, Listen, ListenerRegistryBuilder,
};
use mcrelay_server::plugins::Plugin;
use mcrelay_server::services::{Authenticator, EncryptionAnswer, LoginProfile};
use mcrelay_server::{ProxyConfig, ProxyContext, ServerError, Session};
use mcrelay_transport::{Connector, Leg, LegReader, MockBackend, MockConnector};

const TIMEOUT: Duration = Duration::from_secs(5);
const USERNAME: &str = "Steve";
const UUID: &str = "069a79f4-44e9-4726-a5be-fca90e38aaf5";

// ============================================
// Harness
// ============================================

type EventLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Records engine events.
struct Recorder(EventLog);

impl Plugin for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn register(&self, _listeners: &mut ListenerRegistryBuilder, events: &mut EventBusBuilder) {
        for name in [
            "close",
            "login_success",
            "transfer",
            "handler_error",
            "peer_spawned",
            "peer_retired",
        ] {
            let log = Arc::clone(&self.0);
            events.subscribe(
                name,
                event_fn(move |event| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().push((event.name, event.data));
                        Ok(Value::Null)
                    }
                }),
            );
        }
    }
}

/// Registers listeners through a closure.
struct Listeners<F>(F);

impl<F> Plugin for Listeners<F>
where
    F: Fn(&mut ListenerRegistryBuilder) + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "test-listeners"
    }

    fn register(&self, listeners: &mut ListenerRegistryBuilder, _events: &mut EventBusBuilder) {
        (self.0)(listeners);
    }
}

/// Answers encryption requests with a fixed secret.
struct FixedSecret;

#[async_trait]
impl Authenticator for FixedSecret {
    async fn answer(
        &self,
        _profile: &LoginProfile,
        request: &EncryptionRequest,
    ) -> mcrelay_server::Result<EncryptionAnswer> {
        let response = EncryptionResponse {
            encrypted_secret: Bytes::from_static(&[7; 16]),
            encrypted_verify_token: request.verify_token.clone(),
        };
        Ok(EncryptionAnswer {
            response_payload: response.encode(),
            shared_secret: SharedSecret::from_slice(&[7; 16])?,
        })
    }
}

struct Harness {
    ctx: Arc<ProxyContext>,
    connector: Arc<MockConnector>,
    backends: mpsc::UnboundedReceiver<MockBackend>,
    events: EventLog,
}

fn harness(config: ProxyConfig) -> Harness {
    build_harness(config, None, false)
}

fn harness_with<F>(config: ProxyConfig, listeners: F) -> Harness
where
    F: Fn(&mut ListenerRegistryBuilder) + Send + Sync + 'static,
{
    build_harness(config, Some(Box::new(Listeners(listeners))), false)
}

fn build_harness(
    config: ProxyConfig,
    listeners: Option<Box<dyn Plugin>>,
    authenticator: bool,
) -> Harness {
    let (connector, backends) = MockConnector::new();
    let connector = Arc::new(connector);
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ProxyContext::builder(config)
        .connector(Arc::clone(&connector) as Arc<dyn Connector>)
        .plugin(Recorder(Arc::clone(&events)));
    if let Some(listeners) = listeners {
        builder = builder.plugin(Boxed(listeners));
    }
    if authenticator {
        builder = builder.authenticator(Arc::new(FixedSecret));
    }

    Harness {
        ctx: Arc::new(builder.build()),
        connector,
        backends,
        events,
    }
}

struct Boxed(Box<dyn Plugin>);

impl Plugin for Boxed {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn register(&self, listeners: &mut ListenerRegistryBuilder, events: &mut EventBusBuilder) {
        self.0.register(listeners, events);
    }
}

impl Harness {
    fn events_named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    async fn next_backend(&mut self) -> (Arc<Leg>, LegReader, BackendAddr) {
        let backend = tokio::time::timeout(TIMEOUT, self.backends.recv())
            .await
            .expect("no backend connection")
            .expect("connector dropped");
        let (leg, reader) = Leg::open(Box::new(backend.stream), Direction::Client, 1 << 16, "backend");
        (leg, reader, backend.addr)
    }
}

/// A logged-in client with its backend.
struct Primary {
    session: Arc<Session>,
    client: Arc<Leg>,
    client_reader: LegReader,
    backend: Arc<Leg>,
    backend_reader: LegReader,
}

async fn next(reader: &mut LegReader) -> Packet {
    tokio::time::timeout(TIMEOUT, reader.read_packet())
        .await
        .expect("timed out waiting for packet")
        .expect("read failed")
        .expect("unexpected end of stream")
}

async fn expect_eof(reader: &mut LegReader) {
    let result = tokio::time::timeout(TIMEOUT, reader.read_packet())
        .await
        .expect("timed out waiting for end of stream");
    assert!(matches!(result, Ok(None)), "expected EOF, got {result:?}");
}

fn open_client(h: &Harness) -> (Arc<Session>, Arc<Leg>, LegReader) {
    let (near, far) = tokio::io::duplex(1 << 16);
    let session = Session::open(Arc::clone(&h.ctx), Box::new(near), "test-client");
    let (client, reader) = Leg::open(Box::new(far), Direction::Server, 1 << 16, "proxy");
    (session, client, reader)
}

async fn send_login_start(client: &Arc<Leg>) {
    let handshake = Handshake {
        protocol_version: 47,
        server_address: "localhost".into(),
        server_port: 41223,
        next_phase: Phase::Login,
    };
    client.send(ids::HANDSHAKE, &handshake.encode()).await.unwrap();
    client.advance(Phase::Login).unwrap();
    let start = LoginStart {
        username: USERNAME.into(),
    };
    client.send(ids::LOGIN_START, &start.encode()).await.unwrap();
}

/// Plays the backend side of a login: handshake, login start, success.
async fn accept_login(backend: &Arc<Leg>, reader: &mut LegReader) -> Handshake {
    let handshake = Handshake::decode(next(reader).await.payload).unwrap();
    backend.advance(Phase::Login).unwrap();
    let start = LoginStart::decode(next(reader).await.payload).unwrap();
    assert_eq!(start.username, USERNAME);

    let success = LoginSuccess {
        uuid: UUID.into(),
        username: USERNAME.into(),
    };
    backend.send(ids::LOGIN_SUCCESS, &success.encode()).await.unwrap();
    backend.advance(Phase::Play).unwrap();
    handshake
}

async fn login(h: &mut Harness) -> Primary {
    let (session, client, mut client_reader) = open_client(h);
    send_login_start(&client).await;

    let (backend, mut backend_reader, _) = h.next_backend().await;
    accept_login(&backend, &mut backend_reader).await;

    let success = next(&mut client_reader).await;
    assert_eq!(success.id, ids::LOGIN_SUCCESS);
    client.advance(Phase::Play).unwrap();

    Primary {
        session,
        client,
        client_reader,
        backend,
        backend_reader,
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn ordered_log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================
// Pass-through
// ============================================

#[tokio::test]
async fn test_login_and_unmatched_packets_pass_through() {
    let mut h = harness(ProxyConfig::default());
    let mut p = login(&mut h).await;

    assert_eq!(p.session.phase(Direction::Client), Some(Phase::Play));
    assert_eq!(p.session.phase(Direction::Server), Some(Phase::Play));
    assert_eq!(h.events_named("login_success").len(), 1);

    let upstream = Bytes::from_static(&[1, 2, 3, 0xff, 0x00]);
    p.client.send(0x15, &upstream).await.unwrap();
    let received = next(&mut p.backend_reader).await;
    assert_eq!(received.id, 0x15);
    assert_eq!(received.payload, upstream);

    let downstream = Bytes::from(vec![9u8; 300]);
    p.backend.send(0x22, &downstream).await.unwrap();
    let received = next(&mut p.client_reader).await;
    assert_eq!(received.id, 0x22);
    assert_eq!(received.payload, downstream);

    p.session.close("done", true).await;
}

/// Greets the player from a `login_success` subscriber.
struct Greeter;

impl Plugin for Greeter {
    fn name(&self) -> &'static str {
        "greeter"
    }

    fn register(&self, _listeners: &mut ListenerRegistryBuilder, events: &mut EventBusBuilder) {
        events.subscribe(
            "login_success",
            event_fn(|event| async move {
                if let Some(session) = event.session {
                    session.send_to_client(0x01, b"GREETING").await?;
                }
                Ok(Value::Null)
            }),
        );
    }
}

#[tokio::test]
async fn test_login_success_reaches_client_before_subscriber_packets() {
    let mut h = build_harness(ProxyConfig::default(), Some(Box::new(Greeter)), false);
    let mut p = login(&mut h).await;

    let greeting = next(&mut p.client_reader).await;
    assert_eq!(greeting.id, 0x01);
    assert_eq!(&greeting.payload[..], b"GREETING");

    let success = &h.events_named("login_success")[0];
    assert_eq!(success["username"], USERNAME);

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_backend_handshake_uses_spoofed_address() {
    let mut config = ProxyConfig::default();
    config.network.spoof = Some(BackendAddr::new("spoofed.example", 25570));
    let mut h = harness(config);

    let (session, client, _client_reader) = open_client(&h);
    send_login_start(&client).await;

    let (_backend, mut reader, addr) = h.next_backend().await;
    assert_eq!(addr, BackendAddr::new("mc.hypixel.net", 25565));
    let handshake = Handshake::decode(next(&mut reader).await.payload).unwrap();
    assert_eq!(handshake.server_address, "spoofed.example");
    assert_eq!(handshake.server_port, 25570);
    assert_eq!(handshake.next_phase, Phase::Login);

    session.close("done", true).await;
}

// ============================================
// Dispatch ordering
// ============================================

#[tokio::test]
async fn test_blocking_handlers_run_in_order_before_next_read() {
    let log = ordered_log();
    let listeners = {
        let log = Arc::clone(&log);
        move |registry: &mut ListenerRegistryBuilder| {
            let first = Arc::clone(&log);
            let second = Arc::clone(&log);
            let third = Arc::clone(&log);
            registry
                .on(
                    Listen::client(0x10, Phase::Play).forwarding(),
                    handler_fn(move |_ctx| {
                        let log = Arc::clone(&first);
                        async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            log.lock().push("h1");
                            Ok(())
                        }
                    }),
                )
                .on(
                    Listen::client(0x10, Phase::Play),
                    handler_fn(move |_ctx| {
                        let log = Arc::clone(&second);
                        async move {
                            log.lock().push("h2");
                            Ok(())
                        }
                    }),
                )
                .on(
                    Listen::client(0x11, Phase::Play).forwarding(),
                    handler_fn(move |_ctx| {
                        let log = Arc::clone(&third);
                        async move {
                            log.lock().push("next");
                            Ok(())
                        }
                    }),
                );
        }
    };
    let mut h = harness_with(ProxyConfig::default(), listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x10, &[1]).await.unwrap();
    p.client.send(0x11, &[2]).await.unwrap();

    assert_eq!(next(&mut p.backend_reader).await.id, 0x10);
    assert_eq!(next(&mut p.backend_reader).await.id, 0x11);
    assert_eq!(*log.lock(), ["h1", "h2", "next"]);

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_detached_handler_does_not_block_reads() {
    let log = ordered_log();
    let release = Arc::new(Notify::new());
    let listeners = {
        let log = Arc::clone(&log);
        let release = Arc::clone(&release);
        move |registry: &mut ListenerRegistryBuilder| {
            let log = Arc::clone(&log);
            let release = Arc::clone(&release);
            registry.on(
                Listen::client(0x10, Phase::Play).detached().forwarding(),
                handler_fn(move |_ctx| {
                    let log = Arc::clone(&log);
                    let release = Arc::clone(&release);
                    async move {
                        release.notified().await;
                        log.lock().push("detached-done");
                        Ok(())
                    }
                }),
            );
        }
    };
    let mut h = harness_with(ProxyConfig::default(), listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x10, &[1]).await.unwrap();
    p.client.send(0x11, &[2]).await.unwrap();

    // Both arrive while the detached handler is still parked.
    assert_eq!(next(&mut p.backend_reader).await.id, 0x10);
    assert_eq!(next(&mut p.backend_reader).await.id, 0x11);
    assert!(log.lock().is_empty());

    release.notify_one();
    eventually(|| !log.lock().is_empty()).await;
    assert_eq!(*log.lock(), ["detached-done"]);

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_consume_and_rewrite() {
    let listeners = |registry: &mut ListenerRegistryBuilder| {
        registry
            .on(
                Listen::client(0x01, Phase::Play).forwarding(),
                handler_fn(|ctx| async move {
                    ctx.set_payload(Bytes::from_static(b"rewritten"));
                    Ok(())
                }),
            )
            .on(
                Listen::client(0x02, Phase::Play).forwarding(),
                handler_fn(|ctx| async move {
                    ctx.consume();
                    Ok(())
                }),
            );
    };
    let mut h = harness_with(ProxyConfig::default(), listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x01, b"original").await.unwrap();
    p.client.send(0x02, b"dropped").await.unwrap();
    p.client.send(0x03, b"marker").await.unwrap();

    let first = next(&mut p.backend_reader).await;
    assert_eq!(first.id, 0x01);
    assert_eq!(&first.payload[..], b"rewritten");
    assert_eq!(next(&mut p.backend_reader).await.id, 0x03);

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_handler_injects_packets_both_ways() {
    let listeners = |registry: &mut ListenerRegistryBuilder| {
        registry.on(
            Listen::client(0x04, Phase::Play),
            handler_fn(|ctx| async move {
                ctx.send_to_server(0x05, b"injected").await?;
                ctx.reply(Direction::Client, 0x06, b"ack").await?;
                Ok(())
            }),
        );
    };
    let mut h = harness_with(ProxyConfig::default(), listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x04, b"command").await.unwrap();
    p.client.send(0x03, b"marker").await.unwrap();

    let injected = next(&mut p.backend_reader).await;
    assert_eq!(injected.id, 0x05);
    assert_eq!(&injected.payload[..], b"injected");
    assert_eq!(next(&mut p.backend_reader).await.id, 0x03);

    let ack = next(&mut p.client_reader).await;
    assert_eq!(ack.id, 0x06);
    assert_eq!(&ack.payload[..], b"ack");

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_handler_failure_is_isolated() {
    let listeners = |registry: &mut ListenerRegistryBuilder| {
        registry.on(
            Listen::client(0x05, Phase::Play).forwarding().named("broken"),
            handler_fn(|_ctx| async { Err(ServerError::handler("broken", "boom")) }),
        );
    };

    let mut h = harness_with(ProxyConfig::default(), listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x05, b"kept").await.unwrap();
    let forwarded = next(&mut p.backend_reader).await;
    assert_eq!(forwarded.id, 0x05);
    assert_eq!(&forwarded.payload[..], b"kept");

    assert!(p.session.is_open());
    let errors = h.events_named("handler_error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["handler"], "broken");
    assert_eq!(errors[0]["packet_id"], 0x05);
    assert_eq!(p.session.stats.snapshot().handler_failures, 1);

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_failed_suppressing_chain_forwards_nothing() {
    let listeners = |registry: &mut ListenerRegistryBuilder| {
        registry.on(
            Listen::client(0x05, Phase::Play).named("rewrite"),
            handler_fn(|ctx| async move {
                ctx.set_payload(Bytes::from_static(b"rewritten"));
                Err(ServerError::handler("rewrite", "boom"))
            }),
        );
    };

    let mut h = harness_with(ProxyConfig::default(), listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x05, b"secret").await.unwrap();
    p.client.send(0x06, b"marker").await.unwrap();
    let received = next(&mut p.backend_reader).await;
    assert_eq!(received.id, 0x06);
    assert_eq!(&received.payload[..], b"marker");

    assert!(p.session.is_open());
    assert_eq!(h.events_named("handler_error").len(), 1);

    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_handler_failure_drop_policy() {
    let listeners = |registry: &mut ListenerRegistryBuilder| {
        registry.on(
            Listen::client(0x05, Phase::Play).forwarding(),
            handler_fn(|_ctx| async { Err(ServerError::handler("broken", "boom")) }),
        );
    };
    let mut config = ProxyConfig::default();
    config.protocol.on_handler_failure = FailurePolicy::Drop;

    let mut h = harness_with(config, listeners);
    let mut p = login(&mut h).await;

    p.client.send(0x05, b"lost").await.unwrap();
    p.client.send(0x06, b"marker").await.unwrap();
    assert_eq!(next(&mut p.backend_reader).await.id, 0x06);

    p.session.close("done", true).await;
}

// ============================================
// Close
// ============================================

#[tokio::test]
async fn test_double_close_is_noop() {
    let mut h = harness(ProxyConfig::default());
    let mut p = login(&mut h).await;

    tokio::join!(
        p.session.close("first", false),
        p.session.close("second", false)
    );
    p.session.close("third", false).await;

    assert_eq!(h.events_named("close").len(), 1);

    let notice = next(&mut p.client_reader).await;
    assert_eq!(notice.id, ids::PLAY_DISCONNECT);
    expect_eof(&mut p.client_reader).await;
    expect_eof(&mut p.backend_reader).await;
    assert!(!p.session.is_open());
}

#[tokio::test]
async fn test_phase_violation_closes_session() {
    let mut h = harness(ProxyConfig::default());
    let (session, client, mut client_reader) = open_client(&h);
    send_login_start(&client).await;

    let (_backend, mut backend_reader, _) = h.next_backend().await;
    assert_eq!(next(&mut backend_reader).await.id, ids::HANDSHAKE);
    assert_eq!(next(&mut backend_reader).await.id, ids::LOGIN_START);

    // 0x07 is not a serverbound Login packet.
    client.send(0x07, b"early").await.unwrap();

    let notice = next(&mut client_reader).await;
    assert_eq!(notice.id, ids::LOGIN_DISCONNECT);
    let reason = decode_disconnect(notice.payload).unwrap();
    assert!(reason.contains("Phase violation"), "reason was {reason}");
    expect_eof(&mut client_reader).await;

    tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap();
    let closes = h.events_named("close");
    assert_eq!(closes.len(), 1);
    assert!(closes[0].as_str().is_some_and(|r| r.contains("0x07")));
    expect_eof(&mut backend_reader).await;
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_close_cancels_detached_handlers() {
    let started = Arc::new(Notify::new());
    let dropped = Arc::new(AtomicBool::new(false));
    let listeners = {
        let started = Arc::clone(&started);
        let dropped = Arc::clone(&dropped);
        move |registry: &mut ListenerRegistryBuilder| {
            let started = Arc::clone(&started);
            let dropped = Arc::clone(&dropped);
            registry.on(
                Listen::client(0x10, Phase::Play).detached(),
                handler_fn(move |_ctx| {
                    let started = Arc::clone(&started);
                    let guard = DropFlag(Arc::clone(&dropped));
                    async move {
                        let _guard = guard;
                        started.notify_one();
                        std::future::pending::<()>().await;
                        Ok(())
                    }
                }),
            );
        }
    };
    let mut h = harness_with(ProxyConfig::default(), listeners);
    let p = login(&mut h).await;

    p.client.send(0x10, b"park").await.unwrap();
    tokio::time::timeout(TIMEOUT, started.notified()).await.unwrap();
    assert!(!dropped.load(Ordering::SeqCst));

    p.session.close("done", true).await;
    eventually(|| dropped.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn test_backend_disconnect_during_login_closes_session() {
    let mut h = harness(ProxyConfig::default());
    let (session, client, mut client_reader) = open_client(&h);
    send_login_start(&client).await;

    let (backend, mut reader, _) = h.next_backend().await;
    next(&mut reader).await;
    backend.advance(Phase::Login).unwrap();
    next(&mut reader).await;

    let payload = mcrelay_core::protocol::PayloadWriter::new()
        .string(r#"{"text":"whitelist"}"#)
        .finish();
    backend.send(ids::LOGIN_DISCONNECT, &payload).await.unwrap();

    let notice = next(&mut client_reader).await;
    assert_eq!(notice.id, ids::LOGIN_DISCONNECT);
    assert_eq!(decode_disconnect(notice.payload).unwrap(), r#"{"text":"whitelist"}"#);
    expect_eof(&mut client_reader).await;

    tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_disconnects_client() {
    let mut h = harness(ProxyConfig::default());
    h.connector.refuse("mc.hypixel.net");
    let (session, client, mut client_reader) = open_client(&h);
    send_login_start(&client).await;

    let notice = next(&mut client_reader).await;
    assert_eq!(notice.id, ids::LOGIN_DISCONNECT);
    expect_eof(&mut client_reader).await;
    tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap();
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_oversized_frame_closes_session() {
    let mut config = ProxyConfig::default();
    config.protocol.max_frame_len = 128;
    let mut h = harness(config);
    let mut p = login(&mut h).await;

    p.client.send(0x15, &[0u8; 512]).await.unwrap();

    let notice = next(&mut p.client_reader).await;
    assert_eq!(notice.id, ids::PLAY_DISCONNECT);
    let reason = decode_disconnect(notice.payload).unwrap();
    assert!(reason.contains("exceeds maximum"), "reason was {reason}");
    expect_eof(&mut p.client_reader).await;

    tokio::time::timeout(TIMEOUT, p.session.closed()).await.unwrap();
    let closes = h.events_named("close");
    assert_eq!(closes.len(), 1);
    assert!(closes[0].as_str().unwrap().contains("exceeds maximum"));
}

// ============================================
// Login with compression and encryption
// ============================================

#[tokio::test]
async fn test_login_with_encryption_and_compression() {
    let mut h = build_harness(ProxyConfig::default(), None, true);
    let (session, client, mut client_reader) = open_client(&h);
    send_login_start(&client).await;

    let (backend, mut reader, _) = h.next_backend().await;
    next(&mut reader).await;
    backend.advance(Phase::Login).unwrap();
    next(&mut reader).await;

    let request = EncryptionRequest {
        server_id: String::new(),
        public_key: Bytes::from_static(b"not-a-real-key"),
        verify_token: Bytes::from_static(&[1, 2, 3, 4]),
    };
    backend.send(ids::ENCRYPTION_REQUEST, &request.encode()).await.unwrap();

    let response = next(&mut reader).await;
    assert_eq!(response.id, ids::ENCRYPTION_RESPONSE);
    backend.activate_encryption(&[7; 16], &[7; 16]).unwrap();

    backend
        .send(ids::SET_COMPRESSION, &encode_set_compression(64))
        .await
        .unwrap();
    backend.set_compression(64);

    let success = LoginSuccess {
        uuid: UUID.into(),
        username: USERNAME.into(),
    };
    backend.send(ids::LOGIN_SUCCESS, &success.encode()).await.unwrap();
    backend.advance(Phase::Play).unwrap();

    // The client leg stays plain and uncompressed.
    let forwarded = next(&mut client_reader).await;
    assert_eq!(forwarded.id, ids::LOGIN_SUCCESS);
    assert_eq!(LoginSuccess::decode(forwarded.payload).unwrap(), success);
    client.advance(Phase::Play).unwrap();

    let server_leg = session.server_leg().unwrap();
    assert!(server_leg.is_encrypted());
    assert_eq!(server_leg.compression_threshold(), 64);
    assert!(!session.client_leg().is_encrypted());

    let big = Bytes::from(vec![0x42u8; 500]);
    backend.send(0x30, &big).await.unwrap();
    let received = next(&mut client_reader).await;
    assert_eq!((received.id, received.payload), (0x30, big.clone()));

    client.send(0x31, &big).await.unwrap();
    let received = next(&mut reader).await;
    assert_eq!((received.id, received.payload), (0x31, big));

    let logins = h.events_named("login_success");
    assert_eq!(logins, vec![json!({ "username": USERNAME, "uuid": UUID })]);

    session.close("done", true).await;
}

#[tokio::test]
async fn test_encryption_without_authenticator_closes_session() {
    let mut h = harness(ProxyConfig::default());
    let (session, client, mut client_reader) = open_client(&h);
    send_login_start(&client).await;

    let (backend, mut reader, _) = h.next_backend().await;
    next(&mut reader).await;
    backend.advance(Phase::Login).unwrap();
    next(&mut reader).await;

    let request = EncryptionRequest {
        server_id: String::new(),
        public_key: Bytes::new(),
        verify_token: Bytes::new(),
    };
    backend.send(ids::ENCRYPTION_REQUEST, &request.encode()).await.unwrap();

    let notice = next(&mut client_reader).await;
    assert_eq!(notice.id, ids::LOGIN_DISCONNECT);
    tokio::time::timeout(TIMEOUT, session.closed()).await.unwrap();
}

// ============================================
// Transfer
// ============================================

#[tokio::test]
async fn test_transfer_timeout_keeps_old_backend() {
    let mut config = ProxyConfig::default();
    config.protocol.handshake_timeout_secs = 1;
    let mut h = harness(config);
    let mut p = login(&mut h).await;

    let target = BackendAddr::new("silent.example", 25565);
    let err = p.session.transfer_to(target).await.unwrap_err();
    assert!(matches!(err, ServerError::HandshakeTimeout { .. }), "got {err:?}");
    assert!(err.is_recoverable());

    // The silent backend was dialed but never answered.
    let (_silent, _silent_reader, addr) = h.next_backend().await;
    assert_eq!(addr.host, "silent.example");

    assert!(p.session.is_open());
    assert_eq!(p.session.backend(), BackendAddr::new("mc.hypixel.net", 25565));

    p.client.send(0x15, b"still here").await.unwrap();
    let received = next(&mut p.backend_reader).await;
    assert_eq!(&received.payload[..], b"still here");
    p.backend.send(0x16, b"pong").await.unwrap();
    assert_eq!(next(&mut p.client_reader).await.id, 0x16);

    assert!(h.events_named("transfer").is_empty());
    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_transfer_to_rejecting_backend() {
    let mut h = harness(ProxyConfig::default());
    let mut p = login(&mut h).await;

    let transfer = p.session.transfer_to(BackendAddr::new("full.example", 25565));
    let backend = async {
        let (leg, mut reader, _) = h.next_backend().await;
        next(&mut reader).await;
        leg.advance(Phase::Login).unwrap();
        next(&mut reader).await;
        let payload = mcrelay_core::protocol::PayloadWriter::new()
            .string(r#"{"text":"server full"}"#)
            .finish();
        leg.send(ids::LOGIN_DISCONNECT, &payload).await.unwrap();
        leg
    };
    let (result, _leg) = tokio::join!(transfer, backend);

    let err = result.unwrap_err();
    assert!(matches!(err, ServerError::BackendRejected { .. }), "got {err:?}");
    assert!(err.is_recoverable());

    p.client.send(0x15, b"old").await.unwrap();
    assert_eq!(&next(&mut p.backend_reader).await.payload[..], b"old");
    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_transfer_swaps_backend() {
    let mut h = harness(ProxyConfig::default());
    let mut p = login(&mut h).await;
    let target = BackendAddr::new("lobby.example", 25566);

    let transfer = p.session.transfer_to(target.clone());
    let backend = async {
        let (leg, mut reader, addr) = h.next_backend().await;
        assert_eq!(addr, BackendAddr::new("lobby.example", 25566));

        let handshake = Handshake::decode(next(&mut reader).await.payload).unwrap();
        assert_eq!(handshake.server_address, "lobby.example");
        assert_eq!(handshake.protocol_version, 47);
        leg.advance(Phase::Login).unwrap();
        let start = LoginStart::decode(next(&mut reader).await.payload).unwrap();
        assert_eq!(start.username, USERNAME);

        leg.send(ids::SET_COMPRESSION, &encode_set_compression(32))
            .await
            .unwrap();
        leg.set_compression(32);
        let success = LoginSuccess {
            uuid: UUID.into(),
            username: USERNAME.into(),
        };
        leg.send(ids::LOGIN_SUCCESS, &success.encode()).await.unwrap();
        leg.advance(Phase::Play).unwrap();
        (leg, reader)
    };
    let (result, (new_backend, mut new_reader)) = tokio::join!(transfer, backend);
    result.unwrap();

    assert_eq!(p.session.backend(), target);
    assert_eq!(p.session.stats.snapshot().transfers, 1);
    assert_eq!(
        h.events_named("transfer"),
        vec![json!({ "from": "mc.hypixel.net:25565", "to": "lobby.example:25566" })]
    );

    // Old backend leg is closed, traffic flows through the new one.
    expect_eof(&mut p.backend_reader).await;

    let payload = Bytes::from(vec![5u8; 100]);
    p.client.send(0x15, &payload).await.unwrap();
    let received = next(&mut new_reader).await;
    assert_eq!((received.id, received.payload), (0x15, payload));

    new_backend.send(0x20, b"welcome").await.unwrap();
    let received = next(&mut p.client_reader).await;
    assert_eq!(received.id, 0x20);
    assert_eq!(&received.payload[..], b"welcome");

    assert!(p.session.is_open());
    p.session.close("done", true).await;
}

// ============================================
// Broadcast peers
// ============================================

#[tokio::test]
async fn test_broadcast_peer_mirrors_in_order() {
    const N: u8 = 20;

    let mut h = harness(ProxyConfig::default());
    let mut p = login(&mut h).await;

    let spawn = p.session.spawn_peer();
    let backend = async {
        let (leg, mut reader, addr) = h.next_backend().await;
        assert_eq!(addr, BackendAddr::new("mc.hypixel.net", 25565));
        accept_login(&leg, &mut reader).await;
        (leg, reader)
    };
    let (peer, (peer_backend, mut peer_reader)) = tokio::join!(spawn, backend);
    let peer = peer.unwrap();
    assert_eq!(p.session.peers().len(), 1);
    assert_eq!(h.events_named("peer_spawned").len(), 1);

    for i in 0..N {
        p.client.send(0x15, &[i]).await.unwrap();
    }
    for i in 0..N {
        let primary = next(&mut p.backend_reader).await;
        assert_eq!(&primary.payload[..], &[i]);
        let mirrored = next(&mut peer_reader).await;
        assert_eq!((mirrored.id, &mirrored.payload[..]), (0x15, &[i][..]));
    }
    eventually(|| peer.delivered() == u64::from(N)).await;

    // Server-side packets are not mirrored by default.
    p.backend.send(0x22, b"primary only").await.unwrap();
    assert_eq!(next(&mut p.client_reader).await.id, 0x22);

    // Keep-alives from the peer's backend are answered by the peer.
    peer_backend.send(ids::KEEP_ALIVE, &[0, 0, 0, 9]).await.unwrap();
    let echo = next(&mut peer_reader).await;
    assert_eq!((echo.id, &echo.payload[..]), (ids::KEEP_ALIVE, &[0u8, 0, 0, 9][..]));

    p.session.retire_peer(&peer).await;
    p.session.retire_peer(&peer).await;
    assert!(peer.is_retired());
    assert!(p.session.peers().is_empty());
    expect_eof(&mut peer_reader).await;

    p.client.send(0x15, b"after").await.unwrap();
    assert_eq!(&next(&mut p.backend_reader).await.payload[..], b"after");
    assert_eq!(peer.delivered(), u64::from(N));
    assert!(p.session.is_open());

    let forwarded_before_close = p.session.stats.snapshot().packets_forwarded;
    assert!(forwarded_before_close >= u64::from(N) + 1);
    p.session.close("done", true).await;
}

#[tokio::test]
async fn test_closing_primary_retires_peers() {
    let mut h = harness(ProxyConfig::default());
    let p = login(&mut h).await;

    let spawn = p.session.spawn_peer();
    let backend = async {
        let (leg, mut reader, _) = h.next_backend().await;
        accept_login(&leg, &mut reader).await;
        (leg, reader)
    };
    let (peer, (_peer_backend, mut peer_reader)) = tokio::join!(spawn, backend);
    let peer = peer.unwrap();

    p.session.close("bye", true).await;
    assert!(peer.is_retired());
    expect_eof(&mut peer_reader).await;
    assert!(h.ctx.hub.peers(&p.session.id).is_empty());
}

#[tokio::test]
async fn test_spawn_peer_before_login_fails() {
    let h = harness(ProxyConfig::default());
    let (session, _client, _reader) = open_client(&h);

    let err = session.spawn_peer().await.unwrap_err();
    assert!(matches!(err, ServerError::InvalidState { .. }));
    session.close("done", true).await;
}
