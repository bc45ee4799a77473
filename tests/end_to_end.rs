//! End-to-end scenarios against a real bound `TcpListener` (§8 literal
//! scenarios), driven the way the teacher's `examples/long_running_client.rs`
//! drives a live connection: a real socket, not an in-process fake.

use async_trait::async_trait;
use sessionforge::command::{CommandContext, CommandRegistry};
use sessionforge::framer::{FnFramerFactory, TerminatorFramer};
use sessionforge::session::{ServerHandler, Session};
use sessionforge::{ConnectionFilter, ConnectionFilterChain, ServerConfig, ServerCore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

struct WelcomeHandler {
    name: String,
}

#[async_trait]
impl ServerHandler for WelcomeHandler {
    async fn on_session_started(&self, session: &Arc<Session>) {
        let _ = session.send_line(&format!("Welcome to {}", self.name));
    }
}

fn crlf_factory() -> FnFramerFactory<impl Fn(SocketAddr) -> Box<dyn sessionforge::Framer> + Send + Sync> {
    FnFramerFactory(|_remote| -> Box<dyn sessionforge::Framer> { Box::new(TerminatorFramer::crlf()) })
}

fn echo_commands() -> CommandRegistry {
    CommandRegistry::builder()
        .register("ECHO", |ctx: &mut CommandContext| {
            let payload = String::from_utf8_lossy(&ctx.request.payload).to_string();
            let session = ctx.session.clone();
            async move {
                session.send_line(&payload)?;
                Ok(())
            }
        })
        .unwrap()
        .build()
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    tokio::io::AsyncBufReadExt::read_line(stream, &mut line)
        .await
        .expect("read line");
    line.trim_end_matches(['\r', '\n']).to_string()
}

fn local_config(name: &str) -> ServerConfig {
    ServerConfig { name: name.to_string(), ..Default::default() }
}

#[tokio::test]
async fn welcome_message_on_connect() {
    let config = local_config("echotest");
    let server = Arc::new(
        ServerCore::new(
            config,
            WelcomeHandler { name: "echotest".into() },
            crlf_factory(),
            CommandRegistry::builder().build(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let line = read_line(&mut reader).await;
    assert_eq!(line, "Welcome to echotest");

    server.stop().await;
}

#[tokio::test]
async fn echo_command_round_trips() {
    let server = Arc::new(
        ServerCore::new(
            local_config("echo"),
            WelcomeHandler { name: "echo".into() },
            crlf_factory(),
            echo_commands(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let _welcome = read_line(&mut reader).await;

    reader.get_mut().write_all(b"ECHO hello\r\n").await.unwrap();
    let line = read_line(&mut reader).await;
    assert_eq!(line, "hello");

    server.stop().await;
}

#[tokio::test]
async fn unknown_command_gets_default_reply() {
    let server = Arc::new(
        ServerCore::new(
            local_config("unknown"),
            WelcomeHandler { name: "unknown".into() },
            crlf_factory(),
            echo_commands(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let _welcome = read_line(&mut reader).await;

    reader.get_mut().write_all(b"XYZ 1 2 3\r\n").await.unwrap();
    let line = read_line(&mut reader).await;
    assert_eq!(line, "Unknown request: XYZ");

    server.stop().await;
}

#[tokio::test]
async fn split_command_across_receives_still_frames() {
    let server = Arc::new(
        ServerCore::new(
            local_config("split"),
            WelcomeHandler { name: "split".into() },
            crlf_factory(),
            echo_commands(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let _welcome = read_line(&mut reader).await;

    reader.get_mut().write_all(b"EC").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    reader.get_mut().write_all(b"HO hi").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    reader.get_mut().write_all(b"\r\n").await.unwrap();

    let line = read_line(&mut reader).await;
    assert_eq!(line, "hi");

    server.stop().await;
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let server = Arc::new(
        ServerCore::new(
            local_config("pipeline"),
            WelcomeHandler { name: "pipeline".into() },
            crlf_factory(),
            echo_commands(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let _welcome = read_line(&mut reader).await;

    reader.get_mut().write_all(b"ECHO a\r\nECHO b\r\nECHO c\r\n").await.unwrap();

    assert_eq!(read_line(&mut reader).await, "a");
    assert_eq!(read_line(&mut reader).await, "b");
    assert_eq!(read_line(&mut reader).await, "c");

    server.stop().await;
}

#[tokio::test]
async fn idle_session_is_swept_after_timeout() {
    let mut config = local_config("idle");
    config.idle_session_timeout = Duration::from_millis(300);
    config.clear_idle_session = true;
    config.clear_idle_session_interval = Duration::from_millis(100);
    // Sweep against the live registry rather than the periodic snapshot so
    // the test doesn't also have to wait out `session_snapshot_interval`'s
    // 1s minimum (§8 boundary behavior) before the session is visible.
    config.disable_session_snapshot = true;

    let server = Arc::new(
        ServerCore::new(
            config,
            WelcomeHandler { name: "idle".into() },
            crlf_factory(),
            CommandRegistry::builder().build(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(&mut stream);
    let _welcome = read_line(&mut reader).await;

    tokio::time::sleep(Duration::from_millis(900)).await;

    assert_eq!(server.sessions().len(), 0);
    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "peer should observe EOF once the idle sweep closes it");

    server.stop().await;
}

#[tokio::test]
async fn max_connections_rejects_the_overflow_connection() {
    let mut config = local_config("maxconn");
    config.max_connection_number = 2;

    let server = Arc::new(
        ServerCore::new(
            config,
            WelcomeHandler { name: "maxconn".into() },
            crlf_factory(),
            CommandRegistry::builder().build(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let mut first = BufReader::new(TcpStream::connect(addr).await.unwrap());
    assert_eq!(read_line(&mut first).await, "Welcome to maxconn");
    let mut second = BufReader::new(TcpStream::connect(addr).await.unwrap());
    assert_eq!(read_line(&mut second).await, "Welcome to maxconn");

    let mut third = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 8];
    let n = third.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "third connection is closed without a welcome");

    server.stop().await;
}

struct DenyEverything;

#[async_trait]
impl ConnectionFilter for DenyEverything {
    fn name(&self) -> &str {
        "deny-everything"
    }

    async fn allow_connect(&self, _remote: SocketAddr) -> bool {
        false
    }
}

#[tokio::test]
async fn connection_filter_drops_denied_peers() {
    let mut filters = ConnectionFilterChain::new();
    filters.push(DenyEverything);

    let server = Arc::new(
        ServerCore::new(
            local_config("filtered"),
            WelcomeHandler { name: "filtered".into() },
            crlf_factory(),
            CommandRegistry::builder().build(),
            filters,
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "denied peer never receives the welcome and sees EOF");

    server.stop().await;
}

#[tokio::test]
async fn protocol_upgrade_switches_to_fixed_size_framing() {
    let commands = CommandRegistry::builder()
        .register("SWITCH", |_ctx: &mut CommandContext| async { Ok(()) })
        .unwrap()
        .register("FRAME", |ctx: &mut CommandContext| {
            let payload = String::from_utf8_lossy(&ctx.request.payload).to_string();
            let session = ctx.session.clone();
            async move {
                session.send_line(&payload)?;
                Ok(())
            }
        })
        .unwrap()
        .build();

    let server = Arc::new(
        ServerCore::new(
            local_config("upgrade"),
            WelcomeHandler { name: "upgrade".into() },
            crlf_factory(),
            commands,
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    let _welcome = read_line(&mut reader).await;

    // The SWITCH line and a full fixed-size frame's worth of residue
    // arrive in the same write, to exercise the non-retroactive framer
    // swap (§9 Open Question): "HELLO" is left over after the SWITCH
    // line's terminator and must be decoded by the fixed-size framer on
    // the very next call, not reparsed as text.
    reader.get_mut().write_all(b"SWITCH 5\r\nHELLO").await.unwrap();

    let line = read_line(&mut reader).await;
    assert_eq!(line, "HELLO", "residue decoded by the fixed-size framer after the switch");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_each_see_only_their_own_tokens() {
    let server = Arc::new(
        ServerCore::new(
            local_config("concurrency"),
            WelcomeHandler { name: "concurrency".into() },
            crlf_factory(),
            echo_commands(),
            ConnectionFilterChain::new(),
        )
        .unwrap(),
    );
    server.start().await.unwrap();
    let addr = server.listeners().unwrap()[0].endpoint;

    let completed = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for client_id in 0..20 {
        let completed = completed.clone();
        handles.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut reader = BufReader::new(stream);
            let _welcome = read_line(&mut reader).await;

            for i in 0..10 {
                let token = format!("c{client_id}-t{i}");
                let cmd = format!("ECHO {token}\r\n");
                reader.get_mut().write_all(cmd.as_bytes()).await.unwrap();
                let line = read_line(&mut reader).await;
                assert_eq!(line, token);
            }
            completed.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(completed.load(Ordering::Relaxed), 20);

    server.stop().await;
}
