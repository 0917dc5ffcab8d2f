#![allow(dead_code)]

use axum::body::Body;
use futures_util::{SinkExt, StreamExt};
use gatewaysim::config::GatewaySettings;
use gatewaysim::gateway::hub::Hub;
use gatewaysim::routes;
use gatewaysim::state::AppState;
use gatewaysim::voice::transport::VoiceServer;
use http::{Method, Request};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a test waits for a single frame before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Test server owning its own hub and state. Each instance is isolated and
/// safe for parallel tests; dropping it stops the hub.
pub struct TestServer {
    pub state: AppState,
    pub shutdown: CancellationToken,
    hub_task: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_settings(GatewaySettings::default()).await
    }

    /// Server with custom liveness knobs, e.g. a short heartbeat timeout.
    pub async fn with_settings(settings: GatewaySettings) -> Self {
        let shutdown = CancellationToken::new();
        let (hub, hub_task) = Hub::spawn(
            settings.heartbeat_interval.as_millis() as u64,
            shutdown.clone(),
        );
        Self {
            state: AppState::new(hub, settings),
            shutdown,
            hub_task: Some(hub_task),
        }
    }

    /// Cancel the shutdown token and wait for the hub's control loop to exit.
    pub async fn stop_hub(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.hub_task.take() {
            task.await.unwrap();
        }
    }

    /// Returns an Axum Router wired to this server's state for `oneshot()` calls.
    pub fn router(&self) -> axum::Router {
        routes::router(self.state.clone())
    }

    /// Binds on port 0, spawns the HTTP/gateway server, and returns its address.
    pub async fn spawn(&self) -> SocketAddr {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Binds the voice transport on port 0 and returns its address.
    pub async fn spawn_voice(&self, read_timeout: Duration) -> SocketAddr {
        let server = VoiceServer::bind("127.0.0.1:0", self.state.clone(), read_timeout)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(self.shutdown.clone()));
        addr
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/gateway")).await.unwrap();
    ws
}

pub async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next frame, which must be a text frame holding JSON.
pub async fn recv_json(ws: &mut Ws) -> serde_json::Value {
    let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .unwrap();
    assert!(msg.is_text(), "expected text message, got {msg:?}");
    let text = msg.into_text().unwrap();
    serde_json::from_str(&text).unwrap()
}

/// Consume HELLO, identify, and return the READY and GUILD_CREATE frames.
pub async fn identify(ws: &mut Ws) -> (serde_json::Value, serde_json::Value) {
    let hello = recv_json(ws).await;
    assert_eq!(hello["op"], 10);
    send_json(
        ws,
        serde_json::json!({
            "op": 2,
            "d": { "token": "test-token", "intents": 513, "properties": { "os": "linux" } }
        }),
    )
    .await;
    let ready = recv_json(ws).await;
    let guild_create = recv_json(ws).await;
    (ready, guild_create)
}

/// Poll the hub until `check` holds or the timeout passes.
pub async fn wait_for_sessions(
    state: &AppState,
    check: impl Fn(usize) -> bool,
) -> usize {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let n = state.hub.sessions().await.map(|s| s.len()).unwrap_or(0);
        if check(n) || tokio::time::Instant::now() >= deadline {
            return n;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Build a request with a JSON body.
pub fn json_request(method: Method, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Parse a response body into a `serde_json::Value`.
pub async fn parse_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
