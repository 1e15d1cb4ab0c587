// Shared primitives for one-time server bootstrapping across integration tests.
use std::{
    sync::OnceLock,
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

// Global base URL used by all tests after the server publishes its bound address.
static SERVER_URL: OnceLock<String> = OnceLock::new();
// One-time guard that ensures the server bootstrap path runs only once.
static SERVER_READY: OnceLock<()> = OnceLock::new();

/// Ensures the test server is running and returns its `ws://host:port` base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = std::sync::Arc::new(OnceLock::<String>::new());
        let published_url_thread = std::sync::Arc::clone(&published_url);
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("ws://{}/ws", addr));
                lobby_server::run(listener).await.expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

fn wait_for_server_url_and_readiness(published_url: std::sync::Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("ws://")
        .and_then(|rest| rest.strip_suffix("/ws"))
        .expect("base url should be ws://host:port/ws");

    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}

/// A thin websocket client used to drive protocol scenarios from tests.
pub struct TestClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect() -> Self {
        let url = ensure_server();
        let (socket, _) = connect_async(url).await.expect("connect");
        Self { socket }
    }

    pub async fn send(&mut self, call: i64, data: Value) {
        let text = serde_json::to_string(&serde_json::json!({ "call": call, "data": data }))
            .expect("serialize");
        self.socket
            .send(Message::Text(text.into()))
            .await
            .expect("send");
    }

    /// Sends a raw frame text verbatim, bypassing the `{call,data}` envelope helper.
    pub async fn send_raw(&mut self, text: &str) {
        self.socket
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send");
    }

    /// Waits for the next text frame and returns it parsed as `(call, data)`.
    pub async fn recv(&mut self) -> (i64, Value) {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.socket.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("ws error");
            match msg {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(&text).expect("valid json");
                    let call = value["call"].as_i64().expect("call field");
                    let data = value["data"].clone();
                    return (call, data);
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(frame) => panic!("unexpected close: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// Waits for the socket to be closed by the server, returning the close code.
    pub async fn recv_close(&mut self) -> u16 {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.socket.next())
                .await
                .expect("timed out waiting for close")
                .expect("stream ended")
                .expect("ws error");
            if let Message::Close(Some(frame)) = msg {
                return frame.code.into();
            }
            if let Message::Close(None) = msg {
                return 1005;
            }
        }
    }
}
