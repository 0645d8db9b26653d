//! Mock servers for client integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use flate2::{Compress, Compression, FlushCompress};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const SYNC_FLUSH_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// A scripted gateway server
///
/// Each accepted connection runs the provided handler with its 0-based
/// connection index, so a script can treat reconnects differently from the
/// first connect.
pub struct MockGateway {
    url: String,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockGateway {
    /// Bind an ephemeral port and serve connections with `handler`
    pub async fn start<F, Fut>(handler: F) -> Result<Self>
    where
        F: Fn(usize, GatewayConnection) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&connections);
        let handler = Arc::new(handler);

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = seen.fetch_add(1, Ordering::SeqCst);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        handler(index, GatewayConnection::new(ws)).await;
                    }
                });
            }
        });

        Ok(Self {
            url: format!("ws://{addr}"),
            connections,
            handle,
        })
    }

    /// WebSocket URL clients should connect to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of connections accepted so far
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One server-side gateway connection
///
/// Sends zlib-stream compressed binary frames the way the real gateway does
/// and reads the client's plain-text commands.
pub struct GatewayConnection {
    ws: WebSocketStream<TcpStream>,
    compress: Compress,
}

impl GatewayConnection {
    fn new(ws: WebSocketStream<TcpStream>) -> Self {
        Self {
            ws,
            compress: Compress::new(Compression::default(), true),
        }
    }

    /// Send one payload as a sync-flushed compressed binary frame
    pub async fn send_payload(&mut self, payload: &Value) -> Result<()> {
        let text = payload.to_string();
        let frame = compress_frame(&mut self.compress, text.as_bytes());
        self.ws.send(Message::Binary(frame)).await?;
        Ok(())
    }

    pub async fn send_hello(&mut self, heartbeat_interval_ms: u64) -> Result<()> {
        self.send_payload(&json!({
            "op": 10,
            "d": { "heartbeat_interval": heartbeat_interval_ms },
        }))
        .await
    }

    pub async fn send_ready(&mut self, session_id: &str, seq: u64) -> Result<()> {
        self.send_payload(&json!({
            "op": 0,
            "t": "READY",
            "s": seq,
            "d": { "v": 1, "session_id": session_id },
        }))
        .await
    }

    pub async fn send_dispatch(&mut self, name: &str, seq: u64, data: Value) -> Result<()> {
        self.send_payload(&json!({ "op": 0, "t": name, "s": seq, "d": data }))
            .await
    }

    /// Read client commands until one with the given op arrives
    ///
    /// Heartbeats received along the way are acknowledged so the client's
    /// liveness check stays happy.
    pub async fn expect_op(&mut self, op: u8) -> Result<Value> {
        loop {
            let message = self
                .ws
                .next()
                .await
                .context("connection closed while waiting for client command")??;
            let Message::Text(text) = message else {
                continue;
            };
            let value: Value = serde_json::from_str(&text)?;
            let got = value["op"].as_u64().context("command without op")?;

            if got == 1 && op != 1 {
                self.send_payload(&json!({ "op": 11 })).await?;
                continue;
            }
            if got == u64::from(op) {
                return Ok(value);
            }
        }
    }

    /// Close the connection with a gateway close code
    pub async fn close_with(mut self, code: u16) -> Result<()> {
        self.ws
            .send(Message::Close(Some(CloseFrame {
                code: code.into(),
                reason: "".into(),
            })))
            .await?;
        // Drain until the peer acknowledges the close
        while let Some(Ok(_)) = self.ws.next().await {}
        Ok(())
    }

    /// Keep the socket open without ever speaking
    pub async fn hold_open(mut self) {
        while let Some(Ok(_)) = self.ws.next().await {}
    }
}

fn compress_frame(compress: &mut Compress, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 64);
    let mut consumed = 0usize;
    loop {
        let before = compress.total_in();
        compress
            .compress_vec(&bytes[consumed..], &mut out, FlushCompress::Sync)
            .expect("in-memory compression");
        consumed += usize::try_from(compress.total_in() - before).unwrap_or(usize::MAX);
        if consumed >= bytes.len() && out.ends_with(&SYNC_FLUSH_SUFFIX) {
            return out;
        }
        out.reserve(64.max(out.capacity()));
    }
}

/// A one-endpoint REST stub answering `/gateway/bot`
pub struct MockApi {
    base_url: String,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockApi {
    /// Serve a canned gateway-bot response on an ephemeral port
    pub async fn start(gateway_url: &str, shards: u32, max_concurrency: u32) -> Result<Self> {
        let body = json!({
            "url": gateway_url,
            "shards": shards,
            "session_start_limit": {
                "total": 1000,
                "remaining": 999,
                "reset_after": 0,
                "max_concurrency": max_concurrency,
            },
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&requests);

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0usize;
                    // Requests have no body; read until the header terminator
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            requests,
            handle,
        })
    }

    /// Base URL to point the HTTP client at
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of requests served
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
