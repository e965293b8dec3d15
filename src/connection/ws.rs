// WebSocket transport for the backend's /admin/ws/stats feed

use futures_util::StreamExt;
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Channel, Transport, TransportError};

pub const STATS_PATH: &str = "/admin/ws/stats";

/// Close code the backend uses when the admin token is missing or expired.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;

#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Derives `ws(s)://host[/prefix]/admin/ws/stats?token=...` from the control API base URL.
    pub fn from_base_url(base_url: &str, token: &str) -> Result<Self, TransportError> {
        Ok(Self::new(stats_url(base_url, token)?))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub fn stats_url(base_url: &str, token: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Other(format!(
                "unsupported url scheme {other:?}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Other(format!("cannot use scheme {scheme:?}")))?;
    let path = format!("{}{}", url.path().trim_end_matches('/'), STATS_PATH);
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url.into())
}

impl Transport for WsTransport {
    type Channel = WsChannel;

    fn open(&self) -> impl Future<Output = Result<WsChannel, TransportError>> + Send {
        let url = self.url.clone();
        async move {
            let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            Ok(WsChannel { stream })
        }
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Channel for WsChannel {
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send {
        async move {
            loop {
                let frame = match self.stream.next().await? {
                    Ok(frame) => frame,
                    Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    ) => return None,
                    Err(e) => return Some(Err(e.into())),
                };
                match frame {
                    Message::Text(text) => return Some(Ok(text)),
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => return Some(Ok(text)),
                        Err(_) => {
                            tracing::warn!(operation = "recv", "dropping non-UTF-8 binary frame");
                        }
                    },
                    Message::Close(frame) => {
                        if let Some(f) = &frame
                            && u16::from(f.code) == CLOSE_UNAUTHORIZED
                        {
                            tracing::warn!(
                                code = CLOSE_UNAUTHORIZED,
                                "backend rejected the admin token; will keep retrying"
                            );
                        }
                        return None;
                    }
                    // Pings are answered by tungstenite on the next read.
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!(error = %e, "websocket close handshake failed");
            }
        }
    }
}
