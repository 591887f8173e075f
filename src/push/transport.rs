//! Push transport abstraction
//!
//! The connection manager only needs "open a stream for this user", "next
//! event" and "close with a code". The websocket implementation lives behind
//! the `ws` feature.

use async_trait::async_trait;

use crate::error::AppResult;

/// RFC 6455 normal closure
pub const NORMAL_CLOSURE: u16 = 1000;
/// Connection dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Closed { code: u16 },
}

#[async_trait]
pub trait PushStream: Send {
    /// Next event. A dropped connection is reported as
    /// `Closed { code: ABNORMAL_CLOSURE }`.
    async fn next_event(&mut self) -> StreamEvent;

    async fn close(&mut self, code: u16);
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, user_id: &str) -> AppResult<Box<dyn PushStream>>;
}

#[cfg(feature = "ws")]
pub use self::ws::WsTransport;

#[cfg(feature = "ws")]
mod ws {
    use super::*;
    use crate::error::AppError;
    use futures::{SinkExt, StreamExt};
    use reqwest::Url;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tracing::{debug, info};

    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Websocket transport: `{url}?userId={user_id}`
    pub struct WsTransport {
        url: String,
        connect_timeout: Duration,
    }

    impl WsTransport {
        pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
            Self {
                url: url.into(),
                connect_timeout,
            }
        }

        fn url_for(&self, user_id: &str) -> AppResult<String> {
            let mut url = Url::parse(&self.url).map_err(|e| {
                AppError::configuration(format!("Invalid push url '{}': {}", self.url, e))
            })?;
            url.query_pairs_mut().append_pair("userId", user_id);
            Ok(url.into())
        }
    }

    #[async_trait]
    impl PushTransport for WsTransport {
        async fn open(&self, user_id: &str) -> AppResult<Box<dyn PushStream>> {
            let url = self.url_for(user_id)?;
            let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
                .await
                .map_err(|_| AppError::timeout("push connect", self.connect_timeout))?
                .map_err(|e| AppError::transport(format!("websocket connect failed: {}", e)))?;

            info!(user_id, "push socket open");
            Ok(Box::new(WsStream { socket }))
        }
    }

    struct WsStream {
        socket: Socket,
    }

    #[async_trait]
    impl PushStream for WsStream {
        async fn next_event(&mut self) -> StreamEvent {
            loop {
                match self.socket.next().await {
                    Some(Ok(Message::Text(text))) => return StreamEvent::Text(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => return StreamEvent::Text(text),
                        Err(_) => debug!("non-utf8 binary frame ignored"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(ABNORMAL_CLOSURE);
                        return StreamEvent::Closed { code };
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(error = %e, "push socket error");
                        return StreamEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                        };
                    }
                    None => {
                        return StreamEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                        }
                    }
                }
            }
        }

        async fn close(&mut self, code: u16) {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            };
            if let Err(e) = self.socket.close(Some(frame)).await {
                debug!(error = %e, "push socket close failed");
            }
            let _ = self.socket.flush().await;
        }
    }

}
