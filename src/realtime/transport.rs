use async_trait::async_trait;
use futures::{
    stream::{BoxStream, SplitSink},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{channel_error, Error};

pub type InboundStream = BoxStream<'static, Result<String, Error>>;

/// Write half of a duplex text connection.
#[async_trait]
pub trait Outbound: Send {
    async fn send_text(&mut self, text: String) -> Result<(), Error>;
    async fn close(&mut self) -> Result<(), Error>;
}

pub struct Connection {
    pub outbound: Box<dyn Outbound>,
    pub inbound: InboundStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, Error>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct WebSocketOutbound {
    sink: WsSink,
}

#[async_trait]
impl Outbound for WebSocketOutbound {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.sink.send(Message::Text(text)).await?;

        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.sink.close().await?;

        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<Connection, Error> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (sink, source) = stream.split();

        // Control frames are answered by tungstenite itself; only text payloads
        // are surfaced, and a close frame ends the stream.
        let inbound = source
            .take_while(|frame| futures::future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                    Ok(_) => None,
                    Err(err) => Some(Err(channel_error(err))),
                }
            })
            .boxed();

        Ok(Connection {
            outbound: Box::new(WebSocketOutbound { sink }),
            inbound,
        })
    }
}
