use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::error::{channel_error, Error};
use crate::realtime::messages::{InboundMessage, OutboundMessage};
use crate::realtime::transport::{Connection, Connector, Outbound};

/// In-process connector backed by `async-channel`, for tests and simulations.
/// Each `connect` hands out a fresh connection; the matching server end is
/// published on the receiver returned by [`pair`].
pub struct MemoryConnector {
    accepted: Sender<ServerEnd>,
    refuse: Mutex<bool>,
}

impl MemoryConnector {
    /// Makes subsequent connection attempts fail until called again with `false`.
    pub async fn set_refusing(&self, refuse: bool) {
        *self.refuse.lock().await = refuse;
    }
}

/// The backend side of a memory connection.
pub struct ServerEnd {
    from_client: Receiver<String>,
    to_client: Sender<String>,
}

impl ServerEnd {
    pub async fn recv(&self) -> Option<OutboundMessage> {
        let text = self.from_client.recv().await.ok()?;

        serde_json::from_str(&text).ok()
    }

    /// Drains whatever the client has sent so far without waiting.
    pub fn drain(&self) -> Vec<OutboundMessage> {
        let mut messages = vec![];

        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(message) = serde_json::from_str(&text) {
                messages.push(message);
            }
        }

        messages
    }

    pub async fn push(&self, message: &InboundMessage) -> Result<(), Error> {
        let text = serde_json::to_string(message)?;

        self.push_raw(text).await
    }

    pub async fn push_raw(&self, text: String) -> Result<(), Error> {
        self.to_client.send(text).await.map_err(channel_error)
    }

    /// Drops the server side of the connection.
    pub fn hang_up(self) {}
}

struct MemoryOutbound {
    to_server: Sender<String>,
}

#[async_trait]
impl Outbound for MemoryOutbound {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.to_server.send(text).await.map_err(channel_error)
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.to_server.close();

        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, Error> {
        if *self.refuse.lock().await {
            return Err(channel_error("connection refused"));
        }

        let (to_server, from_client) = async_channel::unbounded();
        let (to_client, from_server) = async_channel::unbounded::<String>();

        self.accepted
            .send(ServerEnd {
                from_client,
                to_client,
            })
            .await
            .map_err(channel_error)?;

        Ok(Connection {
            outbound: Box::new(MemoryOutbound { to_server }),
            inbound: from_server.map(Ok::<String, Error>).boxed(),
        })
    }
}

pub fn pair() -> (MemoryConnector, Receiver<ServerEnd>) {
    let (accepted, incoming) = async_channel::unbounded();

    (
        MemoryConnector {
            accepted,
            refuse: Mutex::new(false),
        },
        incoming,
    )
}
