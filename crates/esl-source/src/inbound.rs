//! Inbound event socket client
//!
//! Connects to the server's event socket, answers the `auth/request`
//! challenge, registers one `event plain ...` command per subscription and
//! then yields `text/event-plain` frames as [`RawEvent`]s.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::frame::{
    self, Frame, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
    CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_EVENT_PLAIN, CONTENT_TYPE_RUDE_REJECTION,
};
use crate::{Endpoint, EventSourceConnector, EventStream, RawEvent, Result, SourceError, Subscription};

/// Connector for real event socket servers
#[derive(Debug, Clone, Default)]
pub struct InboundConnector;

impl InboundConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSourceConnector for InboundConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        subscriptions: &[Subscription],
    ) -> Result<Box<dyn EventStream>> {
        let mut connection = InboundConnection::connect(endpoint).await?;

        for subscription in subscriptions {
            match connection.subscribe(subscription).await {
                Ok(reply) => info!(
                    host = %endpoint.host,
                    event = %subscription,
                    reply = %reply,
                    "Subscribed to event"
                ),
                // A refused subscription leaves the rest of the session usable
                Err(SourceError::CommandFailed { reply, .. }) => warn!(
                    host = %endpoint.host,
                    event = %subscription,
                    reply = %reply,
                    "Subscription rejected"
                ),
                Err(e) => return Err(e),
            }
        }

        Ok(Box::new(connection))
    }
}

/// An authenticated event socket session
pub struct InboundConnection {
    host: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Events that arrived while a command reply was awaited
    pending: VecDeque<RawEvent>,
    closed: bool,
}

impl InboundConnection {
    /// Open the socket and authenticate
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        info!(host = %endpoint.host, port = endpoint.port, "Connecting to event socket");

        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let mut connection = Self {
            host: endpoint.host.clone(),
            reader: BufReader::new(read_half),
            writer: write_half,
            pending: VecDeque::new(),
            closed: false,
        };

        connection.authenticate(&endpoint.password).await?;
        info!(host = %endpoint.host, "Event socket authenticated");

        Ok(connection)
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        loop {
            let frame = self.read_required().await?;
            match frame.content_type() {
                Some(CONTENT_TYPE_AUTH_REQUEST) => break,
                Some(CONTENT_TYPE_DISCONNECT_NOTICE) | Some(CONTENT_TYPE_RUDE_REJECTION) => {
                    return Err(disconnected(&frame));
                }
                other => debug!(host = %self.host, content_type = ?other, "Ignoring frame before auth request"),
            }
        }

        let reply = self.exchange(&format!("auth {}", password)).await?;
        if !reply.is_ok_reply() {
            return Err(SourceError::AuthFailed(
                reply.reply_text().unwrap_or("no reply text").to_string(),
            ));
        }
        Ok(())
    }

    /// Send a command and return its `Reply-Text`
    pub async fn command(&mut self, command: &str) -> Result<String> {
        let reply = self.exchange(command).await?;
        let text = reply.reply_text().unwrap_or_default().to_string();

        if !reply.is_ok_reply() {
            return Err(SourceError::CommandFailed {
                command: command.to_string(),
                reply: text,
            });
        }
        Ok(text)
    }

    pub async fn subscribe(&mut self, subscription: &Subscription) -> Result<String> {
        self.command(&subscription.command()).await
    }

    async fn exchange(&mut self, command: &str) -> Result<Frame> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n\n").await?;
        self.writer.flush().await?;

        loop {
            let frame = self.read_required().await?;
            match frame.content_type() {
                Some(CONTENT_TYPE_COMMAND_REPLY) => return Ok(frame),
                Some(CONTENT_TYPE_EVENT_PLAIN) => {
                    if let Some(body) = frame.body.as_deref() {
                        self.pending.push_back(frame::parse_event_plain(body));
                    }
                }
                Some(CONTENT_TYPE_DISCONNECT_NOTICE) | Some(CONTENT_TYPE_RUDE_REJECTION) => {
                    return Err(disconnected(&frame));
                }
                other => debug!(host = %self.host, content_type = ?other, "Ignoring frame while awaiting reply"),
            }
        }
    }

    async fn read_required(&mut self) -> Result<Frame> {
        frame::read_frame(&mut self.reader)
            .await?
            .ok_or(SourceError::UnexpectedEof)
    }
}

#[async_trait]
impl EventStream for InboundConnection {
    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        loop {
            let Some(frame) = frame::read_frame(&mut self.reader).await? else {
                return Ok(None);
            };

            match frame.content_type() {
                Some(CONTENT_TYPE_EVENT_PLAIN) => match frame.body.as_deref() {
                    Some(body) => return Ok(Some(frame::parse_event_plain(body))),
                    None => warn!(host = %self.host, "Event frame without body"),
                },
                Some(CONTENT_TYPE_DISCONNECT_NOTICE) | Some(CONTENT_TYPE_RUDE_REJECTION) => {
                    return Err(disconnected(&frame));
                }
                other => debug!(host = %self.host, content_type = ?other, "Ignoring non-event frame"),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.writer.write_all(b"exit\n\n").await {
            debug!(host = %self.host, error = %e, "Failed to send exit");
        }
        let _ = self.writer.shutdown().await;
        debug!(host = %self.host, "Event socket closed");
    }
}

fn disconnected(frame: &Frame) -> SourceError {
    let reason = frame
        .body
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .or(frame.content_type())
        .unwrap_or("disconnect")
        .to_string();
    SourceError::Disconnected(reason)
}
