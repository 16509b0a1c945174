//! Telephony event sources
//!
//! A source is reached through an [`EventSourceConnector`], which opens an
//! authenticated session, registers the requested subscriptions and hands
//! back an [`EventStream`]. Returning from `connect` is the "ready" signal.
//!
//! - `inbound`: FreeSWITCH-style inbound event socket over TCP
//! - `mock`: channel-backed connector for tests

use async_trait::async_trait;
use esl_common::Header;
use std::fmt;

pub mod error;
pub mod frame;
pub mod inbound;
pub mod mock;

pub use error::SourceError;
pub use inbound::{InboundConnection, InboundConnector};

pub type Result<T> = std::result::Result<T, SourceError>;

/// Address and credential of one upstream server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An event category to receive from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Application-defined `CUSTOM` event identified by its subclass
    Custom(String),
    /// Built-in event type such as `HEARTBEAT`
    Plain(String),
}

impl Subscription {
    pub fn custom(subclass: impl Into<String>) -> Self {
        Subscription::Custom(subclass.into())
    }

    pub fn plain(event_type: impl Into<String>) -> Self {
        Subscription::Plain(event_type.into())
    }

    /// Socket command registering this subscription
    pub fn command(&self) -> String {
        match self {
            Subscription::Custom(subclass) => format!("event plain CUSTOM {}", subclass),
            Subscription::Plain(event_type) => format!("event plain {}", event_type),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::Custom(subclass) => write!(f, "CUSTOM {}", subclass),
            Subscription::Plain(event_type) => f.write_str(event_type),
        }
    }
}

/// An event as delivered by the source: ordered headers plus optional body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub headers: Vec<Header>,
    pub body: Option<String>,
}

impl RawEvent {
    pub fn new(headers: Vec<Header>) -> Self {
        Self { headers, body: None }
    }

    /// Build an event from `(name, value)` pairs
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::new(pairs.into_iter().map(|(n, v)| Header::new(n, v)).collect())
    }

    /// First header with the given name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn event_name(&self) -> Option<&str> {
        self.header("Event-Name")
    }

    pub fn subclass(&self) -> Option<&str> {
        self.header("Event-Subclass")
    }
}

/// Opens sessions against an upstream server
#[async_trait]
pub trait EventSourceConnector: Send + Sync {
    /// Connect, authenticate and subscribe. The returned stream is ready.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        subscriptions: &[Subscription],
    ) -> Result<Box<dyn EventStream>>;
}

/// A live session delivering events
#[async_trait]
pub trait EventStream: Send {
    /// Next event, `Ok(None)` once the server closed the session
    async fn next_event(&mut self) -> Result<Option<RawEvent>>;

    /// Release the session
    async fn close(&mut self);
}
