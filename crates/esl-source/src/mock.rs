//! Channel-backed event source for tests and local runs
//!
//! Every successful `connect` opens a [`MockSession`]; events pushed into the
//! session come out of the returned stream. Sessions report whether the
//! stream side has been released, which makes connection leaks observable.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{Endpoint, EventSourceConnector, EventStream, RawEvent, Result, SourceError, Subscription};

#[derive(Default)]
struct MockState {
    attempts: usize,
    fail_next: usize,
    sessions: Vec<MockSession>,
}

/// Connector handing out in-memory sessions
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Connect attempts so far, failed ones included
    pub fn connect_count(&self) -> usize {
        self.state.lock().attempts
    }

    /// Successfully opened sessions, oldest first
    pub fn sessions(&self) -> Vec<MockSession> {
        self.state.lock().sessions.clone()
    }

    pub fn session(&self, index: usize) -> Option<MockSession> {
        self.state.lock().sessions.get(index).cloned()
    }

    pub fn latest_session(&self) -> Option<MockSession> {
        self.state.lock().sessions.last().cloned()
    }
}

#[async_trait]
impl EventSourceConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        subscriptions: &[Subscription],
    ) -> Result<Box<dyn EventStream>> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("mock refused {}", endpoint),
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.push(MockSession {
            endpoint: endpoint.clone(),
            subscriptions: subscriptions.to_vec(),
            sender: tx,
        });

        Ok(Box::new(MockStream { receiver: rx }))
    }
}

/// Server side of a mock connection
#[derive(Clone)]
pub struct MockSession {
    pub endpoint: Endpoint,
    pub subscriptions: Vec<Subscription>,
    sender: mpsc::UnboundedSender<Option<RawEvent>>,
}

impl MockSession {
    /// Deliver an event; false once the stream has been released
    pub fn send(&self, event: RawEvent) -> bool {
        self.sender.send(Some(event)).is_ok()
    }

    /// End the stream as if the server closed the socket
    pub fn hang_up(&self) {
        let _ = self.sender.send(None);
    }

    /// True once the client dropped or closed its stream
    pub fn is_released(&self) -> bool {
        self.sender.is_closed()
    }
}

struct MockStream {
    receiver: mpsc::UnboundedReceiver<Option<RawEvent>>,
}

#[async_trait]
impl EventStream for MockStream {
    async fn next_event(&mut self) -> Result<Option<RawEvent>> {
        match self.receiver.recv().await {
            Some(Some(event)) => Ok(Some(event)),
            Some(None) | None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_delivers_and_releases() {
        let connector = MockConnector::new();
        let endpoint = Endpoint::new("fs1", 8021, "ClueCon");

        let mut stream = connector
            .connect(&endpoint, &[Subscription::plain("HEARTBEAT")])
            .await
            .unwrap();
        let session = connector.session(0).unwrap();
        assert_eq!(session.subscriptions, vec![Subscription::plain("HEARTBEAT")]);

        assert!(session.send(RawEvent::from_pairs([("Event-Name", "HEARTBEAT")])));
        let event = stream.next_event().await.unwrap().unwrap();
        assert_eq!(event.event_name(), Some("HEARTBEAT"));

        assert!(!session.is_released());
        drop(stream);
        assert!(session.is_released());
    }

    #[tokio::test]
    async fn test_fail_next() {
        let connector = MockConnector::new();
        let endpoint = Endpoint::new("fs1", 8021, "ClueCon");
        connector.fail_next(1);

        assert!(connector.connect(&endpoint, &[]).await.is_err());
        assert!(connector.connect(&endpoint, &[]).await.is_ok());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_hang_up_ends_stream() {
        let connector = MockConnector::new();
        let endpoint = Endpoint::new("fs1", 8021, "ClueCon");
        let mut stream = connector.connect(&endpoint, &[]).await.unwrap();

        connector.latest_session().unwrap().hang_up();
        assert!(stream.next_event().await.unwrap().is_none());
    }
}
