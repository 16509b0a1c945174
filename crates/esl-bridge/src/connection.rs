//! Connection tasks
//!
//! Each connect attempt runs in its own task. The task only talks to the
//! socket and reports what it sees to the runtime as [`SourceSignal`]s; it
//! never touches bridge state. Aborting the task drops the stream and with
//! it the underlying session.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use esl_source::{Endpoint, EventSourceConnector, RawEvent, Subscription};

/// Message from a connection task to the runtime
#[derive(Debug, Clone)]
pub struct SourceSignal {
    /// Index of the switch in the runtime's supervisor list
    pub switch: usize,
    /// Attempt the signal belongs to
    pub generation: u64,
    pub kind: SignalKind,
}

#[derive(Debug, Clone)]
pub enum SignalKind {
    /// Authenticated and subscribed
    Ready,
    Event(RawEvent),
    /// The attempt ended; `None` when the server closed cleanly
    Closed(Option<String>),
}

pub fn spawn_connection(
    switch: usize,
    generation: u64,
    endpoint: Endpoint,
    connector: Arc<dyn EventSourceConnector>,
    subscriptions: Arc<[Subscription]>,
    signals: mpsc::UnboundedSender<SourceSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = |kind| SourceSignal { switch, generation, kind };

        let mut stream = match connector.connect(&endpoint, &subscriptions).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(host = %endpoint.host, port = endpoint.port, generation, error = %e, "Connect attempt failed");
                let _ = signals.send(signal(SignalKind::Closed(Some(e.to_string()))));
                return;
            }
        };

        if signals.send(signal(SignalKind::Ready)).is_err() {
            stream.close().await;
            return;
        }

        let reason = loop {
            match stream.next_event().await {
                Ok(Some(event)) => {
                    if signals.send(signal(SignalKind::Event(event))).is_err() {
                        debug!(host = %endpoint.host, "Runtime gone, dropping connection");
                        stream.close().await;
                        return;
                    }
                }
                Ok(None) => break None,
                Err(e) => break Some(e.to_string()),
            }
        };

        stream.close().await;
        let _ = signals.send(signal(SignalKind::Closed(reason)));
    })
}
