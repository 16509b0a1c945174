//! Bridge runtime
//!
//! A single task owns all bridge state: the supervisors and the call store.
//! Connection tasks report to it over an unbounded channel, and two tickers
//! drive the reconnect and maintenance sweeps. All mutation happens inside
//! this loop. Readers get a [`BridgeSnapshot`] through a watch channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use esl_common::BridgeSnapshot;
use esl_source::{Endpoint, EventSourceConnector, Subscription};

use crate::call_store::{CallStore, CallStoreConfig, MaintenanceReport};
use crate::connection::{SignalKind, SourceSignal};
use crate::publish::Publisher;
use crate::router::{self, DispatchOutcome, EventRouter};
use crate::supervisor::{ConnectionSupervisor, ReconnectPolicy};

/// State mutated by the runtime loop
pub struct BridgeState {
    pub supervisors: Vec<ConnectionSupervisor>,
    pub calls: CallStore,
}

impl BridgeState {
    pub fn new(endpoints: Vec<Endpoint>, policy: ReconnectPolicy, calls: CallStoreConfig) -> Self {
        let now = Utc::now();
        let supervisors = endpoints
            .into_iter()
            .enumerate()
            .map(|(switch, endpoint)| ConnectionSupervisor::new_at(switch, endpoint, policy.clone(), now))
            .collect();

        Self {
            supervisors,
            calls: CallStore::new(calls),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> BridgeSnapshot {
        BridgeSnapshot {
            connections: self.supervisors.iter().map(|s| s.snapshot(now)).collect(),
            active_calls: self.calls.len(),
            taken_at: now,
        }
    }
}

/// Sweep cadence
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub reconnect_check_interval: Duration,
    pub maintenance_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reconnect_check_interval: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(20),
        }
    }
}

pub struct BridgeRuntime {
    state: BridgeState,
    router: EventRouter,
    connector: Arc<dyn EventSourceConnector>,
    subscriptions: Arc<[Subscription]>,
    signals_tx: mpsc::UnboundedSender<SourceSignal>,
    signals_rx: mpsc::UnboundedReceiver<SourceSignal>,
    snapshot_tx: watch::Sender<BridgeSnapshot>,
    config: RuntimeConfig,
}

impl BridgeRuntime {
    pub fn new(
        state: BridgeState,
        connector: Arc<dyn EventSourceConnector>,
        publisher: Arc<dyn Publisher>,
        config: RuntimeConfig,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(state.snapshot(Utc::now()));

        Self {
            state,
            router: EventRouter::new(publisher),
            connector,
            subscriptions: router::subscriptions().into(),
            signals_tx,
            signals_rx,
            snapshot_tx,
            config,
        }
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn snapshots(&self) -> watch::Receiver<BridgeSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// First connection attempt for every switch
    pub fn start_connections(&mut self, now: DateTime<Utc>) {
        for supervisor in &mut self.state.supervisors {
            supervisor.initiate_connection(
                self.connector.clone(),
                self.subscriptions.clone(),
                self.signals_tx.clone(),
                now,
            );
        }
        self.publish_snapshot(now);
    }

    pub async fn recv_signal(&mut self) -> Option<SourceSignal> {
        self.signals_rx.recv().await
    }

    /// Apply one connection signal. Signals from superseded attempts are
    /// dropped and return `None`.
    pub fn handle_signal(&mut self, signal: SourceSignal, now: DateTime<Utc>) -> Option<DispatchOutcome> {
        let current = self
            .state
            .supervisors
            .get(signal.switch)
            .is_some_and(|s| s.is_current(signal.generation));
        if !current {
            debug!(switch = signal.switch, generation = signal.generation, "Ignoring signal from superseded connection");
            return None;
        }

        let outcome = match signal.kind {
            SignalKind::Ready => {
                let supervisor = &mut self.state.supervisors[signal.switch];
                supervisor.mark_alive_at(now);
                info!(host = %supervisor.host(), generation = signal.generation, "Switch connection ready");
                None
            }
            SignalKind::Event(event) => {
                Some(self.router.dispatch(&mut self.state, signal.switch, &event, now))
            }
            SignalKind::Closed(reason) => {
                let supervisor = &mut self.state.supervisors[signal.switch];
                supervisor.mark_closed(signal.generation);
                warn!(
                    host = %supervisor.host(),
                    generation = signal.generation,
                    reason = reason.as_deref().unwrap_or("closed by server"),
                    "Switch connection closed, waiting for reconnect sweep"
                );
                None
            }
        };

        self.publish_snapshot(now);
        outcome
    }

    /// Reconnect every switch that has been silent for too long. Returns
    /// the number of new attempts.
    pub fn reconnect_sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut attempts = 0;

        for supervisor in &mut self.state.supervisors {
            if supervisor.needs_reconnect_at(now) {
                supervisor.initiate_connection(
                    self.connector.clone(),
                    self.subscriptions.clone(),
                    self.signals_tx.clone(),
                    now,
                );
                attempts += 1;
            }

            let record = supervisor.record();
            info!(
                host = %record.endpoint.host,
                state = ?record.state,
                last_try_connect_at = ?record.last_try_connect_at,
                last_alive_at = ?record.last_alive_at,
                downtime = %supervisor.downtime_summary_at(now),
                current_reconnect_count = record.current_reconnect_count,
                all_reconnect_count = record.all_reconnect_count,
                "Switch status"
            );
        }

        self.publish_snapshot(now);
        attempts
    }

    pub fn maintenance_sweep(&mut self, now: DateTime<Utc>) -> MaintenanceReport {
        let report = self.state.calls.maintain(now);

        let pruned = self.router.publisher().prune_idle();
        if pruned > 0 {
            debug!(pruned, "Pruned idle pub/sub channels");
        }

        self.publish_snapshot(now);
        report
    }

    fn publish_snapshot(&self, now: DateTime<Utc>) {
        self.snapshot_tx.send_replace(self.state.snapshot(now));
    }

    /// Drive the bridge until shutdown, then release every connection
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            switches = self.state.supervisors.len(),
            reconnect_check_secs = self.config.reconnect_check_interval.as_secs(),
            maintenance_secs = self.config.maintenance_interval.as_secs(),
            "Bridge runtime starting"
        );

        self.start_connections(Utc::now());

        let reconnect_every = self.config.reconnect_check_interval;
        let maintain_every = self.config.maintenance_interval;
        let mut reconnect_ticker = interval_at(Instant::now() + reconnect_every, reconnect_every);
        let mut maintenance_ticker = interval_at(Instant::now() + maintain_every, maintain_every);
        reconnect_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        maintenance_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(signal) = self.signals_rx.recv() => {
                    self.handle_signal(signal, Utc::now());
                }
                _ = reconnect_ticker.tick() => {
                    let attempts = self.reconnect_sweep(Utc::now());
                    if attempts > 0 {
                        info!(attempts, "Reconnect sweep started new connections");
                    }
                }
                _ = maintenance_ticker.tick() => {
                    self.maintenance_sweep(Utc::now());
                }
                _ = shutdown.recv() => {
                    info!("Bridge runtime shutting down");
                    break;
                }
            }
        }

        for supervisor in &mut self.state.supervisors {
            supervisor.release();
        }
        info!("All switch connections released");
    }
}
