//! Connection Supervisor
//!
//! One supervisor per upstream switch. It owns the connection record
//! (counters, timestamps, state) and the handle of the task running the
//! current attempt. Reconnects are decided by the periodic sweep through
//! [`ConnectionSupervisor::needs_reconnect_at`]; a closed connection is only
//! marked, never retried immediately.
//!
//! Every attempt gets a new generation number. Signals carrying an older
//! generation come from a superseded task and are ignored by the runtime.

use chrono::{DateTime, Local, NaiveTime, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use esl_common::{ConnectionSnapshot, ConnectionState};
use esl_source::{Endpoint, EventSourceConnector, Subscription};

use crate::connection::{spawn_connection, SourceSignal};
use crate::{BridgeError, Result};

const SECS_PER_HOUR: u32 = 3600;

/// How long a switch may stay silent before a reconnect is due
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same threshold around the clock
    Fixed(Duration),
    /// Shorter threshold strictly inside `(day_start_hour, day_end_hour)` local time
    Daytime {
        day_start_hour: u32,
        day_end_hour: u32,
        day: Duration,
        night: Duration,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Duration::from_secs(5 * 60))
    }
}

impl ReconnectPolicy {
    pub fn daytime(
        day_start_hour: u32,
        day_end_hour: u32,
        day: Duration,
        night: Duration,
    ) -> Result<Self> {
        if day_start_hour >= day_end_hour || day_end_hour > 24 {
            return Err(BridgeError::Config(format!(
                "invalid daytime window {}..{}",
                day_start_hour, day_end_hour
            )));
        }
        Ok(ReconnectPolicy::Daytime {
            day_start_hour,
            day_end_hour,
            day,
            night,
        })
    }

    /// Threshold in effect at the given local time of day
    pub fn threshold(&self, time: NaiveTime) -> Duration {
        match self {
            ReconnectPolicy::Fixed(threshold) => *threshold,
            ReconnectPolicy::Daytime {
                day_start_hour,
                day_end_hour,
                day,
                night,
            } => {
                let secs = time.num_seconds_from_midnight();
                if secs > day_start_hour * SECS_PER_HOUR && secs < day_end_hour * SECS_PER_HOUR {
                    *day
                } else {
                    *night
                }
            }
        }
    }
}

/// Lifecycle counters and timestamps of one upstream connection
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub endpoint: Endpoint,
    pub state: ConnectionState,
    pub last_alive_at: Option<DateTime<Utc>>,
    pub last_try_connect_at: Option<DateTime<Utc>>,
    /// Attempts since the last alive signal
    pub current_reconnect_count: u32,
    /// Lifetime attempts, never reset
    pub all_reconnect_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ConnectionRecord {
    fn new(endpoint: Endpoint, now: DateTime<Utc>) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Disconnected,
            last_alive_at: None,
            last_try_connect_at: None,
            current_reconnect_count: 0,
            all_reconnect_count: 0,
            created_at: now,
        }
    }
}

pub struct ConnectionSupervisor {
    switch: usize,
    record: ConnectionRecord,
    policy: ReconnectPolicy,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    pub fn new(switch: usize, endpoint: Endpoint, policy: ReconnectPolicy) -> Self {
        Self::new_at(switch, endpoint, policy, Utc::now())
    }

    pub fn new_at(
        switch: usize,
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            switch,
            record: ConnectionRecord::new(endpoint, now),
            policy,
            generation: 0,
            task: None,
        }
    }

    pub fn record(&self) -> &ConnectionRecord {
        &self.record
    }

    pub fn host(&self) -> &str {
        &self.record.endpoint.host
    }

    pub fn state(&self) -> ConnectionState {
        self.record.state
    }

    /// Generation of the most recent attempt, 0 before the first one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation != 0 && generation == self.generation
    }

    /// Count a new attempt and release the previous connection.
    /// Returns the generation of the new attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> u64 {
        self.release();

        self.record.all_reconnect_count += 1;
        self.record.current_reconnect_count += 1;
        self.record.last_try_connect_at = Some(now);
        self.record.state = ConnectionState::Connecting;
        self.generation += 1;

        self.generation
    }

    /// Start a new attempt in its own task, replacing the current one
    pub fn initiate_connection(
        &mut self,
        connector: Arc<dyn EventSourceConnector>,
        subscriptions: Arc<[Subscription]>,
        signals: mpsc::UnboundedSender<SourceSignal>,
        now: DateTime<Utc>,
    ) -> u64 {
        let generation = self.begin_attempt(now);

        info!(
            host = %self.record.endpoint.host,
            port = self.record.endpoint.port,
            generation,
            current_reconnect_count = self.record.current_reconnect_count,
            all_reconnect_count = self.record.all_reconnect_count,
            "Connecting to switch"
        );

        self.task = Some(spawn_connection(
            self.switch,
            generation,
            self.record.endpoint.clone(),
            connector,
            subscriptions,
            signals,
        ));

        generation
    }

    /// Abort the running connection task, if any
    pub fn release(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!(host = %self.record.endpoint.host, generation = self.generation, "Releasing previous connection");
            }
            task.abort();
        }
    }

    pub fn mark_alive(&mut self) {
        self.mark_alive_at(Utc::now());
    }

    pub fn mark_alive_at(&mut self, now: DateTime<Utc>) {
        self.record.last_alive_at = Some(now);
        self.record.current_reconnect_count = 0;
        self.record.state = ConnectionState::Connected;
    }

    /// The attempt with this generation ended. Returns false for stale generations.
    pub fn mark_closed(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.record.state = ConnectionState::Disconnected;
        self.task = None;
        true
    }

    pub fn needs_reconnect(&self) -> bool {
        self.needs_reconnect_at(Utc::now())
    }

    pub fn needs_reconnect_at(&self, now: DateTime<Utc>) -> bool {
        let threshold = self.policy.threshold(now.with_timezone(&Local).time());
        self.needs_reconnect_with(now, threshold)
    }

    fn needs_reconnect_with(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let last_activity = match (self.record.last_alive_at, self.record.last_try_connect_at) {
            (Some(alive), Some(tried)) => alive.max(tried),
            (Some(at), None) | (None, Some(at)) => at,
            (None, None) => return true,
        };

        (now - last_activity)
            .to_std()
            .is_ok_and(|elapsed| elapsed > threshold)
    }

    pub fn downtime_summary(&self) -> String {
        self.downtime_summary_at(Utc::now())
    }

    /// Minutes since the switch was last alive, `"0 minutes"` while healthy
    pub fn downtime_summary_at(&self, now: DateTime<Utc>) -> String {
        if self.record.current_reconnect_count == 0 {
            return "0 minutes".to_string();
        }

        let since = self.record.last_alive_at.unwrap_or(self.record.created_at);
        let minutes = (now - since).num_milliseconds() as f64 / 60_000.0;
        format!("{:.2} minutes", minutes)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ConnectionSnapshot {
        ConnectionSnapshot {
            host: self.record.endpoint.host.clone(),
            port: self.record.endpoint.port,
            state: self.record.state,
            last_alive_at: self.record.last_alive_at,
            last_try_connect_at: self.record.last_try_connect_at,
            current_reconnect_count: self.record.current_reconnect_count,
            all_reconnect_count: self.record.all_reconnect_count,
            downtime: self.downtime_summary_at(now),
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.release();
    }
}
