use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub mod logging;

// ============================================================================
// Event Source Types
// ============================================================================

/// A single `name: value` pair as delivered by the event source.
///
/// Events carry their headers as an ordered list; names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Call Types
// ============================================================================

/// Derived state of a call as observed through web-call API events.
///
/// The expected order is `Started -> AgentReady -> CallAgent* -> CallCallee ->
/// CalleeRingBack -> CalleeAnswered -> Hangup`, but nothing enforces it.
/// Sub-events without a known label are carried through verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallState {
    Started,
    AgentReady,
    CallAgentStarted,
    CallAgentSuccess,
    CallAgentFailed,
    CallCallee,
    CalleeRingBack,
    CalleeAnswered,
    Processed,
    Hangup,
    Other(String),
}

impl CallState {
    /// Wire label of the state, as published to subscribers.
    pub fn as_str(&self) -> &str {
        match self {
            CallState::Started => "started",
            CallState::AgentReady => "agentReady",
            CallState::CallAgentStarted => "callAgentStarted",
            CallState::CallAgentSuccess => "callAgentSuccess",
            CallState::CallAgentFailed => "callAgentFailed",
            CallState::CallCallee => "callCallee",
            CallState::CalleeRingBack => "calleeRingBack",
            CallState::CalleeAnswered => "calleeAnswered",
            CallState::Processed => "processed",
            CallState::Hangup => "hangup",
            CallState::Other(raw) => raw,
        }
    }

    /// Parse a wire label. Unknown labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "started" => CallState::Started,
            "agentReady" => CallState::AgentReady,
            "callAgentStarted" => CallState::CallAgentStarted,
            "callAgentSuccess" => CallState::CallAgentSuccess,
            "callAgentFailed" => CallState::CallAgentFailed,
            "callCallee" => CallState::CallCallee,
            "calleeRingBack" => CallState::CalleeRingBack,
            "calleeAnswered" => CallState::CalleeAnswered,
            "processed" => CallState::Processed,
            "hangup" => CallState::Hangup,
            other => CallState::Other(other.to_string()),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, CallState::CalleeAnswered)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CallState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CallState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(CallState::from_label(&label))
    }
}

/// A tracked call, also the payload published on per-agent channels.
///
/// Optional fields are omitted from the JSON form when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_number: Option<String>,
    /// `None` when the `agent_id` header was not numeric
    pub agent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salesman_code: Option<String>,
    pub state: CallState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// True when the record is attributed to a real agent.
    pub fn has_agent(&self) -> bool {
        self.agent_id.is_some_and(|id| id > 0)
    }
}

// ============================================================================
// Connection Health Types
// ============================================================================

/// Lifecycle state of one upstream connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time view of one supervised connection, used for periodic
/// logging and the monitoring API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub host: String,
    pub port: u16,
    pub state: ConnectionState,
    pub last_alive_at: Option<DateTime<Utc>>,
    pub last_try_connect_at: Option<DateTime<Utc>>,
    pub current_reconnect_count: u32,
    pub all_reconnect_count: u64,
    /// Human-readable downtime, e.g. `"3.25 minutes"`
    pub downtime: String,
}

/// Point-in-time view of the whole bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSnapshot {
    pub connections: Vec<ConnectionSnapshot>,
    pub active_calls: usize,
    pub taken_at: DateTime<Utc>,
}

impl BridgeSnapshot {
    pub fn empty() -> Self {
        Self {
            connections: Vec::new(),
            active_calls: 0,
            taken_at: Utc::now(),
        }
    }

    /// True when every supervised connection is up.
    pub fn all_connected(&self) -> bool {
        self.connections
            .iter()
            .all(|c| c.state == ConnectionState::Connected)
    }
}

impl Default for BridgeSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_call_state_labels() {
        for state in [
            CallState::Started,
            CallState::AgentReady,
            CallState::CallAgentFailed,
            CallState::CalleeAnswered,
            CallState::Hangup,
        ] {
            assert_eq!(CallState::from_label(state.as_str()), state);
        }

        assert_eq!(
            CallState::from_label("callaleg"),
            CallState::Other("callaleg".to_string())
        );
    }

    #[test]
    fn test_call_record_json_shape() {
        let record = CallRecord {
            call_id: "abc123".to_string(),
            caller_number: Some("1001".to_string()),
            callee_number: None,
            agent_id: Some(42),
            salesman_code: None,
            state: CallState::Started,
            updated_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["callId"], "abc123");
        assert_eq!(json["callerNumber"], "1001");
        assert_eq!(json["agentId"], 42);
        assert_eq!(json["state"], "started");
        assert_eq!(json["updatedAt"], 1_700_000_000_000i64);
        assert!(json.get("calleeNumber").is_none());
        assert!(json.get("salesmanCode").is_none());
    }

    #[test]
    fn test_unparsed_agent_serializes_as_null() {
        let record = CallRecord {
            call_id: String::new(),
            caller_number: None,
            callee_number: None,
            agent_id: None,
            salesman_code: None,
            state: CallState::Other("custom".to_string()),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["agentId"].is_null());
        assert_eq!(json["state"], "custom");
        assert!(!record.has_agent());
    }

    #[test]
    fn test_snapshot_all_connected() {
        let mut snapshot = BridgeSnapshot::empty();
        assert!(snapshot.all_connected());

        snapshot.connections.push(ConnectionSnapshot {
            host: "10.0.0.1".to_string(),
            port: 8021,
            state: ConnectionState::Connecting,
            last_alive_at: None,
            last_try_connect_at: Some(Utc::now()),
            current_reconnect_count: 1,
            all_reconnect_count: 1,
            downtime: "0.00 minutes".to_string(),
        });
        assert!(!snapshot.all_connected());
    }

    #[test]
    fn test_connection_state_defaults_to_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(
            serde_json::to_value(ConnectionState::default()).unwrap(),
            "DISCONNECTED"
        );
    }
}
