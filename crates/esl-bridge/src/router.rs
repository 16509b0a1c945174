//! Event Router
//!
//! Every connection subscribes to the same fixed set of events. The router
//! classifies each event, updates the supervisor (heartbeats) or the call
//! store (web-call and hangup events) and forwards derived messages to the
//! publisher.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use esl_common::{CallRecord, CallState};
use esl_source::{RawEvent, Subscription};

use crate::headers::{normalize, EventHeaders};
use crate::publish::{agent_channel, agents_channel, Publisher};
use crate::runtime::BridgeState;

pub const QUEUE_INFO_SUBCLASS: &str = "acdqueue::info";
pub const WEB_CALL_PREFIX: &str = "webcallapi::";
pub const WEB_CALL_EVENTS: [&str; 7] = [
    "api_begin",
    "checkagent",
    "callaleg",
    "callbleg",
    "callbleg_ringback",
    "callbleg_answer",
    "api_end",
];
pub const HEARTBEAT_EVENT: &str = "HEARTBEAT";
pub const HANGUP_EVENT: &str = "CHANNEL_HANGUP";

/// Queue actions forwarded to agent group channels
pub const AGENT_ACTIONS: [&str; 3] = [
    "agent-status-change",
    "agent-state-change",
    "agent-sign-change",
];

const CUSTOM_EVENT: &str = "CUSTOM";
const API_BEGIN: &str = "api_begin";
const CALLBLEG_ANSWER: &str = "callbleg_answer";
const CALLALEG: &str = "callaleg";

/// Subscriptions registered on every connection
pub fn subscriptions() -> Vec<Subscription> {
    let mut subs = vec![Subscription::custom(QUEUE_INFO_SUBCLASS)];
    subs.extend(
        WEB_CALL_EVENTS
            .iter()
            .map(|name| Subscription::custom(format!("{}{}", WEB_CALL_PREFIX, name))),
    );
    subs.push(Subscription::plain(HEARTBEAT_EVENT));
    subs.push(Subscription::plain(HANGUP_EVENT));
    subs
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCategory {
    QueueInfo,
    /// Web-call sub-event, the subclass without its `webcallapi::` prefix
    WebCall(String),
    Heartbeat,
    Hangup,
    Other,
}

pub fn classify(event: &RawEvent) -> EventCategory {
    match event.event_name() {
        Some(CUSTOM_EVENT) => match event.subclass() {
            Some(QUEUE_INFO_SUBCLASS) => EventCategory::QueueInfo,
            Some(subclass) => match subclass.strip_prefix(WEB_CALL_PREFIX) {
                Some(sub_event) => EventCategory::WebCall(sub_event.to_string()),
                None => EventCategory::Other,
            },
            None => EventCategory::Other,
        },
        Some(HEARTBEAT_EVENT) => EventCategory::Heartbeat,
        Some(HANGUP_EVENT) => EventCategory::Hangup,
        _ => EventCategory::Other,
    }
}

/// State label for a web-call sub-event
pub fn api_agent_state(sub_event: &str, result: Option<&str>) -> CallState {
    if sub_event == CALLALEG {
        return match result {
            Some("start") => CallState::CallAgentStarted,
            Some("success") => CallState::CallAgentSuccess,
            Some("fail") => CallState::CallAgentFailed,
            _ => CallState::Other(sub_event.to_string()),
        };
    }

    match sub_event {
        "api_begin" => CallState::Started,
        "checkagent" => CallState::AgentReady,
        "callbleg" => CallState::CallCallee,
        "callbleg_ringback" => CallState::CalleeRingBack,
        "callbleg_answer" => CallState::CalleeAnswered,
        "api_end" => CallState::Processed,
        other => CallState::Other(other.to_string()),
    }
}

/// Derived call message for a web-call event. `salesman_code` of `"null"`
/// counts as absent; a non-numeric `agent_id` leaves `agent_id` empty.
pub fn web_call_message(sub_event: &str, headers: &EventHeaders, now: DateTime<Utc>) -> CallRecord {
    CallRecord {
        call_id: headers.get("callid").unwrap_or_default().to_string(),
        caller_number: headers.get("caller_number").map(str::to_string),
        callee_number: headers.get("callee_number").map(str::to_string),
        agent_id: headers.get("agent_id").and_then(|id| id.trim().parse().ok()),
        salesman_code: headers
            .get("salesman_code")
            .filter(|code| *code != "null")
            .map(str::to_string),
        state: api_agent_state(sub_event, headers.get("result")),
        updated_at: now,
    }
}

/// What a dispatch did, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    AgentsPublished { channel: String },
    WebCallPublished { channel: String, state: CallState },
    HeartbeatRecorded,
    /// Call removed and published in the hangup state
    HangupPublished { channel: String },
    /// Call removed, no agent to notify
    HangupRemoved,
    /// No call for the hangup's other leg
    HangupUnmatched,
    Ignored(&'static str),
}

pub struct EventRouter {
    publisher: Arc<dyn Publisher>,
}

impl EventRouter {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    pub fn dispatch(
        &self,
        state: &mut BridgeState,
        switch: usize,
        event: &RawEvent,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let outcome = match classify(event) {
            EventCategory::QueueInfo => self.on_queue_info(event),
            EventCategory::WebCall(sub_event) => self.on_web_call(state, &sub_event, event, now),
            EventCategory::Heartbeat => self.on_heartbeat(state, switch, now),
            EventCategory::Hangup => self.on_hangup(state, event, now),
            EventCategory::Other => DispatchOutcome::Ignored("unsubscribed event"),
        };

        debug!(switch, event = ?event.event_name(), subclass = ?event.subclass(), outcome = ?outcome, "Dispatched event");
        outcome
    }

    fn on_queue_info(&self, event: &RawEvent) -> DispatchOutcome {
        let headers = normalize(&event.headers);

        let tracked = headers
            .get("AQ-Action")
            .is_some_and(|action| AGENT_ACTIONS.contains(&action));
        if !tracked {
            return DispatchOutcome::Ignored("queue action not tracked");
        }

        let Some(agent) = headers.get("AQ-Agent") else {
            warn!(action = ?headers.get("AQ-Action"), "Queue info event without AQ-Agent");
            return DispatchOutcome::Ignored("missing AQ-Agent");
        };

        let channel = agents_channel(agent);
        if self.publish_json(&channel, &headers) {
            DispatchOutcome::AgentsPublished { channel }
        } else {
            DispatchOutcome::Ignored("unserializable payload")
        }
    }

    fn on_web_call(
        &self,
        state: &mut BridgeState,
        sub_event: &str,
        event: &RawEvent,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let headers = normalize(&event.headers);

        let Some(agent_id) = headers.get_non_empty("agent_id") else {
            return DispatchOutcome::Ignored("missing agent_id");
        };

        let message = web_call_message(sub_event, &headers, now);

        match (sub_event, headers.get("callid")) {
            (API_BEGIN, Some(call_id)) => {
                state.calls.begin(call_id, message.clone());
            }
            (CALLBLEG_ANSWER, Some(call_id)) => {
                state.calls.mark_answered(call_id, now);
            }
            _ => {}
        }

        let channel = agent_channel(agent_id);
        if self.publish_json(&channel, &message) {
            DispatchOutcome::WebCallPublished {
                channel,
                state: message.state,
            }
        } else {
            DispatchOutcome::Ignored("unserializable payload")
        }
    }

    fn on_heartbeat(&self, state: &mut BridgeState, switch: usize, now: DateTime<Utc>) -> DispatchOutcome {
        let Some(supervisor) = state.supervisors.get_mut(switch) else {
            return DispatchOutcome::Ignored("unknown switch");
        };

        supervisor.mark_alive_at(now);
        info!(host = %supervisor.host(), "Heartbeat received");
        DispatchOutcome::HeartbeatRecorded
    }

    fn on_hangup(&self, state: &mut BridgeState, event: &RawEvent, now: DateTime<Utc>) -> DispatchOutcome {
        let headers = normalize(&event.headers);

        let Some(other_leg) = headers.get("Other-Leg-Unique-ID") else {
            return DispatchOutcome::HangupUnmatched;
        };
        let Some(call) = state.calls.mark_hangup(other_leg, now) else {
            return DispatchOutcome::HangupUnmatched;
        };

        let Some(agent_id) = call.agent_id.filter(|_| call.has_agent()) else {
            return DispatchOutcome::HangupRemoved;
        };

        let channel = agent_channel(&agent_id.to_string());
        if self.publish_json(&channel, &call) {
            DispatchOutcome::HangupPublished { channel }
        } else {
            DispatchOutcome::HangupRemoved
        }
    }

    fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.publisher.publish(channel, value);
                true
            }
            Err(e) => {
                warn!(channel, error = %e, "Failed to serialize message");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_call(sub_event: &str, pairs: &[(&str, &str)]) -> RawEvent {
        let subclass = format!("{}{}", WEB_CALL_PREFIX, sub_event);
        let mut all = vec![("Event-Name", "CUSTOM"), ("Event-Subclass", subclass.as_str())];
        all.extend_from_slice(pairs);
        RawEvent::from_pairs(all)
    }

    #[test]
    fn test_subscription_set() {
        let commands: Vec<String> = subscriptions().iter().map(|s| s.command()).collect();
        assert_eq!(commands.len(), 10);
        assert_eq!(commands[0], "event plain CUSTOM acdqueue::info");
        assert!(commands.contains(&"event plain CUSTOM webcallapi::callbleg_ringback".to_string()));
        assert_eq!(commands[8], "event plain HEARTBEAT");
        assert_eq!(commands[9], "event plain CHANNEL_HANGUP");
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&RawEvent::from_pairs([("Event-Name", "CUSTOM"), ("Event-Subclass", "acdqueue::info")])),
            EventCategory::QueueInfo
        );
        assert_eq!(
            classify(&web_call("callaleg", &[])),
            EventCategory::WebCall("callaleg".to_string())
        );
        assert_eq!(
            classify(&RawEvent::from_pairs([("Event-Name", "HEARTBEAT")])),
            EventCategory::Heartbeat
        );
        assert_eq!(
            classify(&RawEvent::from_pairs([("Event-Name", "CHANNEL_HANGUP")])),
            EventCategory::Hangup
        );
        assert_eq!(
            classify(&RawEvent::from_pairs([("Event-Name", "CUSTOM"), ("Event-Subclass", "sofia::register")])),
            EventCategory::Other
        );
        assert_eq!(classify(&RawEvent::default()), EventCategory::Other);
    }

    #[test]
    fn test_api_agent_state() {
        assert_eq!(api_agent_state("callaleg", Some("start")), CallState::CallAgentStarted);
        assert_eq!(api_agent_state("callaleg", Some("success")), CallState::CallAgentSuccess);
        assert_eq!(api_agent_state("callaleg", Some("fail")), CallState::CallAgentFailed);
        assert_eq!(
            api_agent_state("callaleg", Some("busy")),
            CallState::Other("callaleg".to_string())
        );
        assert_eq!(api_agent_state("callaleg", None), CallState::Other("callaleg".to_string()));

        assert_eq!(api_agent_state("api_begin", None), CallState::Started);
        assert_eq!(api_agent_state("checkagent", None), CallState::AgentReady);
        assert_eq!(api_agent_state("callbleg", Some("start")), CallState::CallCallee);
        assert_eq!(api_agent_state("callbleg_ringback", None), CallState::CalleeRingBack);
        assert_eq!(api_agent_state("callbleg_answer", None), CallState::CalleeAnswered);
        assert_eq!(api_agent_state("api_end", None), CallState::Processed);
        assert_eq!(
            api_agent_state("api_retry", None),
            CallState::Other("api_retry".to_string())
        );
    }

    #[test]
    fn test_web_call_message() {
        let now = Utc::now();
        let headers = normalize(&web_call(
            "api_begin",
            &[
                ("callid", "abc123"),
                ("caller_number", "1001"),
                ("agent_id", "42"),
                ("salesman_code", "null"),
            ],
        )
        .headers);

        let message = web_call_message("api_begin", &headers, now);
        assert_eq!(message.call_id, "abc123");
        assert_eq!(message.caller_number.as_deref(), Some("1001"));
        assert_eq!(message.callee_number, None);
        assert_eq!(message.agent_id, Some(42));
        assert_eq!(message.salesman_code, None);
        assert_eq!(message.state, CallState::Started);
        assert_eq!(message.updated_at, now);
    }

    #[test]
    fn test_web_call_message_non_numeric_agent() {
        let headers = normalize(&web_call("checkagent", &[("agent_id", "A-7"), ("salesman_code", "S01")]).headers);
        let message = web_call_message("checkagent", &headers, Utc::now());
        assert_eq!(message.agent_id, None);
        assert_eq!(message.salesman_code.as_deref(), Some("S01"));
    }
}
