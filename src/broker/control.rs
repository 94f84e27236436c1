//! Subscriber -> broker control messages.
//!
//! ```text
//! subscribe:[{"measurement":"environment","tags":["clientId=A"]}]
//! subscribe:false
//! ```
//!
//! A JSON array replaces the connection's filters; a falsy JSON value
//! (`false`, `null`, `0`, `""`) unsubscribes. Anything else is rejected.

use crate::broker::filter::SubscriptionFilter;
use crate::core::{PulseError, Result};
use serde_json::Value;

/// Prefix of every accepted control message
pub const SUBSCRIBE_PREFIX: &str = "subscribe:";

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Replace the active filters
    Subscribe(Vec<SubscriptionFilter>),
    /// Clear the active filters
    Unsubscribe,
}

impl ControlMessage {
    /// Parse a control message; no partial result on any invalid filter.
    pub fn parse(payload: &str) -> Result<Self> {
        let body = payload
            .strip_prefix(SUBSCRIBE_PREFIX)
            .ok_or_else(|| PulseError::subscription(format!("unknown message: {}", payload)))?;

        let value: Value = serde_json::from_str(body.trim())
            .map_err(|e| PulseError::subscription(format!("unparseable subscribe message: {}", e)))?;

        if is_falsy(&value) {
            return Ok(ControlMessage::Unsubscribe);
        }

        match value {
            Value::Array(items) => items
                .iter()
                .map(SubscriptionFilter::from_json)
                .collect::<Result<Vec<_>>>()
                .map(ControlMessage::Subscribe),
            other => Err(PulseError::subscription(format!(
                "subscription must be a JSON array, got {}",
                other
            ))),
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let message = ControlMessage::parse(
            r#"subscribe:[{"measurement":"environment","tags":["clientId=A"]}]"#,
        )
        .unwrap();
        match message {
            ControlMessage::Subscribe(filters) => {
                assert_eq!(filters.len(), 1);
                assert_eq!(filters[0].measurement(), "environment");
                assert!(filters[0].tags().contains("clientId=A"));
            },
            other => panic!("Expected subscribe, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_falsy_unsubscribes() {
        for payload in ["subscribe:false", "subscribe:null", "subscribe:0", "subscribe:\"\""] {
            assert_eq!(ControlMessage::parse(payload).unwrap(), ControlMessage::Unsubscribe);
        }
    }

    #[test]
    fn test_empty_array_subscribes_to_nothing() {
        assert_eq!(ControlMessage::parse("subscribe:[]").unwrap(), ControlMessage::Subscribe(vec![]));
    }

    #[test]
    fn test_rejections() {
        for payload in [
            "hello",
            "subscribe:",
            "subscribe:{not json",
            "subscribe:true",
            r#"subscribe:{"measurement":"environment","tags":[]}"#,
            r#"subscribe:[{"measurement":"environment","tags":[]},{"measurement":""}]"#,
        ] {
            assert!(ControlMessage::parse(payload).is_err(), "accepted {}", payload);
        }
    }
}
