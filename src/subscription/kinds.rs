//! Subscription kinds, their payloads and resume cursors.
//!
//! | kind         | cursor            | resume params                          |
//! |--------------|-------------------|----------------------------------------|
//! | `tickStream` | tick              | `startTick = tick + 1`                 |
//! | `newTicks`   | none              | original params                        |
//! | `transfers`  | (logId, epoch)    | `startLogId = logId + 1`, `startEpoch` |
//! | `logs`       | (logId, epoch)    | `startLogId = logId + 1`, `startEpoch` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-side subscription type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    TickStream,
    NewTicks,
    Transfers,
    Logs,
}

impl SubscriptionKind {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::TickStream => "tickStream",
            SubscriptionKind::NewTicks => "newTicks",
            SubscriptionKind::Transfers => "transfers",
            SubscriptionKind::Logs => "logs",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last delivered position of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Tick(u64),
    Log { log_id: u64, epoch: u32 },
}

impl Cursor {
    /// True if `self` lies strictly after `other`.
    fn is_after(&self, other: &Cursor) -> bool {
        match (self, other) {
            (Cursor::Tick(a), Cursor::Tick(b)) => a > b,
            (
                Cursor::Log { log_id: a, epoch: ea },
                Cursor::Log { log_id: b, epoch: eb },
            ) => (ea, a) > (eb, b),
            _ => true,
        }
    }

    /// Move `current` forward to `next`; never moves backwards.
    pub fn advance(current: &mut Option<Cursor>, next: Cursor) {
        match current {
            Some(c) if !next.is_after(c) => {}
            _ => *current = Some(next),
        }
    }
}

/// Params for a (re)subscribe that resume strictly after `cursor`.
pub fn resume_params(kind: SubscriptionKind, original: &Value, cursor: Option<Cursor>) -> Value {
    let mut params = original.clone();

    let overrides: Vec<(&str, Value)> = match (kind, cursor) {
        (SubscriptionKind::TickStream, Some(Cursor::Tick(tick))) => {
            vec![("startTick", Value::from(tick.saturating_add(1)))]
        }
        (SubscriptionKind::Transfers | SubscriptionKind::Logs, Some(Cursor::Log { log_id, epoch })) => vec![
            ("startLogId", Value::from(log_id.saturating_add(1))),
            ("startEpoch", Value::from(epoch)),
        ],
        _ => return params,
    };

    if !params.is_object() {
        params = Value::Object(Map::new());
    }
    if let Some(map) = params.as_object_mut() {
        for (key, value) in overrides {
            map.insert(key.to_string(), value);
        }
    }
    params
}

/// A typed subscription payload.
pub trait Notification: Sized + Send + 'static {
    fn decode(value: Value) -> serde_json::Result<Self>;

    /// Position this item advances the subscription to, if any.
    fn cursor(&self) -> Option<Cursor>;
}

/// One `tickStream` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickEvent {
    pub tick: u64,
    #[serde(default)]
    pub epoch: Option<u32>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Notification for TickEvent {
    fn decode(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    fn cursor(&self) -> Option<Cursor> {
        Some(Cursor::Tick(self.tick))
    }
}

/// One `newTicks` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTick {
    #[serde(default)]
    pub tick: Option<u64>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Notification for NewTick {
    fn decode(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    fn cursor(&self) -> Option<Cursor> {
        None
    }
}

/// One contract log or transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub log_id: u64,
    pub epoch: u32,
    #[serde(default)]
    pub tick: Option<u64>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Item of a `transfers` or `logs` subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogStreamItem {
    Log(LogEvent),
    /// Historical replay finished; live items follow. Carries no cursor.
    CatchUpComplete(Value),
}

impl Notification for LogStreamItem {
    fn decode(value: Value) -> serde_json::Result<Self> {
        if value.get("catchUpComplete").and_then(Value::as_bool) == Some(true) {
            return Ok(LogStreamItem::CatchUpComplete(value));
        }
        serde_json::from_value(value).map(LogStreamItem::Log)
    }

    fn cursor(&self) -> Option<Cursor> {
        match self {
            LogStreamItem::Log(log) => Some(Cursor::Log {
                log_id: log.log_id,
                epoch: log.epoch,
            }),
            LogStreamItem::CatchUpComplete(_) => None,
        }
    }
}

impl Notification for Value {
    fn decode(value: Value) -> serde_json::Result<Self> {
        Ok(value)
    }

    fn cursor(&self) -> Option<Cursor> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tick_resume() {
        let original = json!({"includeTransactions": true});
        let params = resume_params(SubscriptionKind::TickStream, &original, Some(Cursor::Tick(100)));
        assert_eq!(params, json!({"includeTransactions": true, "startTick": 101}));

        // No cursor yet: original params untouched.
        assert_eq!(resume_params(SubscriptionKind::TickStream, &original, None), original);
    }

    #[test]
    fn test_log_resume() {
        let original = json!({"contractIndex": 1, "startLogId": 0});
        let params = resume_params(
            SubscriptionKind::Logs,
            &original,
            Some(Cursor::Log { log_id: 77, epoch: 150 }),
        );
        assert_eq!(params, json!({"contractIndex": 1, "startLogId": 78, "startEpoch": 150}));
    }

    #[test]
    fn test_new_ticks_is_stateless() {
        let params = resume_params(SubscriptionKind::NewTicks, &Value::Null, Some(Cursor::Tick(5)));
        assert_eq!(params, Value::Null);
    }

    #[test]
    fn test_resume_on_null_params() {
        let params = resume_params(SubscriptionKind::TickStream, &Value::Null, Some(Cursor::Tick(9)));
        assert_eq!(params, json!({"startTick": 10}));
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let mut cursor = None;
        for tick in [5, 9, 7, 9, 12] {
            Cursor::advance(&mut cursor, Cursor::Tick(tick));
        }
        assert_eq!(cursor, Some(Cursor::Tick(12)));

        let mut cursor = None;
        Cursor::advance(&mut cursor, Cursor::Log { log_id: 900, epoch: 150 });
        Cursor::advance(&mut cursor, Cursor::Log { log_id: 3, epoch: 151 });
        Cursor::advance(&mut cursor, Cursor::Log { log_id: 950, epoch: 150 });
        assert_eq!(cursor, Some(Cursor::Log { log_id: 3, epoch: 151 }));
    }

    #[test]
    fn test_resume_always_after_highest_delivered() {
        let deliveries = [3u64, 10, 4, 10, 11, 2];
        let mut cursor = None;
        let mut highest = 0;
        for tick in deliveries {
            Cursor::advance(&mut cursor, Cursor::Tick(tick));
            highest = highest.max(tick);
            let params = resume_params(SubscriptionKind::TickStream, &json!({}), cursor);
            assert!(params["startTick"].as_u64().unwrap() > highest);
        }
    }

    #[test]
    fn test_catch_up_sentinel() {
        let item = LogStreamItem::decode(json!({"catchUpComplete": true, "epoch": 150})).unwrap();
        assert!(matches!(item, LogStreamItem::CatchUpComplete(_)));
        assert_eq!(item.cursor(), None);

        let item = LogStreamItem::decode(json!({"logId": 12, "epoch": 150, "amount": "5"})).unwrap();
        assert_eq!(item.cursor(), Some(Cursor::Log { log_id: 12, epoch: 150 }));
        match item {
            LogStreamItem::Log(log) => assert_eq!(log.data["amount"], "5"),
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn test_tick_event_decode() {
        let event = TickEvent::decode(json!({"tick": 21000001, "epoch": 150, "txCount": 3})).unwrap();
        assert_eq!(event.tick, 21_000_001);
        assert_eq!(event.data["txCount"], 3);
        assert!(TickEvent::decode(json!({"epoch": 1})).is_err());
    }
}
