//! Vendor payload normalization.
//!
//! Provider SDKs deliver participant events as bare ids, single objects,
//! arrays, or objects nested inside `users`/`participants`/`data` containers
//! (and `user`/`participant`/`userInfo` wrappers), and the shape changes
//! between SDK versions. [`normalize`] walks a `serde_json::Value` with a
//! bounded number of keyed descents and returns canonical records. It never
//! fails: unrecognized input produces an empty vector, a debug log line and
//! the `cc_payload_unrecognized_total` counter.

use crate::observability::metrics::record_payload_unrecognized;
use crate::types::{ConnectionQuality, ParticipantRole};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Maximum number of keyed descents into a payload.
pub const MAX_PAYLOAD_DEPTH: usize = 3;

const CONTAINER_KEYS: [&str; 3] = ["users", "participants", "data"];
const WRAPPER_KEYS: [&str; 3] = ["user", "participant", "userInfo"];
const ID_KEYS: [&str; 6] = ["userId", "user_id", "participantId", "participant_id", "uid", "id"];
const NAME_KEYS: [&str; 4] = ["displayName", "display_name", "userName", "name"];

/// One participant reference extracted from a vendor payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalRecord {
    /// Provider participant id (numeric ids are stringified).
    pub participant_id: String,
    /// Display name, when the payload carries one.
    pub display_name: Option<String>,
    /// Role hint (`role` or `isHost`).
    pub role: Option<ParticipantRole>,
    /// Video flag hint.
    pub video_on: Option<bool>,
    /// Audio flag hint.
    pub audio_on: Option<bool>,
    /// Connection quality hint.
    pub connection_quality: Option<ConnectionQuality>,
}

impl CanonicalRecord {
    /// Record with only an id.
    #[must_use]
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// Normalize a vendor payload into canonical records, de-duplicated by id
/// (first occurrence wins).
pub fn normalize(payload: &Value) -> Vec<CanonicalRecord> {
    let mut records = Vec::new();
    collect(payload, 0, true, &mut records);

    let mut seen = HashSet::new();
    records.retain(|record| seen.insert(record.participant_id.clone()));

    if records.is_empty() && !payload.is_null() {
        debug!(
            target: "cc.normalizer",
            payload_kind = value_kind(payload),
            "Payload carried no participant records"
        );
        record_payload_unrecognized(value_kind(payload));
    }

    records
}

fn collect(value: &Value, depth: usize, allow_array: bool, out: &mut Vec<CanonicalRecord>) {
    match value {
        Value::Array(items) if allow_array => {
            // Nested arrays are not flattened; that keeps the walk bounded.
            for item in items {
                collect(item, depth, false, out);
            }
        }
        Value::Object(map) => collect_object(map, depth, out),
        Value::String(_) | Value::Number(_) => {
            if let Some(id) = scalar_id(value) {
                out.push(CanonicalRecord::new(id));
            }
        }
        _ => {}
    }
}

fn collect_object(map: &Map<String, Value>, depth: usize, out: &mut Vec<CanonicalRecord>) {
    if let Some(id) = ID_KEYS.iter().find_map(|key| map.get(*key).and_then(scalar_id)) {
        let mut record = record_from_object(id, map);
        // Some SDK versions put the name on a wrapper next to the id.
        if record.display_name.is_none() {
            record.display_name = WRAPPER_KEYS
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_object))
                .find_map(display_name);
        }
        out.push(record);
        return;
    }

    if depth >= MAX_PAYLOAD_DEPTH {
        return;
    }

    for key in WRAPPER_KEYS {
        if let Some(nested @ Value::Object(_)) = map.get(key) {
            collect(nested, depth + 1, false, out);
            return;
        }
    }

    for key in CONTAINER_KEYS {
        if let Some(nested) = map.get(key) {
            collect(nested, depth + 1, true, out);
        }
    }
}

fn record_from_object(id: String, map: &Map<String, Value>) -> CanonicalRecord {
    CanonicalRecord {
        participant_id: id,
        display_name: display_name(map),
        role: role_hint(map),
        video_on: bool_field(map, &["videoOn", "bVideoOn", "isVideoOn", "video"]),
        audio_on: bool_field(map, &["audioOn", "isAudioOn", "audio"])
            .or_else(|| bool_field(map, &["muted", "isMuted"]).map(|muted| !muted)),
        connection_quality: quality_hint(map),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn display_name(map: &Map<String, Value>) -> Option<String> {
    NAME_KEYS
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(ToString::to_string)
}

fn bool_field(map: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_bool))
}

fn role_hint(map: &Map<String, Value>) -> Option<ParticipantRole> {
    if let Some(role) = map.get("role").and_then(Value::as_str) {
        return match role.to_ascii_lowercase().as_str() {
            "coach" | "host" | "instructor" => Some(ParticipantRole::Coach),
            "student" | "attendee" | "participant" => Some(ParticipantRole::Student),
            _ => None,
        };
    }
    bool_field(map, &["isHost", "is_host"]).map(|is_host| {
        if is_host {
            ParticipantRole::Coach
        } else {
            ParticipantRole::Student
        }
    })
}

fn quality_hint(map: &Map<String, Value>) -> Option<ConnectionQuality> {
    let value = map.get("quality").or_else(|| map.get("level"))?;
    match value {
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "good" | "excellent" | "high" => Some(ConnectionQuality::Good),
            "fair" | "normal" | "medium" => Some(ConnectionQuality::Fair),
            "poor" | "bad" | "low" => Some(ConnectionQuality::Poor),
            _ => Some(ConnectionQuality::Unknown),
        },
        // Vendor numeric scale: 0 (unknown) .. 5 (excellent).
        Value::Number(n) => match n.as_u64() {
            Some(4..) => Some(ConnectionQuality::Good),
            Some(2..=3) => Some(ConnectionQuality::Fair),
            Some(1) => Some(ConnectionQuality::Poor),
            _ => Some(ConnectionQuality::Unknown),
        },
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_users_container_with_numeric_id() {
        let records = normalize(&json!({"users": [{"userId": 7, "displayName": "X"}]}));
        assert_eq!(records, vec![CanonicalRecord::new("7").with_display_name("X")]);
    }

    #[test]
    fn test_empty_object_and_null_yield_nothing() {
        assert!(normalize(&json!({})).is_empty());
        assert!(normalize(&Value::Null).is_empty());
        assert!(normalize(&json!(true)).is_empty());
        assert!(normalize(&json!("   ")).is_empty());
    }

    #[test]
    fn test_single_object_and_bare_ids() {
        let records = normalize(&json!({"participantId": "p-1", "name": "Alice"}));
        assert_eq!(records, vec![CanonicalRecord::new("p-1").with_display_name("Alice")]);

        let records = normalize(&json!([101, "102"]));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].participant_id, "101");
        assert_eq!(records[1].participant_id, "102");
    }

    #[test]
    fn test_wrapper_and_nested_containers() {
        let payload = json!({
            "data": {
                "participants": [
                    {"user": {"uid": 1, "userName": "Coach Bob", "isHost": true}},
                    {"user": {"uid": 2, "userName": "Alice"}}
                ]
            }
        });
        let records = normalize(&payload);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].participant_id, "1");
        assert_eq!(records[0].display_name.as_deref(), Some("Coach Bob"));
        assert_eq!(records[0].role, Some(ParticipantRole::Coach));
        assert_eq!(records[1].display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_name_on_wrapper_next_to_id() {
        let records = normalize(&json!({"userId": 9, "userInfo": {"displayName": "Nina"}}));
        assert_eq!(records, vec![CanonicalRecord::new("9").with_display_name("Nina")]);
    }

    #[test]
    fn test_depth_is_bounded() {
        // Four keyed descents before the record: beyond MAX_PAYLOAD_DEPTH.
        let payload = json!({"data": {"data": {"data": {"user": {"userId": 1}}}}});
        assert!(normalize(&payload).is_empty());

        // Three descents are fine.
        let payload = json!({"data": {"data": {"user": {"userId": 1}}}});
        assert_eq!(normalize(&payload).len(), 1);
    }

    #[test]
    fn test_nested_arrays_are_not_flattened() {
        assert!(normalize(&json!([[1, 2], [3]])).is_empty());
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let payload = json!([
            {"userId": 5, "displayName": "First"},
            {"userId": "5", "displayName": "Second"}
        ]);
        let records = normalize(&payload);
        assert_eq!(records, vec![CanonicalRecord::new("5").with_display_name("First")]);
    }

    #[test]
    fn test_media_and_quality_hints() {
        let records = normalize(&json!({
            "userId": 3,
            "bVideoOn": true,
            "muted": true,
            "quality": 1
        }));
        assert_eq!(records[0].video_on, Some(true));
        assert_eq!(records[0].audio_on, Some(false));
        assert_eq!(records[0].connection_quality, Some(ConnectionQuality::Poor));

        let records = normalize(&json!({"userId": 4, "level": "good", "role": "student"}));
        assert_eq!(records[0].connection_quality, Some(ConnectionQuality::Good));
        assert_eq!(records[0].role, Some(ParticipantRole::Student));
    }
}
