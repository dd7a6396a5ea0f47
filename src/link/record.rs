//! Notification records
//!
//! Normalizes inbound payloads into [`NotificationRecord`]s and keeps the
//! bounded, most-recent-first list the UI reads from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

use super::error::{LinkError, LinkResult};

/// Title used when a payload carries none
pub const DEFAULT_TITLE: &str = "Notification";

/// Kind used when a payload carries none
pub const DEFAULT_KIND: &str = "info";

const ID_KEYS: &[&str] = &["id"];
const TITLE_KEYS: &[&str] = &["title", "titulo"];
const MESSAGE_KEYS: &[&str] = &["message", "mensaje"];
const KIND_KEYS: &[&str] = &["type", "kind", "tipo"];
const PRIORITY_KEYS: &[&str] = &["priority", "prioridad"];

/// Lifecycle step of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentEvent {
    Created,
    Assigned,
    Updated,
    Resolved,
    Closed,
}

/// Display category derived from a record's raw kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// Incident traffic; `None` when the step is not named
    Incident(Option<IncidentEvent>),
    Success,
    Error,
    Warning,
    Info,
    Other(String),
}

impl NotificationKind {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "INCIDENCIA_NUEVA" | "INCIDENT_CREATED" | "INCIDENT_NEW" => {
                NotificationKind::Incident(Some(IncidentEvent::Created))
            }
            "INCIDENCIA_ASIGNADA" | "INCIDENT_ASSIGNED" => {
                NotificationKind::Incident(Some(IncidentEvent::Assigned))
            }
            "INCIDENCIA_ACTUALIZADA" | "INCIDENT_UPDATED" => {
                NotificationKind::Incident(Some(IncidentEvent::Updated))
            }
            "INCIDENCIA_RESUELTA" | "INCIDENT_RESOLVED" => {
                NotificationKind::Incident(Some(IncidentEvent::Resolved))
            }
            "INCIDENCIA_CERRADA" | "INCIDENT_CLOSED" => {
                NotificationKind::Incident(Some(IncidentEvent::Closed))
            }
            "INCIDENT" | "INCIDENCIA" => NotificationKind::Incident(None),
            "SUCCESS" => NotificationKind::Success,
            "ERROR" => NotificationKind::Error,
            "WARNING" => NotificationKind::Warning,
            "INFO" => NotificationKind::Info,
            _ => NotificationKind::Other(raw.to_string()),
        }
    }

    pub fn is_incident(&self) -> bool {
        matches!(self, NotificationKind::Incident(_))
    }
}

/// A notification as retained by the link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub title: String,
    pub message: String,
    /// Raw kind as sent by the server
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    /// Fields the link does not interpret, preserved as received
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotificationRecord {
    /// Parse an inbound text frame
    ///
    /// `fallback_id` is used when the payload has no usable `id`.
    pub fn parse(
        payload: &str,
        fallback_id: impl FnOnce() -> String,
        received_at: DateTime<Utc>,
    ) -> LinkResult<Self> {
        match serde_json::from_str::<Value>(payload)? {
            Value::Object(fields) => Ok(Self::from_fields(fields, fallback_id, received_at)),
            other => Err(LinkError::MalformedMessage(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    fn from_fields(
        mut fields: Map<String, Value>,
        fallback_id: impl FnOnce() -> String,
        received_at: DateTime<Utc>,
    ) -> Self {
        let id = take_text(&mut fields, ID_KEYS).unwrap_or_else(fallback_id);
        let title = take_text(&mut fields, TITLE_KEYS).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let message = take_text(&mut fields, MESSAGE_KEYS).unwrap_or_default();
        let kind = take_text(&mut fields, KIND_KEYS).unwrap_or_else(|| DEFAULT_KIND.to_string());
        let priority = take_text(&mut fields, PRIORITY_KEYS);

        // Stale client-side keys must not shadow ours when re-serialized
        fields.remove("read");
        fields.remove("received_at");

        Self {
            id,
            title,
            message,
            kind,
            priority,
            received_at,
            read: false,
            extra: fields,
        }
    }

    pub fn category(&self) -> NotificationKind {
        NotificationKind::parse(&self.kind)
    }
}

/// Remove the first usable text value among `keys`
///
/// Strings are taken as-is, numbers and booleans are stringified. Empty
/// strings and other JSON types count as absent; all listed keys are
/// removed either way.
fn take_text(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    let mut found = None;
    for key in keys {
        let value = match fields.remove(*key) {
            Some(value) => value,
            None => continue,
        };
        if found.is_some() {
            continue;
        }
        found = match value {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        };
    }
    found
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Bounded most-recent-first list of records
#[derive(Debug, Clone)]
pub struct RecordLog {
    entries: VecDeque<NotificationRecord>,
    capacity: usize,
}

impl RecordLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend a record, evicting the oldest entries past capacity
    ///
    /// Returns the number of evicted records.
    pub fn push(&mut self, record: NotificationRecord) -> usize {
        self.entries.push_front(record);
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
            evicted += 1;
        }
        evicted
    }

    /// Mark one record read; false when no record has that id
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark every record read, returning how many changed
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for record in self.entries.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed += 1;
        }
        changed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|r| !r.read).count()
    }

    pub fn unread(&self) -> Vec<NotificationRecord> {
        self.entries.iter().filter(|r| !r.read).cloned().collect()
    }

    pub fn all(&self) -> Vec<NotificationRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn record(id: &str) -> NotificationRecord {
        NotificationRecord::parse(&format!(r#"{{"id":"{}"}}"#, id), || unreachable!(), at())
            .unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        let record = NotificationRecord::parse(
            r#"{"id":"x1","message":"m","type":"success"}"#,
            || "unused".to_string(),
            at(),
        )
        .unwrap();

        assert_eq!(record.id, "x1");
        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.message, "m");
        assert_eq!(record.kind, "success");
        assert!(!record.read);
        assert_eq!(record.category(), NotificationKind::Success);
    }

    #[test]
    fn test_parse_fallback_id_and_kind() {
        let record =
            NotificationRecord::parse(r#"{"message":"hello"}"#, || "local-7".to_string(), at())
                .unwrap();
        assert_eq!(record.id, "local-7");
        assert_eq!(record.kind, DEFAULT_KIND);
    }

    #[test]
    fn test_parse_numeric_id_and_aliases() {
        let record = NotificationRecord::parse(
            r#"{"id":42,"titulo":"Nueva","mensaje":"Incidencia #42","tipo":"INCIDENCIA_NUEVA","prioridad":"ALTA"}"#,
            || unreachable!(),
            at(),
        )
        .unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.title, "Nueva");
        assert_eq!(record.message, "Incidencia #42");
        assert_eq!(record.priority.as_deref(), Some("ALTA"));
        assert_eq!(
            record.category(),
            NotificationKind::Incident(Some(IncidentEvent::Created))
        );
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_parse_preserves_extra_fields() {
        let record = NotificationRecord::parse(
            r#"{"id":"a","incidentId":17,"technician":{"name":"Ana"}}"#,
            || unreachable!(),
            at(),
        )
        .unwrap();
        assert_eq!(record.extra.get("incidentId"), Some(&serde_json::json!(17)));
        assert!(record.extra.contains_key("technician"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["incidentId"], 17);
        assert_eq!(json["read"], false);
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        let err = NotificationRecord::parse("[1,2]", String::new, at()).unwrap_err();
        assert!(matches!(err, LinkError::MalformedMessage(_)));

        let err = NotificationRecord::parse("not json", String::new, at()).unwrap_err();
        assert!(matches!(err, LinkError::MalformedMessage(_)));
    }

    #[test]
    fn test_empty_id_uses_fallback() {
        let record =
            NotificationRecord::parse(r#"{"id":""}"#, || "local-1".to_string(), at()).unwrap();
        assert_eq!(record.id, "local-1");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            NotificationKind::parse("incidencia_resuelta"),
            NotificationKind::Incident(Some(IncidentEvent::Resolved))
        );
        assert_eq!(NotificationKind::parse("incident"), NotificationKind::Incident(None));
        assert_eq!(NotificationKind::parse("Error"), NotificationKind::Error);
        assert_eq!(
            NotificationKind::parse("maintenance"),
            NotificationKind::Other("maintenance".to_string())
        );
    }

    #[test]
    fn test_log_is_bounded_oldest_first_eviction() {
        let mut log = RecordLog::new(3);
        for id in ["a", "b", "c"] {
            assert_eq!(log.push(record(id)), 0);
        }
        assert_eq!(log.push(record("d")), 1);

        let ids: Vec<_> = log.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_read_tracking() {
        let mut log = RecordLog::new(50);
        log.push(record("a"));
        log.push(record("b"));
        assert_eq!(log.unread_count(), 2);

        assert!(log.mark_read("a"));
        assert!(!log.mark_read("missing"));
        assert_eq!(log.unread_count(), 1);
        assert_eq!(log.unread()[0].id, "b");

        assert_eq!(log.mark_all_read(), 1);
        assert_eq!(log.unread_count(), 0);
        assert_eq!(log.all().len(), 2);

        log.clear();
        assert!(log.is_empty());
    }
}
