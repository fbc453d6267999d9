//! Ledger events
//!
//! Notifications emitted to other modules after a primary transaction
//! commits. The emitter persists them; this module only shapes them.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// One domain event, addressed as `domain` / `event_key` with a subject
/// entity and a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub domain: String,
    pub event_key: String,
    pub subject_id: Uuid,
    pub payload: serde_json::Value,
}

impl LedgerEvent {
    pub fn new(
        domain: &str,
        event_key: &str,
        subject_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            event_key: event_key.to_string(),
            subject_id,
            payload,
        }
    }

    pub fn account(event_key: &str, account_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new("chart_of_accounts", event_key, account_id, payload)
    }

    pub fn journal(event_key: &str, entry_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new("journal", event_key, entry_id, payload)
    }

    pub fn period(event_key: &str, period_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new("periods", event_key, period_id, payload)
    }

    pub fn reconciliation(event_key: &str, subject_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new("reconciliation", event_key, subject_id, payload)
    }

    pub fn consolidation(event_key: &str, snapshot_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new("consolidation", event_key, snapshot_id, payload)
    }

    /// Minimal payload naming the entity only.
    pub fn empty_payload() -> serde_json::Value {
        json!({})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_addressing() {
        let id = Uuid::new_v4();
        let event = LedgerEvent::journal("entry.approved", id, json!({ "entry_number": "JE-000001" }));

        assert_eq!(event.domain, "journal");
        assert_eq!(event.event_key, "entry.approved");
        assert_eq!(event.subject_id, id);
        assert_eq!(event.payload["entry_number"], "JE-000001");
    }
}
