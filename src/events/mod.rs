//! Event emitter
//!
//! Persists ledger events for other modules to consume. Emission always
//! happens after the primary transaction commits; like the audit sink, a
//! failing emitter is logged and never surfaces to the caller.

use sqlx::PgPool;

use crate::domain::{LedgerEvent, OperationContext};

/// Event Emitter
#[derive(Debug, Clone)]
pub struct EventEmitter {
    pool: PgPool,
}

impl EventEmitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Emit an event; failures are swallowed onto the warn channel.
    pub async fn emit(&self, event: LedgerEvent, context: &OperationContext) {
        let (agency_id, sub_account_id) = context.scope.columns();

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_events (
                domain, event_key, subject_id, payload,
                agency_id, sub_account_id, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.domain)
        .bind(&event.event_key)
        .bind(event.subject_id)
        .bind(&event.payload)
        .bind(agency_id)
        .bind(sub_account_id)
        .bind(context.correlation_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    domain = %event.domain,
                    event_key = %event.event_key,
                    subject_id = %event.subject_id,
                    "Ledger event emitted"
                );
            }
            Err(e) => {
                tracing::warn!(
                    domain = %event.domain,
                    event_key = %event.event_key,
                    error = %e,
                    "Event emission failed, continuing"
                );
            }
        }
    }
}
