//! # Audit Trail
//!
//! Best-effort write-after audit log.
//!
//! Audit rows are written *after* a ledger transaction commits, never inside
//! it: the ledger itself is already a complete factual record, and a failing
//! audit write must never roll back money or stock. Failures are logged and
//! swallowed.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::error::DbResult;

// =============================================================================
// Event & Record
// =============================================================================

/// A state change worth auditing.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Dotted action name, e.g. `shift.closed`, `transfer.approved`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Entity snapshot before the change, where one existed.
    pub old_values: Option<serde_json::Value>,
    /// Entity snapshot after the change.
    pub new_values: Option<serde_json::Value>,
    pub actor_user_id: String,
}

/// A stored audit row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub old_values: Option<String>,
    pub new_values: Option<String>,
    pub actor_user_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Audit Log
// =============================================================================

/// Writer/reader for the audit table.
#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        AuditLog { pool }
    }

    /// Records an event, best-effort. Never fails the caller.
    pub async fn record(&self, event: AuditEvent) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, action, entity_type, entity_id,
                old_values, new_values, actor_user_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&event.action)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(event.old_values.as_ref().map(|v| v.to_string()))
        .bind(event.new_values.as_ref().map(|v| v.to_string()))
        .bind(&event.actor_user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            warn!(
                action = %event.action,
                entity_id = %event.entity_id,
                error = %err,
                "Audit write failed; continuing"
            );
        }
    }

    /// Most recent audit rows, newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, action, entity_type, entity_id,
                   old_values, new_values, actor_user_id, created_at
            FROM audit_log
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Audit rows for one entity, oldest first.
    pub async fn for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, action, entity_type, entity_id,
                   old_values, new_values, actor_user_id, created_at
            FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{DbConfig, Engine};
    use tally_core::TenantConfig;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let engine = Engine::new(DbConfig::in_memory(), TenantConfig::new("t-1"))
            .await
            .unwrap();
        let audit = engine.audit();

        audit
            .record(AuditEvent {
                action: "shift.opened".to_string(),
                entity_type: "shift".to_string(),
                entity_id: "s-1".to_string(),
                old_values: None,
                new_values: Some(serde_json::json!({"status": "open"})),
                actor_user_id: "u-1".to_string(),
            })
            .await;

        let rows = audit.for_entity("shift", "s-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "shift.opened");
        assert!(rows[0].new_values.as_deref().unwrap().contains("open"));

        let recent = audit.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
