use sqlx::{Pool, Postgres};
use tracing::warn;

/// Write-only audit sink.
///
/// Records who changed what with before/after snapshots. Inserts run
/// on their own task and failures only log; the booking path never
/// waits on or fails because of auditing.
#[derive(Clone)]
pub struct AuditLog {
    pool: Pool<Postgres>,
}

impl AuditLog {
    pub fn new(pool: Pool<Postgres>) -> Self {
        AuditLog { pool }
    }

    pub fn record(
        &self,
        action: &'static str,
        entity: &'static str,
        entity_id: i64,
        user_id: Option<i64>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_log (action, entity, entity_id, user_id, before, after)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(action)
            .bind(entity)
            .bind(entity_id)
            .bind(user_id)
            .bind(before)
            .bind(after)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(action, entity, entity_id, "audit insert failed: {:?}", e);
            }
        });
    }
}
