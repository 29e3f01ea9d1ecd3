//! PostgreSQL decision log.

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::{DbFailure, RetryPolicy, StorageResultExt, classify};
use crate::audit::{AuditLog, DecisionEvent, DecisionFilter, GuardDecision};
use crate::{Error, Result};

/// Append-only decision log. The table trigger rejects UPDATE and DELETE.
pub struct PostgresAuditLog {
    pool: Arc<PgPool>,
    retry: RetryPolicy,
}

impl PostgresAuditLog {
    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn decision_from_row(row: &PgRow) -> Result<GuardDecision> {
    let data: serde_json::Value = row.try_get("data").storage_err()?;
    let mut decision: GuardDecision = serde_json::from_value(data)?;
    decision.sequence = row.try_get::<i64, _>("sequence").storage_err()? as u64;
    Ok(decision)
}

#[async_trait::async_trait]
impl AuditLog for PostgresAuditLog {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn record(&self, mut decision: GuardDecision) -> Result<GuardDecision> {
        let data = serde_json::to_value(&decision)?;
        let result = sqlx::query(
            "INSERT INTO guard_decisions (id, tenant_id, layer, event, idempotency_key, blocked, \
             created_at, data) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING sequence",
        )
        .bind(decision.id.as_uuid())
        .bind(decision.tenant_id.as_str())
        .bind(decision.layer.as_str())
        .bind(decision.event.as_str())
        .bind(decision.idempotency_key.as_deref())
        .bind(decision.blocked)
        .bind(decision.created_at)
        .bind(&data)
        .fetch_one(&*self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(err) => {
                return Err(match classify(err) {
                    DbFailure::UniqueViolation | DbFailure::Immutable => {
                        Error::immutable("guard_decision", decision.id)
                    }
                    DbFailure::Other(e) => e,
                });
            }
        };
        decision.sequence = row.try_get::<i64, _>("sequence").storage_err()? as u64;
        Ok(decision)
    }

    async fn query(&self, filter: &DecisionFilter) -> Result<Vec<GuardDecision>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT sequence, data FROM guard_decisions WHERE TRUE");
        if let Some(tenant) = &filter.tenant {
            qb.push(" AND tenant_id = ").push_bind(tenant.as_str().to_string());
        }
        if let Some(layer) = filter.layer {
            qb.push(" AND layer = ").push_bind(layer.as_str());
        }
        if let Some(event) = filter.event {
            qb.push(" AND event = ").push_bind(event.as_str());
        }
        if let Some(blocked) = filter.blocked {
            qb.push(" AND blocked = ").push_bind(blocked);
        }
        if let Some(key) = &filter.idempotency_key {
            qb.push(" AND idempotency_key = ").push_bind(key.clone());
        }
        if let Some(since) = filter.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND created_at < ").push_bind(until);
        }
        qb.push(" ORDER BY sequence");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .storage_err_ctx("query decisions")?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn find_successful_deduction(&self, key: &str) -> Result<Option<GuardDecision>> {
        let pool = &self.pool;
        self.retry
            .run(|| async move {
                let row = sqlx::query(
                    "SELECT sequence, data FROM guard_decisions \
                     WHERE idempotency_key = $1 AND event = $2 AND NOT blocked \
                     ORDER BY sequence LIMIT 1",
                )
                .bind(key)
                .bind(DecisionEvent::Deducted.as_str())
                .fetch_optional(&**pool)
                .await
                .storage_err_ctx("find deduction")?;
                row.as_ref().map(decision_from_row).transpose()
            })
            .await
    }
}
