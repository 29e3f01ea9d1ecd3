//! PostgreSQL credit store.

use std::sync::Arc;

use sqlx::{PgPool, Row};

use super::{DbFailure, StorageResultExt, classify, db_error};
use crate::credit::{CreditEntry, CreditSource, CreditStore};
use crate::types::TenantId;
use crate::{Error, Result};

const CLAIMED: &str = "claimed";
const CREDITED: &str = "credited";

/// Credit store keyed by the `(source_type, source_id)` primary key.
pub struct PostgresCreditStore {
    pool: Arc<PgPool>,
}

impl PostgresCreditStore {
    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn already_credited(source: &CreditSource) -> Error {
    Error::InvalidSourceState {
        source_ref: source.to_string(),
        state: "already credited".to_string(),
    }
}

#[async_trait::async_trait]
impl CreditStore for PostgresCreditStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn claim(&self, source: &CreditSource) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO credit_entries (source_type, source_id, status) VALUES ($1, $2, $3)",
        )
        .bind(source.kind())
        .bind(source.id())
        .bind(CLAIMED)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(match classify(err) {
                DbFailure::UniqueViolation => already_credited(source),
                DbFailure::Immutable => already_credited(source),
                DbFailure::Other(e) => e,
            }),
        }
    }

    async fn release(&self, source: &CreditSource) -> Result<()> {
        sqlx::query(
            "DELETE FROM credit_entries WHERE source_type = $1 AND source_id = $2 AND status = $3",
        )
        .bind(source.kind())
        .bind(source.id())
        .bind(CLAIMED)
        .execute(&*self.pool)
        .await
        .storage_err_ctx("release credit claim")?;
        Ok(())
    }

    async fn complete(&self, entry: CreditEntry) -> Result<CreditEntry> {
        let data = serde_json::to_value(&entry)?;
        let updated = sqlx::query(
            "UPDATE credit_entries SET status = $3, tenant_id = $4, created_at = $5, data = $6 \
             WHERE source_type = $1 AND source_id = $2 AND status = $7",
        )
        .bind(entry.source.kind())
        .bind(entry.source.id())
        .bind(CREDITED)
        .bind(entry.tenant_id.as_str())
        .bind(entry.created_at)
        .bind(&data)
        .bind(CLAIMED)
        .execute(&*self.pool)
        .await
        .map_err(|e| db_error(e, "credit_entry", entry.id))?;

        if updated.rows_affected() == 1 {
            return Ok(entry);
        }
        match self.find_by_source(&entry.source).await? {
            Some(_) => Err(Error::immutable("credit_entry", entry.id)),
            None => Err(Error::InvalidSourceState {
                source_ref: entry.source.to_string(),
                state: "not claimed".to_string(),
            }),
        }
    }

    async fn find_by_source(&self, source: &CreditSource) -> Result<Option<CreditEntry>> {
        let row = sqlx::query(
            "SELECT data FROM credit_entries \
             WHERE source_type = $1 AND source_id = $2 AND status = $3",
        )
        .bind(source.kind())
        .bind(source.id())
        .bind(CREDITED)
        .fetch_optional(&*self.pool)
        .await
        .storage_err_ctx("find credit")?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data").storage_err()?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<CreditEntry>> {
        let rows = sqlx::query(
            "SELECT data FROM credit_entries WHERE tenant_id = $1 AND status = $2 \
             ORDER BY created_at",
        )
        .bind(tenant.as_str())
        .bind(CREDITED)
        .fetch_all(&*self.pool)
        .await
        .storage_err_ctx("list credits")?;

        rows.iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data").storage_err()?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }
}
