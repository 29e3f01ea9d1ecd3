//! PostgreSQL ledger store.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{DbFailure, RetryPolicy, StorageResultExt, classify, db_error};
use crate::ledger::{
    Affordability, EntryKind, EntryStatus, LedgerCredit, LedgerDebit, LedgerEntry, LedgerQuery,
    LedgerStore, Wallet,
};
use crate::types::money::{checked_sum, ensure_positive};
use crate::types::{EntryId, Reference, TenantId, WalletId};
use crate::{Error, Result};

const WALLET_COLUMNS: &str = "id, tenant_id, balance, currency, total_credited, total_debited, \
     active, created_at, last_mutation_at";

const ENTRY_COLUMNS: &str = "id, sequence, wallet_id, tenant_id, kind, amount, balance_before, \
     balance_after, currency, description, reference_type, reference_id, metadata, status, \
     idempotency_key, created_at, completed_at";

/// Ledger backed by PostgreSQL.
///
/// Every balance change runs in one transaction that locks the wallet row
/// with `SELECT ... FOR UPDATE`; the unique index on `idempotency_key` is the
/// final arbiter between concurrent writers sharing a key.
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    retry: RetryPolicy,
}

/// Ledger line before it is written.
struct Draft {
    kind: EntryKind,
    amount: Decimal,
    description: String,
    reference: Option<Reference>,
    idempotency_key: Option<String>,
    metadata: Value,
    status: EntryStatus,
}

impl PostgresLedgerStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .storage_err_ctx("connect")?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

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

    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    async fn append(&self, tenant: &TenantId, draft: Draft) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await.storage_err_ctx("begin")?;
        let mut wallet = lock_wallet(&mut tx, tenant).await?;

        if draft.amount.is_sign_negative() {
            let required = -draft.amount;
            if !wallet.active {
                return Err(Error::WalletInactive {
                    tenant: tenant.clone(),
                });
            }
            if !wallet.can_afford(required) {
                return Err(Error::InsufficientBalance {
                    required,
                    available: wallet.balance,
                });
            }
        }

        if let Some(key) = &draft.idempotency_key {
            if let Some(original) = find_key(&mut tx, key).await? {
                return Err(Error::DuplicateRequest {
                    key: key.clone(),
                    original: Box::new(original),
                });
            }
        }

        let now = Utc::now();
        let completed = draft.status == EntryStatus::Completed;
        let (balance_before, balance_after) = if completed {
            wallet.apply(draft.amount, now)?
        } else {
            (wallet.balance, checked_sum(wallet.balance, draft.amount)?)
        };

        let mut entry = LedgerEntry {
            id: EntryId::new(),
            sequence: 0,
            wallet_id: wallet.id,
            tenant_id: tenant.clone(),
            kind: draft.kind,
            amount: draft.amount,
            balance_before,
            balance_after,
            currency: wallet.currency.clone(),
            description: draft.description,
            reference: draft.reference,
            metadata: draft.metadata,
            status: draft.status,
            idempotency_key: draft.idempotency_key,
            created_at: now,
            completed_at: completed.then_some(now),
        };

        match insert_entry(&mut tx, &entry).await {
            Ok(sequence) => entry.sequence = sequence as u64,
            Err(err) => {
                drop(tx);
                return Err(self.insert_failure(err, &entry).await);
            }
        }
        if completed {
            update_wallet(&mut tx, &wallet).await?;
        }
        tx.commit().await.storage_err_ctx("commit")?;

        tracing::info!(
            tenant = %tenant,
            entry_id = %entry.id,
            kind = %entry.kind,
            amount = %entry.amount,
            status = %entry.status,
            balance_after = %entry.balance_after,
            "Ledger entry written"
        );
        Ok(entry)
    }

    /// A unique violation on insert means a concurrent writer won the key.
    async fn insert_failure(&self, err: sqlx::Error, entry: &LedgerEntry) -> Error {
        match (classify(err), &entry.idempotency_key) {
            (DbFailure::UniqueViolation, Some(key)) => match self.find_by_idempotency_key(key).await {
                Ok(Some(original)) => Error::DuplicateRequest {
                    key: key.clone(),
                    original: Box::new(original),
                },
                Ok(None) => Error::storage(format!("idempotency key {key} vanished after conflict")),
                Err(e) => e,
            },
            (DbFailure::UniqueViolation, None) => {
                Error::storage(format!("duplicate ledger entry id {}", entry.id))
            }
            (DbFailure::Immutable, _) => Error::immutable("ledger_entry", entry.id),
            (DbFailure::Other(e), _) => e,
        }
    }
}

async fn lock_wallet(conn: &mut PgConnection, tenant: &TenantId) -> Result<Wallet> {
    let row = sqlx::query(&format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE tenant_id = $1 FOR UPDATE"
    ))
    .bind(tenant.as_str())
    .fetch_optional(&mut *conn)
    .await
    .storage_err_ctx("lock wallet")?;

    match row {
        Some(row) => wallet_from_row(&row),
        None => Err(Error::WalletNotFound {
            tenant: tenant.clone(),
        }),
    }
}

async fn update_wallet(conn: &mut PgConnection, wallet: &Wallet) -> Result<()> {
    sqlx::query(
        "UPDATE wallets SET balance = $2, total_credited = $3, total_debited = $4, \
         last_mutation_at = $5 WHERE id = $1",
    )
    .bind(wallet.id.as_uuid())
    .bind(wallet.balance)
    .bind(wallet.total_credited)
    .bind(wallet.total_debited)
    .bind(wallet.last_mutation_at)
    .execute(&mut *conn)
    .await
    .storage_err_ctx("update wallet")?;
    Ok(())
}

async fn find_key(conn: &mut PgConnection, key: &str) -> Result<Option<LedgerEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1"
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
    .storage_err_ctx("find idempotency key")?;
    row.as_ref().map(entry_from_row).transpose()
}

async fn insert_entry(
    conn: &mut PgConnection,
    entry: &LedgerEntry,
) -> std::result::Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO ledger_entries (id, wallet_id, tenant_id, kind, amount, balance_before, \
         balance_after, currency, description, reference_type, reference_id, metadata, status, \
         idempotency_key, created_at, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         RETURNING sequence",
    )
    .bind(entry.id.as_uuid())
    .bind(entry.wallet_id.as_uuid())
    .bind(entry.tenant_id.as_str())
    .bind(entry.kind.as_str())
    .bind(entry.amount)
    .bind(entry.balance_before)
    .bind(entry.balance_after)
    .bind(&entry.currency)
    .bind(&entry.description)
    .bind(entry.reference.as_ref().map(|r| r.kind()))
    .bind(entry.reference.as_ref().map(|r| r.id()))
    .bind(&entry.metadata)
    .bind(entry.status.as_str())
    .bind(entry.idempotency_key.as_deref())
    .bind(entry.created_at)
    .bind(entry.completed_at)
    .fetch_one(&mut *conn)
    .await?;
    row.try_get("sequence")
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        id: WalletId::from(row.try_get::<Uuid, _>("id").storage_err()?),
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").storage_err()?),
        balance: row.try_get("balance").storage_err()?,
        currency: row.try_get("currency").storage_err()?,
        total_credited: row.try_get("total_credited").storage_err()?,
        total_debited: row.try_get("total_debited").storage_err()?,
        active: row.try_get("active").storage_err()?,
        created_at: row.try_get("created_at").storage_err()?,
        last_mutation_at: row.try_get("last_mutation_at").storage_err()?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let kind: String = row.try_get("kind").storage_err()?;
    let status: String = row.try_get("status").storage_err()?;
    let reference_type: Option<String> = row.try_get("reference_type").storage_err()?;
    let reference_id: Option<String> = row.try_get("reference_id").storage_err()?;
    let reference = match (reference_type, reference_id) {
        (Some(kind), Some(id)) => Reference::from_parts(&kind, &id),
        _ => None,
    };

    Ok(LedgerEntry {
        id: EntryId::from(row.try_get::<Uuid, _>("id").storage_err()?),
        sequence: row.try_get::<i64, _>("sequence").storage_err()? as u64,
        wallet_id: WalletId::from(row.try_get::<Uuid, _>("wallet_id").storage_err()?),
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").storage_err()?),
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| Error::storage(format!("unknown entry kind {kind}")))?,
        amount: row.try_get("amount").storage_err()?,
        balance_before: row.try_get("balance_before").storage_err()?,
        balance_after: row.try_get("balance_after").storage_err()?,
        currency: row.try_get("currency").storage_err()?,
        description: row.try_get("description").storage_err()?,
        reference,
        metadata: row.try_get("metadata").storage_err()?,
        status: EntryStatus::parse(&status)
            .ok_or_else(|| Error::storage(format!("unknown entry status {status}")))?,
        idempotency_key: row.try_get("idempotency_key").storage_err()?,
        created_at: row.try_get("created_at").storage_err()?,
        completed_at: row.try_get("completed_at").storage_err()?,
    })
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn open_wallet(&self, tenant: &TenantId, currency: &str) -> Result<Wallet> {
        let inserted = sqlx::query(
            "INSERT INTO wallets (id, tenant_id, currency) VALUES ($1, $2, $3) \
             ON CONFLICT (tenant_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(tenant.as_str())
        .bind(currency)
        .execute(&*self.pool)
        .await
        .storage_err_ctx("open wallet")?;
        if inserted.rows_affected() > 0 {
            tracing::info!(tenant = %tenant, currency, "Opened wallet");
        }

        let wallet = self
            .wallet(tenant)
            .await?
            .ok_or_else(|| Error::storage(format!("wallet for {tenant} missing after insert")))?;
        if wallet.currency != currency {
            return Err(Error::CurrencyMismatch {
                wallet: wallet.currency,
                operation: currency.to_string(),
            });
        }
        Ok(wallet)
    }

    async fn wallet(&self, tenant: &TenantId) -> Result<Option<Wallet>> {
        let pool = &self.pool;
        self.retry
            .run(|| async move {
                let row = sqlx::query(&format!(
                    "SELECT {WALLET_COLUMNS} FROM wallets WHERE tenant_id = $1"
                ))
                .bind(tenant.as_str())
                .fetch_optional(&**pool)
                .await
                .storage_err_ctx("load wallet")?;
                row.as_ref().map(wallet_from_row).transpose()
            })
            .await
    }

    async fn set_wallet_active(&self, tenant: &TenantId, active: bool) -> Result<Wallet> {
        let row = sqlx::query(&format!(
            "UPDATE wallets SET active = $2 WHERE tenant_id = $1 RETURNING {WALLET_COLUMNS}"
        ))
        .bind(tenant.as_str())
        .bind(active)
        .fetch_optional(&*self.pool)
        .await
        .storage_err_ctx("set wallet active")?;

        let wallet = match row {
            Some(row) => wallet_from_row(&row)?,
            None => {
                return Err(Error::WalletNotFound {
                    tenant: tenant.clone(),
                });
            }
        };
        tracing::info!(tenant = %tenant, active, "Wallet activity changed");
        Ok(wallet)
    }

    async fn credit(&self, tenant: &TenantId, credit: LedgerCredit) -> Result<LedgerEntry> {
        let amount = ensure_positive(credit.amount)?;
        self.append(
            tenant,
            Draft {
                kind: credit.kind,
                amount,
                description: credit.description,
                reference: credit.reference,
                idempotency_key: credit.idempotency_key,
                metadata: credit.metadata,
                status: EntryStatus::Completed,
            },
        )
        .await
    }

    async fn debit(&self, tenant: &TenantId, debit: LedgerDebit) -> Result<LedgerEntry> {
        let amount = ensure_positive(debit.amount)?;
        self.append(
            tenant,
            Draft {
                kind: debit.kind,
                amount: -amount,
                description: debit.description,
                reference: debit.reference,
                idempotency_key: debit.idempotency_key,
                metadata: debit.metadata,
                status: EntryStatus::Completed,
            },
        )
        .await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>> {
        let pool = &self.pool;
        self.retry
            .run(|| async move {
                let mut conn = pool.acquire().await.storage_err_ctx("acquire")?;
                find_key(&mut conn, key).await
            })
            .await
    }

    async fn can_afford(&self, tenant: &TenantId, amount: Decimal) -> Result<Affordability> {
        let wallet = self
            .wallet(tenant)
            .await?
            .ok_or_else(|| Error::WalletNotFound {
                tenant: tenant.clone(),
            })?;
        Ok(Affordability {
            balance: wallet.balance,
            required: amount,
            active: wallet.active,
        })
    }

    async fn open_pending(&self, tenant: &TenantId, credit: LedgerCredit) -> Result<LedgerEntry> {
        let amount = ensure_positive(credit.amount)?;
        self.append(
            tenant,
            Draft {
                kind: credit.kind,
                amount,
                description: credit.description,
                reference: credit.reference,
                idempotency_key: credit.idempotency_key,
                metadata: credit.metadata,
                status: EntryStatus::Pending,
            },
        )
        .await
    }

    async fn transition(&self, id: &EntryId, status: EntryStatus) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await.storage_err_ctx("begin")?;
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .storage_err_ctx("lock entry")?;
        let mut entry = match row {
            Some(row) => entry_from_row(&row)?,
            None => return Err(Error::EntryNotFound { id: *id }),
        };

        if entry.is_sealed() {
            return Err(Error::immutable("ledger_entry", id));
        }
        if entry.status != EntryStatus::Pending || status == EntryStatus::Pending {
            return Err(Error::InvalidTransition {
                id: *id,
                from: entry.status,
                to: status,
            });
        }

        let now = Utc::now();
        if status == EntryStatus::Completed {
            let mut wallet = lock_wallet(&mut tx, &entry.tenant_id).await?;
            if !wallet.can_afford(-entry.amount) {
                return Err(Error::InsufficientBalance {
                    required: -entry.amount,
                    available: wallet.balance,
                });
            }
            let (before, after) = wallet.apply(entry.amount, now)?;
            entry.balance_before = before;
            entry.balance_after = after;
            entry.completed_at = Some(now);
            update_wallet(&mut tx, &wallet).await?;
        }
        entry.status = status;

        sqlx::query(
            "UPDATE ledger_entries SET status = $2, balance_before = $3, balance_after = $4, \
             completed_at = $5 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(entry.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, "ledger_entry", id))?;
        tx.commit().await.storage_err_ctx("commit")?;

        tracing::info!(entry_id = %id, status = %status, "Pending entry settled");
        Ok(entry)
    }

    async fn entry(&self, id: &EntryId) -> Result<Option<LedgerEntry>> {
        let pool = &self.pool;
        self.retry
            .run(|| async move {
                let row = sqlx::query(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = $1"
                ))
                .bind(id.as_uuid())
                .fetch_optional(&**pool)
                .await
                .storage_err_ctx("load entry")?;
                row.as_ref().map(entry_from_row).transpose()
            })
            .await
    }

    async fn entries(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE TRUE"));
        if let Some(tenant) = &query.tenant {
            qb.push(" AND tenant_id = ").push_bind(tenant.as_str().to_string());
        }
        if let Some(kind) = query.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(since) = query.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = query.until {
            qb.push(" AND created_at < ").push_bind(until);
        }
        qb.push(" ORDER BY sequence");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .storage_err_ctx("query entries")?;
        rows.iter().map(entry_from_row).collect()
    }
}
