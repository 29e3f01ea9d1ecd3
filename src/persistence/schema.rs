//! Schema for the PostgreSQL backends.

use sqlx::PgPool;

use super::StorageResultExt;
use crate::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id UUID PRIMARY KEY,
    tenant_id TEXT NOT NULL UNIQUE,
    balance NUMERIC(20, 4) NOT NULL DEFAULT 0,
    currency TEXT NOT NULL,
    total_credited NUMERIC(20, 4) NOT NULL DEFAULT 0,
    total_debited NUMERIC(20, 4) NOT NULL DEFAULT 0,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_mutation_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id UUID PRIMARY KEY,
    sequence BIGSERIAL NOT NULL UNIQUE,
    wallet_id UUID NOT NULL REFERENCES wallets (id),
    tenant_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    amount NUMERIC(20, 4) NOT NULL,
    balance_before NUMERIC(20, 4) NOT NULL,
    balance_after NUMERIC(20, 4) NOT NULL,
    currency TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reference_type TEXT,
    reference_id TEXT,
    metadata JSONB NOT NULL DEFAULT 'null',
    status TEXT NOT NULL,
    idempotency_key TEXT UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_tenant ON ledger_entries (tenant_id, sequence);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_created ON ledger_entries (created_at);

CREATE TABLE IF NOT EXISTS guard_decisions (
    id UUID PRIMARY KEY,
    sequence BIGSERIAL NOT NULL UNIQUE,
    tenant_id TEXT NOT NULL,
    layer TEXT NOT NULL,
    event TEXT NOT NULL,
    idempotency_key TEXT,
    blocked BOOLEAN NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    data JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_guard_decisions_tenant ON guard_decisions (tenant_id, sequence);
CREATE INDEX IF NOT EXISTS idx_guard_decisions_key ON guard_decisions (idempotency_key, event);

CREATE TABLE IF NOT EXISTS credit_entries (
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    status TEXT NOT NULL,
    tenant_id TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    data JSONB,
    PRIMARY KEY (source_type, source_id)
);
CREATE INDEX IF NOT EXISTS idx_credit_entries_tenant ON credit_entries (tenant_id, created_at);

CREATE OR REPLACE FUNCTION reject_sealed_ledger_entry() RETURNS trigger AS $$
BEGIN
    IF TG_OP = 'DELETE' THEN
        RAISE EXCEPTION 'ledger_immutable: ledger entry % cannot be deleted', OLD.id;
    END IF;
    IF OLD.status <> 'pending' THEN
        RAISE EXCEPTION 'ledger_immutable: ledger entry % is sealed', OLD.id;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS ledger_entries_immutable ON ledger_entries;
CREATE TRIGGER ledger_entries_immutable
    BEFORE UPDATE OR DELETE ON ledger_entries
    FOR EACH ROW EXECUTE FUNCTION reject_sealed_ledger_entry();

CREATE OR REPLACE FUNCTION reject_decision_mutation() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'ledger_immutable: guard decision % is append-only', OLD.id;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS guard_decisions_immutable ON guard_decisions;
CREATE TRIGGER guard_decisions_immutable
    BEFORE UPDATE OR DELETE ON guard_decisions
    FOR EACH ROW EXECUTE FUNCTION reject_decision_mutation();

CREATE OR REPLACE FUNCTION reject_credited_mutation() RETURNS trigger AS $$
BEGIN
    IF OLD.status = 'credited' THEN
        RAISE EXCEPTION 'ledger_immutable: credit %/% is sealed', OLD.source_type, OLD.source_id;
    END IF;
    IF TG_OP = 'DELETE' THEN
        RETURN OLD;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS credit_entries_immutable ON credit_entries;
CREATE TRIGGER credit_entries_immutable
    BEFORE UPDATE OR DELETE ON credit_entries
    FOR EACH ROW EXECUTE FUNCTION reject_credited_mutation();
"#;

/// Creates or upgrades the tables, indexes and triggers.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .storage_err_ctx("migrate")?;
    tracing::info!("Ledger schema migrated");
    Ok(())
}
