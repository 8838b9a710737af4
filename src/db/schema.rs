use rusqlite::Connection;

/// Initialize the database schema. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Users (identity is owned by the main platform; mirrored here for ownership checks)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            mobile TEXT UNIQUE,
            email TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Bearer tokens (hash only; plaintext is shown once at issuance)
        CREATE TABLE IF NOT EXISTS api_tokens (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            token_prefix TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER,
            expires_at INTEGER,
            revoked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);

        -- Plan catalog
        CREATE TABLE IF NOT EXISTS subscription_plans (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            price TEXT NOT NULL,                          -- decimal as text
            currency TEXT NOT NULL CHECK (currency IN ('IRT', 'IRR')),
            duration_days INTEGER NOT NULL CHECK (duration_days > 0),
            cafebazaar_product_id TEXT UNIQUE,
            myket_product_id TEXT UNIQUE,
            features TEXT NOT NULL DEFAULT '[]',          -- JSON array of strings
            is_active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Legacy store SKU → plan slug mapping (older app builds shipped other SKUs)
        CREATE TABLE IF NOT EXISTS plan_product_aliases (
            billing_platform TEXT NOT NULL CHECK (billing_platform IN ('website', 'cafebazaar', 'myket')),
            product_id TEXT NOT NULL,
            plan_slug TEXT NOT NULL,
            PRIMARY KEY (billing_platform, product_id)
        );

        -- Subscriptions (entitlement periods)
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            plan_id TEXT NOT NULL REFERENCES subscription_plans(id),
            type TEXT NOT NULL CHECK (type IN ('1month', '3months', '6months', '1year')),
            price TEXT NOT NULL,
            currency TEXT NOT NULL CHECK (currency IN ('IRT', 'IRR')),
            status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'cancelled', 'expired')),
            start_date INTEGER NOT NULL,
            end_date INTEGER NOT NULL,
            billing_platform TEXT NOT NULL CHECK (billing_platform IN ('website', 'cafebazaar', 'myket')),
            auto_renew INTEGER NOT NULL DEFAULT 0,
            cancelled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_expiry ON subscriptions(status, end_date);
        -- At most one active subscription per user
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
            ON subscriptions(user_id) WHERE status = 'active';

        -- Payments (one row per purchase attempt)
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            subscription_id TEXT REFERENCES subscriptions(id) ON DELETE SET NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL CHECK (currency IN ('IRT', 'IRR')),
            payment_method TEXT NOT NULL,
            payment_gateway TEXT NOT NULL,
            billing_platform TEXT NOT NULL CHECK (billing_platform IN ('website', 'cafebazaar', 'myket')),
            status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
            transaction_id TEXT UNIQUE,
            purchase_token TEXT NOT NULL,
            order_id TEXT,
            product_id TEXT,
            purchase_state INTEGER,
            is_acknowledged INTEGER NOT NULL DEFAULT 0,
            acknowledged_at INTEGER,
            processed_at INTEGER,
            store_response TEXT,                          -- raw verification payload (JSON)
            metadata TEXT,                                -- JSON
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            -- Idempotency key: one payment per store receipt
            UNIQUE (billing_platform, purchase_token)
        );
        CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_payments_subscription ON payments(subscription_id);
        CREATE INDEX IF NOT EXISTS idx_payments_pending ON payments(status, created_at);
        "#,
    )?;
    Ok(())
}
