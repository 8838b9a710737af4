//! Row mapping trait and helpers for reducing boilerplate in queries.

use bigdecimal::BigDecimal;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;
use crate::money::parse_amount;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?
        .parse::<T>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text))
}

/// Decimal amounts are stored as TEXT.
fn parse_decimal(row: &Row, col: usize) -> rusqlite::Result<BigDecimal> {
    let raw: String = row.get(col)?;
    parse_amount(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

fn parse_json_opt(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, name, mobile, email, created_at, updated_at";

pub const API_TOKEN_COLS: &str = "id, user_id, name, token_prefix, token_hash, created_at, last_used_at, expires_at, revoked_at";

pub const PLAN_COLS: &str = "id, slug, name, price, currency, duration_days, cafebazaar_product_id, myket_product_id, features, is_active, sort_order, created_at, updated_at";

/// Plan columns qualified with the `p` alias, for joins.
pub const PLAN_COLS_P: &str = "p.id, p.slug, p.name, p.price, p.currency, p.duration_days, p.cafebazaar_product_id, p.myket_product_id, p.features, p.is_active, p.sort_order, p.created_at, p.updated_at";

pub const PAYMENT_COLS: &str = "id, user_id, subscription_id, amount, currency, payment_method, payment_gateway, billing_platform, status, transaction_id, purchase_token, order_id, product_id, purchase_state, is_acknowledged, acknowledged_at, processed_at, store_response, metadata, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, plan_id, type, price, currency, status, start_date, end_date, billing_platform, auto_renew, cancelled_at, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            mobile: row.get(2)?,
            email: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for ApiToken {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ApiToken {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            token_prefix: row.get(3)?,
            token_hash: row.get(4)?,
            created_at: row.get(5)?,
            last_used_at: row.get(6)?,
            expires_at: row.get(7)?,
            revoked_at: row.get(8)?,
        })
    }
}

impl FromRow for SubscriptionPlan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let features: String = row.get(8)?;
        Ok(SubscriptionPlan {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            price: parse_decimal(row, 3)?,
            currency: parse_enum(row, 4, "currency")?,
            duration_days: row.get(5)?,
            cafebazaar_product_id: row.get(6)?,
            myket_product_id: row.get(7)?,
            features: serde_json::from_str(&features).unwrap_or_default(),
            is_active: row.get::<_, i32>(9)? != 0,
            sort_order: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            subscription_id: row.get(2)?,
            amount: parse_decimal(row, 3)?,
            currency: parse_enum(row, 4, "currency")?,
            payment_method: row.get(5)?,
            payment_gateway: row.get(6)?,
            billing_platform: parse_enum(row, 7, "billing_platform")?,
            status: parse_enum(row, 8, "status")?,
            transaction_id: row.get(9)?,
            purchase_token: row.get(10)?,
            order_id: row.get(11)?,
            product_id: row.get(12)?,
            purchase_state: row.get(13)?,
            is_acknowledged: row.get::<_, i32>(14)? != 0,
            acknowledged_at: row.get(15)?,
            processed_at: row.get(16)?,
            store_response: parse_json_opt(row, 17)?,
            metadata: parse_json_opt(row, 18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_id: row.get(2)?,
            subscription_type: parse_enum(row, 3, "type")?,
            price: parse_decimal(row, 4)?,
            currency: parse_enum(row, 5, "currency")?,
            status: parse_enum(row, 6, "status")?,
            start_date: row.get(7)?,
            end_date: row.get(8)?,
            billing_platform: parse_enum(row, 9, "billing_platform")?,
            auto_renew: row.get::<_, i32>(10)? != 0,
            cancelled_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}
