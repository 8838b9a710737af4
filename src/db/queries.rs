use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::crypto::{generate_token, hash_secret};
use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;
use crate::subscription_type::SubscriptionType;
use crate::util::token_prefix;

use super::from_row::{
    API_TOKEN_COLS, PAYMENT_COLS, PLAN_COLS, PLAN_COLS_P, SUBSCRIPTION_COLS, USER_COLS, query_all,
    query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn json_text(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = EntityType::User.gen_id();
    let now = now();
    let email = input.email.as_ref().map(|e| e.trim().to_lowercase());

    conn.execute(
        "INSERT INTO users (id, name, mobile, email, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![&id, &input.name, &input.mobile, &email, now],
    )?;

    Ok(User {
        id,
        name: input.name.clone(),
        mobile: input.mobile.clone(),
        email,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

// ============ API Tokens ============

/// Issue a bearer token. Returns the stored record and the plaintext, which is
/// not recoverable afterwards.
pub fn create_api_token(
    conn: &Connection,
    user_id: &str,
    name: &str,
    expires_in_days: Option<i64>,
) -> Result<(ApiToken, String)> {
    let id = EntityType::ApiToken.gen_id();
    let now = now();
    let plaintext = generate_token();
    let hash = hash_secret(&plaintext);
    let prefix = token_prefix(&plaintext);
    let expires_at = expires_in_days.map(|d| now + d * 86400);

    conn.execute(
        "INSERT INTO api_tokens (id, user_id, name, token_prefix, token_hash, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, user_id, name, &prefix, &hash, now, expires_at],
    )?;

    let token = ApiToken {
        id,
        user_id: user_id.to_string(),
        name: name.to_string(),
        token_prefix: prefix,
        token_hash: hash,
        created_at: now,
        last_used_at: None,
        expires_at,
        revoked_at: None,
    };
    Ok((token, plaintext))
}

/// Resolve a plaintext bearer token to its user, touching `last_used_at`.
/// Revoked and expired tokens resolve to `None`.
pub fn get_user_by_token(conn: &Connection, plaintext: &str) -> Result<Option<User>> {
    let hash = hash_secret(plaintext);
    let now = now();

    let token: Option<ApiToken> = query_one(
        conn,
        &format!(
            "SELECT {} FROM api_tokens
             WHERE token_hash = ?1 AND revoked_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?2)",
            API_TOKEN_COLS
        ),
        &[&hash, &now],
    )?;

    let Some(token) = token else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE api_tokens SET last_used_at = ?1 WHERE id = ?2",
        params![now, &token.id],
    )?;

    get_user_by_id(conn, &token.user_id)
}

pub fn revoke_api_token(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE api_tokens SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

// ============ Plans ============

pub fn create_plan(conn: &Connection, input: &CreatePlan) -> Result<SubscriptionPlan> {
    let id = EntityType::Plan.gen_id();
    let now = now();
    let duration_days = input
        .duration_days
        .unwrap_or_else(|| SubscriptionType::normalize(&input.slug).duration_days());
    if duration_days <= 0 {
        return Err(AppError::BadRequest("duration_days must be positive".into()));
    }
    let features = serde_json::to_string(&input.features)?;

    conn.execute(
        "INSERT INTO subscription_plans
            (id, slug, name, price, currency, duration_days, cafebazaar_product_id,
             myket_product_id, features, is_active, sort_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11, ?11)",
        params![
            &id,
            &input.slug,
            &input.name,
            input.price.to_string(),
            input.currency.as_ref(),
            duration_days,
            &input.cafebazaar_product_id,
            &input.myket_product_id,
            &features,
            input.sort_order,
            now,
        ],
    )?;

    Ok(SubscriptionPlan {
        id,
        slug: input.slug.clone(),
        name: input.name.clone(),
        price: input.price.clone(),
        currency: input.currency,
        duration_days,
        cafebazaar_product_id: input.cafebazaar_product_id.clone(),
        myket_product_id: input.myket_product_id.clone(),
        features: input.features.clone(),
        is_active: true,
        sort_order: input.sort_order,
        created_at: now,
        updated_at: now,
    })
}

pub fn set_plan_active(conn: &Connection, id: &str, active: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscription_plans SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
        params![active as i32, now(), id],
    )?;
    Ok(affected > 0)
}

pub fn list_active_plans(conn: &Connection) -> Result<Vec<SubscriptionPlan>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscription_plans WHERE is_active = 1 ORDER BY sort_order, duration_days",
            PLAN_COLS
        ),
        &[],
    )
}

pub fn get_plan_by_id(conn: &Connection, id: &str) -> Result<Option<SubscriptionPlan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscription_plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

/// Look up an active plan by id or slug, as accepted from clients.
pub fn get_plan_by_id_or_slug(conn: &Connection, key: &str) -> Result<Option<SubscriptionPlan>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscription_plans
             WHERE (id = ?1 OR slug = ?1) AND is_active = 1",
            PLAN_COLS
        ),
        &[&key],
    )
}

/// Resolve a store SKU to a plan: the platform's own product-id column first,
/// then the legacy alias table.
pub fn get_plan_by_store_product(
    conn: &Connection,
    platform: BillingPlatform,
    product_id: &str,
) -> Result<Option<SubscriptionPlan>> {
    let column = match platform {
        BillingPlatform::CafeBazaar => Some("cafebazaar_product_id"),
        BillingPlatform::Myket => Some("myket_product_id"),
        BillingPlatform::Website => None,
    };

    if let Some(column) = column {
        let direct: Option<SubscriptionPlan> = query_one(
            conn,
            &format!(
                "SELECT {} FROM subscription_plans WHERE {} = ?1 AND is_active = 1",
                PLAN_COLS, column
            ),
            &[&product_id],
        )?;
        if direct.is_some() {
            return Ok(direct);
        }
    }

    query_one(
        conn,
        &format!(
            "SELECT {} FROM plan_product_aliases a
             JOIN subscription_plans p ON p.slug = a.plan_slug
             WHERE a.billing_platform = ?1 AND a.product_id = ?2 AND p.is_active = 1",
            PLAN_COLS_P
        ),
        &[&platform.as_ref(), &product_id],
    )
}

pub fn create_plan_alias(conn: &Connection, alias: &PlanProductAlias) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO plan_product_aliases (billing_platform, product_id, plan_slug)
         VALUES (?1, ?2, ?3)",
        params![
            alias.billing_platform.as_ref(),
            &alias.product_id,
            &alias.plan_slug
        ],
    )?;
    Ok(())
}

// ============ Payments ============

pub fn create_pending_payment(conn: &Connection, input: &CreatePendingPayment) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments
            (id, user_id, amount, currency, payment_method, payment_gateway, billing_platform,
             status, purchase_token, product_id, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10, ?11, ?11)",
        params![
            &id,
            &input.user_id,
            input.amount.to_string(),
            input.currency.as_ref(),
            input.billing_platform.payment_method(),
            input.billing_platform.gateway(),
            input.billing_platform.as_ref(),
            &input.purchase_token,
            &input.product_id,
            json_text(&input.metadata),
            now,
        ],
    )?;

    get_payment_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("pending payment vanished after insert".into()))
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

/// The idempotency key lookup.
pub fn get_payment_by_token(
    conn: &Connection,
    platform: BillingPlatform,
    purchase_token: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE billing_platform = ?1 AND purchase_token = ?2",
            PAYMENT_COLS
        ),
        &[&platform.as_ref(), &purchase_token],
    )
}

/// Atomically record a verified purchase as completed.
///
/// Inserts a new completed row, or flips an existing non-completed row owned
/// by the same user to completed. Returns `None` when the row was already
/// completed (or belongs to someone else): the caller lost the race and must
/// treat the purchase as a duplicate.
pub fn claim_payment(conn: &Connection, input: &CompletePayment, now: i64) -> Result<Option<Payment>> {
    let id = EntityType::Payment.gen_id();
    let sql = format!(
        "INSERT INTO payments
            (id, user_id, amount, currency, payment_method, payment_gateway, billing_platform,
             status, transaction_id, purchase_token, order_id, product_id, purchase_state,
             processed_at, store_response, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'completed', ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?13, ?13)
         ON CONFLICT(billing_platform, purchase_token) DO UPDATE SET
            status = 'completed',
            amount = excluded.amount,
            currency = excluded.currency,
            transaction_id = excluded.transaction_id,
            order_id = COALESCE(excluded.order_id, payments.order_id),
            product_id = COALESCE(excluded.product_id, payments.product_id),
            purchase_state = excluded.purchase_state,
            processed_at = excluded.processed_at,
            store_response = excluded.store_response,
            metadata = COALESCE(excluded.metadata, payments.metadata),
            updated_at = excluded.updated_at
         WHERE payments.status != 'completed' AND payments.user_id = excluded.user_id
         RETURNING {}",
        PAYMENT_COLS
    );

    conn.query_row(
        &sql,
        params![
            &id,
            &input.user_id,
            input.amount.to_string(),
            input.currency.as_ref(),
            input.billing_platform.payment_method(),
            input.billing_platform.gateway(),
            input.billing_platform.as_ref(),
            &input.transaction_id,
            &input.purchase_token,
            &input.order_id,
            &input.product_id,
            input.purchase_state,
            now,
            json_text(&input.store_response),
            json_text(&input.metadata),
        ],
        <Payment as super::from_row::FromRow>::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn set_payment_subscription(conn: &Connection, payment_id: &str, subscription_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE payments SET subscription_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![subscription_id, now(), payment_id],
    )?;
    Ok(())
}

/// Mark a pending payment failed. Completed payments are never touched.
pub fn mark_payment_failed(
    conn: &Connection,
    payment_id: &str,
    store_response: Option<&serde_json::Value>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments
         SET status = 'failed', store_response = COALESCE(?1, store_response), updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![store_response.map(|v| v.to_string()), now(), payment_id],
    )?;
    Ok(affected > 0)
}

pub fn mark_payment_acknowledged(conn: &Connection, payment_id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE payments SET is_acknowledged = 1, acknowledged_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'completed' AND is_acknowledged = 0",
        params![now, payment_id],
    )?;
    Ok(affected > 0)
}

pub fn count_user_payments(conn: &Connection, user_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM payments WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn list_user_payments(
    conn: &Connection,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            PAYMENT_COLS
        ),
        &[&user_id, &limit, &offset],
    )
}

/// Completed store payments still waiting for the store-side acknowledgment.
pub fn list_unacknowledged_payments(
    conn: &Connection,
    user_id: &str,
    platform: BillingPlatform,
) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments
             WHERE user_id = ?1 AND billing_platform = ?2
               AND status = 'completed' AND is_acknowledged = 0
             ORDER BY created_at DESC",
            PAYMENT_COLS
        ),
        &[&user_id, &platform.as_ref()],
    )
}

// ============ Subscriptions ============

pub fn get_subscription_by_id(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

/// The user's subscription that is active and not yet past its end date.
pub fn get_active_subscription(conn: &Connection, user_id: &str, now: i64) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions
             WHERE user_id = ?1 AND status = 'active' AND end_date > ?2",
            SUBSCRIPTION_COLS
        ),
        &[&user_id, &now],
    )
}

/// Flip the user's lapsed `active` rows to `expired`, freeing the one-active slot.
pub fn expire_lapsed_for_user(conn: &Connection, user_id: &str, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = 'expired', updated_at = ?1
         WHERE user_id = ?2 AND status = 'active' AND end_date <= ?1",
        params![now, user_id],
    )?;
    Ok(affected)
}

pub fn create_subscription(conn: &Connection, input: &CreateSubscription) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO subscriptions
            (id, user_id, plan_id, type, price, currency, status, start_date, end_date,
             billing_platform, auto_renew, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            &id,
            &input.user_id,
            &input.plan_id,
            input.subscription_type.as_ref(),
            input.price.to_string(),
            input.currency.as_ref(),
            input.start_date,
            input.end_date,
            input.billing_platform.as_ref(),
            input.auto_renew as i32,
            now,
        ],
    )?;

    Ok(Subscription {
        id,
        user_id: input.user_id.clone(),
        plan_id: input.plan_id.clone(),
        subscription_type: input.subscription_type,
        price: input.price.clone(),
        currency: input.currency,
        status: SubscriptionStatus::Active,
        start_date: input.start_date,
        end_date: input.end_date,
        billing_platform: input.billing_platform,
        auto_renew: input.auto_renew,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// Push an active subscription's end date out and move it onto `plan`.
pub fn extend_subscription(
    conn: &Connection,
    id: &str,
    plan: &SubscriptionPlan,
    new_end_date: i64,
    platform: BillingPlatform,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "UPDATE subscriptions
             SET end_date = ?1, plan_id = ?2, type = ?3, price = ?4, currency = ?5,
                 billing_platform = ?6, updated_at = ?7
             WHERE id = ?8 AND status = 'active'
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        &[
            &new_end_date,
            &plan.id,
            &plan.subscription_type().as_ref(),
            &plan.price.to_string(),
            &plan.currency.as_ref(),
            &platform.as_ref(),
            &now(),
            &id,
        ],
    )
}

pub fn count_user_subscriptions(conn: &Connection, user_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM subscriptions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn list_user_subscriptions(
    conn: &Connection,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            SUBSCRIPTION_COLS
        ),
        &[&user_id, &limit, &offset],
    )
}

/// Cancel a pending or active subscription. Returns the updated row, or
/// `None` if it was already cancelled or expired.
pub fn cancel_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    let now = now();
    query_one(
        conn,
        &format!(
            "UPDATE subscriptions
             SET status = 'cancelled', auto_renew = 0, cancelled_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status IN ('pending', 'active')
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        &[&now, &id],
    )
}

// ============ Maintenance ============

pub fn expire_lapsed_subscriptions(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = 'expired', updated_at = ?1
         WHERE status = 'active' AND end_date <= ?1",
        params![now],
    )?;
    Ok(affected)
}

/// Fail website checkouts that never came back from the gateway.
pub fn fail_stale_pending_payments(conn: &Connection, older_than: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE payments SET status = 'failed', updated_at = ?1
         WHERE status = 'pending' AND created_at < ?2",
        params![now(), older_than],
    )?;
    Ok(affected)
}
