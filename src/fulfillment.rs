//! Recording a verified purchase: payment claim plus subscription
//! activation or extension, as one database transaction.
//!
//! External verification happens before any of this, outside the transaction.
//! A purchase is identified by `(billing_platform, purchase_token)`; the unique
//! index on that pair and the conditional upsert in `claim_payment` make
//! concurrent submissions of the same receipt resolve to exactly one winner.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result, msg};
use crate::models::{
    BillingPlatform, CompletePayment, CreateSubscription, Payment, Subscription, SubscriptionPlan,
};
use crate::util::token_prefix;

/// What happened to a submitted purchase.
#[derive(Debug, Clone)]
pub struct FulfillmentOutcome {
    pub payment: Payment,
    pub subscription: Option<Subscription>,
    /// The purchase had already been applied; nothing changed.
    pub is_duplicate: bool,
    /// An existing active subscription was extended rather than a new one created.
    pub renewed: bool,
}

impl FulfillmentOutcome {
    fn duplicate(conn: &Connection, payment: Payment) -> Result<Self> {
        let subscription = match &payment.subscription_id {
            Some(id) => queries::get_subscription_by_id(conn, id)?,
            None => None,
        };
        Ok(Self {
            payment,
            subscription,
            is_duplicate: true,
            renewed: false,
        })
    }
}

/// Idempotency pre-check, run before calling the billing platform.
///
/// * payment owned by another user → 403
/// * completed payment → the recorded outcome, flagged as duplicate
/// * pending, failed, or unknown → `None`; the caller proceeds to verification
pub fn find_completed_purchase(
    conn: &Connection,
    user_id: &str,
    platform: BillingPlatform,
    purchase_token: &str,
) -> Result<Option<FulfillmentOutcome>> {
    let Some(payment) = queries::get_payment_by_token(conn, platform, purchase_token)? else {
        return Ok(None);
    };

    if payment.user_id != user_id {
        tracing::warn!(
            user_id,
            owner = %payment.user_id,
            platform = platform.as_ref(),
            token = %token_prefix(purchase_token),
            "Purchase token submitted by a user who does not own it"
        );
        return Err(AppError::Forbidden(msg::PURCHASE_NOT_OWNED.into()));
    }

    if !payment.is_completed() {
        return Ok(None);
    }

    FulfillmentOutcome::duplicate(conn, payment).map(Some)
}

/// Apply a verified purchase.
///
/// In one IMMEDIATE transaction: claim the payment, expire the user's lapsed
/// active rows, then extend the active subscription by the plan's duration
/// (chaining from its current end date) or start a new one at `now`, and link
/// the payment to it. Any failure rolls all of it back.
pub fn fulfill_purchase(
    conn: &mut Connection,
    plan: &SubscriptionPlan,
    input: &CompletePayment,
    now: i64,
) -> Result<FulfillmentOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(mut payment) = queries::claim_payment(&tx, input, now)? else {
        // Completed already, or the token belongs to someone else.
        drop(tx);
        let existing =
            queries::get_payment_by_token(conn, input.billing_platform, &input.purchase_token)?
                .ok_or_else(|| AppError::Internal("payment claim lost but no row found".into()))?;
        if existing.user_id != input.user_id {
            return Err(AppError::Forbidden(msg::PURCHASE_NOT_OWNED.into()));
        }
        tracing::info!(
            user_id = %input.user_id,
            platform = input.billing_platform.as_ref(),
            token = %token_prefix(&input.purchase_token),
            "Purchase was completed by a concurrent request"
        );
        return FulfillmentOutcome::duplicate(conn, existing);
    };

    queries::expire_lapsed_for_user(&tx, &input.user_id, now)?;

    let (subscription, renewed) = match queries::get_active_subscription(&tx, &input.user_id, now)? {
        Some(active) => {
            let new_end = active.end_date + plan.duration_secs();
            let extended =
                queries::extend_subscription(&tx, &active.id, plan, new_end, input.billing_platform)?
                    .ok_or_else(|| AppError::Internal("active subscription vanished".into()))?;
            (extended, true)
        }
        None => {
            let created = queries::create_subscription(
                &tx,
                &CreateSubscription {
                    user_id: input.user_id.clone(),
                    plan_id: plan.id.clone(),
                    subscription_type: plan.subscription_type(),
                    price: plan.price.clone(),
                    currency: plan.currency,
                    start_date: now,
                    end_date: now + plan.duration_secs(),
                    billing_platform: input.billing_platform,
                    auto_renew: false,
                },
            )?;
            (created, false)
        }
    };

    queries::set_payment_subscription(&tx, &payment.id, &subscription.id)?;
    tx.commit()?;

    payment.subscription_id = Some(subscription.id.clone());

    tracing::info!(
        user_id = %input.user_id,
        platform = input.billing_platform.as_ref(),
        payment_id = %payment.id,
        subscription_id = %subscription.id,
        plan = %plan.slug,
        end_date = subscription.end_date,
        renewed,
        "Purchase fulfilled"
    );

    Ok(FulfillmentOutcome {
        payment,
        subscription: Some(subscription),
        is_duplicate: false,
        renewed,
    })
}
