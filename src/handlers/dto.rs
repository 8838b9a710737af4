//! Request bodies and response views.
//!
//! Views carry amounts already converted to the configured response currency,
//! serialized as JSON numbers.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::fulfillment::FulfillmentOutcome;
use crate::models::{BillingPlatform, Payment, PaymentStatus, Subscription, SubscriptionPlan, SubscriptionStatus};
use crate::money::{Currency, Money, to_number};
use crate::subscription_type::SubscriptionType;

// ============ Requests ============

/// Characters a store token or SKU may contain. Both end up as URL path
/// segments upstream, so separators and dot-only segments are refused.
static STORE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._:-]+$").expect("Failed to create store identifier regex")
});

fn validate_store_identifier(value: &str) -> Result<(), ValidationError> {
    if STORE_IDENTIFIER.is_match(value) && value.chars().any(|c| c != '.') {
        return Ok(());
    }
    Err(ValidationError::new("store_identifier")
        .with_message(Cow::Borrowed("فقط حروف لاتین، اعداد و . _ : - مجاز است")))
}

/// Receipt submitted by the Android app after an in-app purchase.
#[derive(Debug, Deserialize, Validate)]
pub struct StorePurchaseRequest {
    #[serde(default)]
    #[validate(
        length(min = 10, max = 2048, message = "توکن خرید نامعتبر است"),
        custom(function = "validate_store_identifier")
    )]
    pub purchase_token: String,
    #[serde(default)]
    #[validate(
        length(min = 1, max = 255, message = "شناسه محصول الزامی است"),
        custom(function = "validate_store_identifier")
    )]
    pub product_id: String,
    #[serde(default)]
    #[validate(length(max = 255, message = "شناسه سفارش بیش از حد طولانی است"))]
    pub order_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcknowledgeRequest {
    #[serde(default)]
    #[validate(
        length(min = 10, max = 2048, message = "توکن خرید نامعتبر است"),
        custom(function = "validate_store_identifier")
    )]
    pub purchase_token: String,
}

/// Website checkout: the plan to buy, by id or slug.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "انتخاب پلن الزامی است"))]
    pub plan: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ZarinPalVerifyRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "کد پیگیری پرداخت الزامی است"))]
    pub authority: String,
}

/// Query string ZarinPal appends to the callback URL.
#[derive(Debug, Deserialize)]
pub struct ZarinPalCallbackQuery {
    #[serde(rename = "Authority")]
    pub authority: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

// ============ Views ============

#[derive(Debug, Serialize)]
pub struct PlanView {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    pub price: f64,
    pub currency: Currency,
    pub duration_days: i64,
    pub features: Vec<String>,
    pub cafebazaar_product_id: Option<String>,
    pub myket_product_id: Option<String>,
}

impl PlanView {
    pub fn new(plan: &SubscriptionPlan, currency: Currency) -> Self {
        let price = plan.price().in_currency(currency);
        Self {
            id: plan.id.clone(),
            slug: plan.slug.clone(),
            name: plan.name.clone(),
            subscription_type: plan.subscription_type(),
            price: to_number(&price.amount),
            currency: price.currency,
            duration_days: plan.duration_days,
            features: plan.features.clone(),
            cafebazaar_product_id: plan.cafebazaar_product_id.clone(),
            myket_product_id: plan.myket_product_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    pub plan_id: String,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    pub status: SubscriptionStatus,
    pub price: f64,
    pub currency: Currency,
    pub start_date: i64,
    pub end_date: i64,
    pub billing_platform: BillingPlatform,
    pub auto_renew: bool,
    pub cancelled_at: Option<i64>,
    pub is_active: bool,
    pub days_remaining: i64,
    pub created_at: i64,
}

impl SubscriptionView {
    pub fn new(sub: &Subscription, currency: Currency, now: i64) -> Self {
        let price = Money::new(sub.price.clone(), sub.currency).in_currency(currency);
        Self {
            id: sub.id.clone(),
            plan_id: sub.plan_id.clone(),
            subscription_type: sub.subscription_type,
            status: sub.status,
            price: to_number(&price.amount),
            currency: price.currency,
            start_date: sub.start_date,
            end_date: sub.end_date,
            billing_platform: sub.billing_platform,
            auto_renew: sub.auto_renew,
            cancelled_at: sub.cancelled_at,
            is_active: sub.is_active_at(now),
            days_remaining: sub.days_remaining(now),
            created_at: sub.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: String,
    pub subscription_id: Option<String>,
    #[serde(flatten)]
    pub amount: Money,
    pub payment_method: String,
    pub payment_gateway: String,
    pub billing_platform: BillingPlatform,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub purchase_state: Option<i32>,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<i64>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}

impl PaymentView {
    pub fn new(payment: &Payment, currency: Currency) -> Self {
        Self {
            id: payment.id.clone(),
            subscription_id: payment.subscription_id.clone(),
            amount: Money::new(payment.amount.clone(), payment.currency).in_currency(currency),
            payment_method: payment.payment_method.clone(),
            payment_gateway: payment.payment_gateway.clone(),
            billing_platform: payment.billing_platform,
            status: payment.status,
            transaction_id: payment.transaction_id.clone(),
            order_id: payment.order_id.clone(),
            product_id: payment.product_id.clone(),
            purchase_state: payment.purchase_state,
            is_acknowledged: payment.is_acknowledged,
            acknowledged_at: payment.acknowledged_at,
            processed_at: payment.processed_at,
            created_at: payment.created_at,
        }
    }
}

/// Result of a purchase verification, new or duplicate.
#[derive(Debug, Serialize)]
pub struct PurchaseResult {
    pub payment: PaymentView,
    pub subscription: Option<SubscriptionView>,
    pub is_duplicate: bool,
    pub renewed: bool,
    /// Store-side acknowledgment; absent for platforms that have none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<bool>,
}

impl PurchaseResult {
    pub fn new(outcome: &FulfillmentOutcome, currency: Currency, now: i64) -> Self {
        Self {
            payment: PaymentView::new(&outcome.payment, currency),
            subscription: outcome
                .subscription
                .as_ref()
                .map(|s| SubscriptionView::new(s, currency, now)),
            is_duplicate: outcome.is_duplicate,
            renewed: outcome.renewed,
            acknowledged: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionStatusView {
    pub has_active_subscription: bool,
    pub subscription: Option<SubscriptionView>,
    pub days_remaining: i64,
}

impl SubscriptionStatusView {
    pub fn new(active: Option<&Subscription>, currency: Currency, now: i64) -> Self {
        Self {
            has_active_subscription: active.is_some_and(|s| s.is_active_at(now)),
            subscription: active.map(|s| SubscriptionView::new(s, currency, now)),
            days_remaining: active.map(|s| s.days_remaining(now)).unwrap_or(0),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CafeBazaarStatusView {
    #[serde(flatten)]
    pub status: SubscriptionStatusView,
    /// Completed CafeBazaar purchases the store has not been told about yet
    pub pending_acknowledgments: Vec<PaymentView>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutView {
    pub payment_id: String,
    pub authority: String,
    pub payment_url: String,
    pub amount: f64,
    pub currency: Currency,
}

impl CheckoutView {
    pub fn new(payment: &Payment, payment_url: String, currency: Currency) -> Self {
        let amount = Money::new(payment.amount.clone(), payment.currency).in_currency(currency);
        Self {
            payment_id: payment.id.clone(),
            authority: payment.purchase_token.clone(),
            payment_url,
            amount: to_number(&amount.amount),
            currency,
        }
    }
}
