use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::models::BillingPlatform;
use crate::money::Currency;
use crate::subscription_type::SubscriptionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

/// An entitlement period. A user may have many historical rows but at most
/// one with status `active` (enforced by a partial unique index).
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub subscription_type: SubscriptionType,
    pub price: BigDecimal,
    pub currency: Currency,
    pub status: SubscriptionStatus,
    pub start_date: i64,
    pub end_date: i64,
    pub billing_platform: BillingPlatform,
    pub auto_renew: bool,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Active means both the status flag and an end date still in the future.
    pub fn is_active_at(&self, now: i64) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }

    /// Whole days left, rounded up. Zero once expired.
    pub fn days_remaining(&self, now: i64) -> i64 {
        if !self.is_active_at(now) {
            return 0;
        }
        (self.end_date - now + 86399) / 86400
    }
}

#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub user_id: String,
    pub plan_id: String,
    pub subscription_type: SubscriptionType,
    pub price: BigDecimal,
    pub currency: Currency,
    pub start_date: i64,
    pub end_date: i64,
    pub billing_platform: BillingPlatform,
    pub auto_renew: bool,
}
