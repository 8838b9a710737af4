use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::models::BillingPlatform;
use crate::money::{Currency, Money};
use crate::subscription_type::SubscriptionType;

/// Catalog entry. Reference data maintained by admins.
#[derive(Debug, Clone)]
pub struct SubscriptionPlan {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub price: BigDecimal,
    pub currency: Currency,
    pub duration_days: i64,
    /// SKU configured for this plan in the CafeBazaar developer panel
    pub cafebazaar_product_id: Option<String>,
    /// SKU configured for this plan in the Myket developer panel
    pub myket_product_id: Option<String>,
    pub features: Vec<String>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SubscriptionPlan {
    pub fn subscription_type(&self) -> SubscriptionType {
        SubscriptionType::normalize(&self.slug)
    }

    pub fn price(&self) -> Money {
        Money::new(self.price.clone(), self.currency)
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_days * 86400
    }

    /// The store SKU for this plan on the given platform, if any.
    pub fn store_product_id(&self, platform: BillingPlatform) -> Option<&str> {
        match platform {
            BillingPlatform::CafeBazaar => self.cafebazaar_product_id.as_deref(),
            BillingPlatform::Myket => self.myket_product_id.as_deref(),
            BillingPlatform::Website => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlan {
    pub slug: String,
    pub name: String,
    pub price: BigDecimal,
    pub currency: Currency,
    /// Defaults to the canonical duration of the slug's subscription type
    #[serde(default)]
    pub duration_days: Option<i64>,
    #[serde(default)]
    pub cafebazaar_product_id: Option<String>,
    #[serde(default)]
    pub myket_product_id: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub sort_order: i32,
}

/// Legacy store SKU → plan slug mapping, consulted when no plan carries the SKU
/// in its platform-specific column.
#[derive(Debug, Clone)]
pub struct PlanProductAlias {
    pub billing_platform: BillingPlatform,
    pub product_id: String,
    pub plan_slug: String,
}
