use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::money::Currency;

/// The purchase channel. Each has its own receipt-verification API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BillingPlatform {
    /// Direct web checkout through ZarinPal
    Website,
    CafeBazaar,
    Myket,
}

impl BillingPlatform {
    /// Gateway name recorded on the payment row.
    pub fn gateway(&self) -> &'static str {
        match self {
            Self::Website => "zarinpal",
            Self::CafeBazaar => "cafebazaar",
            Self::Myket => "myket",
        }
    }

    pub fn payment_method(&self) -> &'static str {
        match self {
            Self::Website => "online",
            Self::CafeBazaar | Self::Myket => "in_app_purchase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// One purchase attempt.
///
/// Immutable once `Completed`, except for the acknowledgment flags.
#[derive(Debug, Clone)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    pub subscription_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub payment_method: String,
    pub payment_gateway: String,
    pub billing_platform: BillingPlatform,
    pub status: PaymentStatus,
    /// Gateway reference (ZarinPal ref_id, store order id)
    pub transaction_id: Option<String>,
    /// Store purchase token, or the ZarinPal authority for website payments.
    /// Unique per billing platform.
    pub purchase_token: String,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub purchase_state: Option<i32>,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<i64>,
    pub processed_at: Option<i64>,
    /// Raw verification payload from the billing platform
    pub store_response: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// A website checkout waiting for the gateway callback.
#[derive(Debug, Clone)]
pub struct CreatePendingPayment {
    pub user_id: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub billing_platform: BillingPlatform,
    pub purchase_token: String,
    pub product_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Everything known about a verified purchase at the moment it is recorded.
#[derive(Debug, Clone)]
pub struct CompletePayment {
    pub user_id: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub billing_platform: BillingPlatform,
    pub purchase_token: String,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    pub purchase_state: Option<i32>,
    pub store_response: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}
