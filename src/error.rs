use std::collections::BTreeMap;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::response::ApiResponse;

/// Field name → list of messages, serialized as the `errors` object.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// User-facing (Persian) messages. Keep these free of internal detail.
pub mod msg {
    pub const VALIDATION_FAILED: &str = "اطلاعات ارسال‌شده نامعتبر است";
    pub const INVALID_JSON: &str = "بدنه درخواست باید JSON معتبر باشد";
    pub const INVALID_QUERY: &str = "پارامترهای درخواست نامعتبر است";
    pub const UNAUTHENTICATED: &str = "احراز هویت انجام نشده است";
    pub const FORBIDDEN: &str = "شما اجازه دسترسی به این منبع را ندارید";
    pub const NOT_FOUND: &str = "منبع مورد نظر یافت نشد";
    pub const INTERNAL: &str = "خطای داخلی سرور رخ داد. لطفاً بعداً دوباره تلاش کنید";
    pub const RATE_LIMITED: &str = "تعداد درخواست‌ها بیش از حد مجاز است. لطفاً کمی بعد دوباره تلاش کنید";

    pub const PLAN_NOT_FOUND: &str = "پلن اشتراک یافت نشد";
    pub const PLAN_MAPPING_MISSING: &str = "محصول خریداری‌شده به هیچ پلن اشتراکی متصل نیست";
    pub const PLANS_LISTED: &str = "فهرست پلن‌های اشتراک";

    pub const PURCHASE_VERIFIED: &str = "خرید با موفقیت تأیید شد و اشتراک فعال شد";
    pub const PURCHASE_RENEWED: &str = "خرید تأیید شد و اشتراک شما تمدید شد";
    pub const PURCHASE_DUPLICATE: &str = "این خرید قبلاً ثبت و اعمال شده است";
    pub const PURCHASE_INVALID: &str = "رسید خرید نامعتبر یا منقضی شده است";
    pub const PURCHASE_NOT_OWNED: &str = "این خرید متعلق به حساب کاربری دیگری است";

    pub const SERVICE_NOT_CONFIGURED: &str = "سرویس پرداخت در حال حاضر در دسترس نیست";
    pub const UPSTREAM_UNAVAILABLE: &str =
        "ارتباط با سرویس پرداخت برقرار نشد. لطفاً دوباره تلاش کنید";

    pub const PAYMENT_CREATED: &str = "درگاه پرداخت آماده است";
    pub const PAYMENT_NOT_FOUND: &str = "پرداخت یافت نشد";
    pub const PAYMENT_CANCELLED: &str = "پرداخت توسط کاربر لغو شد یا ناموفق بود";
    pub const PAYMENT_FAILED: &str = "پرداخت تأیید نشد";
    pub const PAYMENTS_LISTED: &str = "تاریخچه پرداخت‌ها";

    pub const ACKNOWLEDGED: &str = "تأیید خرید به فروشگاه ارسال شد";
    pub const ACKNOWLEDGE_FAILED: &str = "ارسال تأیید خرید به فروشگاه ناموفق بود";

    pub const SUBSCRIPTION_STATUS: &str = "وضعیت اشتراک";
    pub const SUBSCRIPTIONS_LISTED: &str = "تاریخچه اشتراک‌ها";
    pub const SUBSCRIPTION_NOT_FOUND: &str = "اشتراک یافت نشد";
    pub const SUBSCRIPTION_CANCELLED: &str = "اشتراک لغو شد";
    pub const SUBSCRIPTION_NOT_CANCELLABLE: &str = "این اشتراک قابل لغو نیست";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The billing platform rejected the receipt. `detail` is already sanitized.
    #[error("Store rejected purchase: {detail:?}")]
    StoreRejected { detail: Option<String> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Decimal error: {0}")]
    Decimal(#[from] bigdecimal::ParseBigDecimalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) | AppError::StoreRejected { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Json(_)
            | AppError::Decimal(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Single-field validation error.
    pub fn field(field: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        AppError::Validation(errors)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("مقدار فیلد {} نامعتبر است", field))
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        AppError::Validation(fields)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("JSON body rejected: {}", rejection.body_text());
        AppError::field("body", msg::INVALID_JSON)
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!("Query rejected: {}", rejection.body_text());
        AppError::field("query", msg::INVALID_QUERY)
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!("Path rejected: {}", rejection.body_text());
        AppError::NotFound(msg::NOT_FOUND.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, errors) = match self {
            AppError::Validation(fields) => (msg::VALIDATION_FAILED.to_string(), Some(json!(fields))),
            AppError::BadRequest(m) => (m, None),
            AppError::StoreRejected { detail } => (
                msg::PURCHASE_INVALID.to_string(),
                detail.map(|d| json!({ "store": [d] })),
            ),
            AppError::Unauthorized => (msg::UNAUTHENTICATED.to_string(), None),
            AppError::Forbidden(m) => (m, None),
            AppError::NotFound(m) => (m, None),
            AppError::ServiceUnavailable(m) => (m, None),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (msg::INTERNAL.to_string(), None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (msg::INTERNAL.to_string(), None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (msg::INTERNAL.to_string(), None)
            }
            AppError::Decimal(e) => {
                tracing::error!("Stored amount is not a valid decimal: {}", e);
                (msg::INTERNAL.to_string(), None)
            }
            AppError::Internal(m) => {
                tracing::error!("Internal error: {}", m);
                (msg::INTERNAL.to_string(), None)
            }
        };

        (status, ApiResponse::<()>::failure(message, errors)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Converts `Option<T>` lookups into `AppError::NotFound`.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}
