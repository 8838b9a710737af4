use axum::{Extension, extract::State};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::ValidatedJson;
use crate::middleware::AuthUser;

use super::dto::StorePurchaseRequest;
use super::purchases::{PurchaseResponse, verify_store_purchase};

pub async fn verify(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(request): ValidatedJson<StorePurchaseRequest>,
) -> Result<PurchaseResponse> {
    verify_store_purchase(&state, &state.myket, &auth, request).await
}
