use axum::{Extension, extract::State};

use crate::db::{AppState, queries};
use crate::error::{Result, msg};
use crate::extractors::Query;
use crate::middleware::AuthUser;
use crate::pagination::{Paginated, PaginationQuery};
use crate::response::ApiResponse;

use super::dto::PaymentView;

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<PaginationQuery>,
) -> Result<ApiResponse<Paginated<PaymentView>>> {
    let conn = state.db.get()?;
    let (limit, offset) = (page.limit(), page.offset());

    let total = queries::count_user_payments(&conn, auth.id())?;
    let items = queries::list_user_payments(&conn, auth.id(), limit, offset)?
        .iter()
        .map(|p| PaymentView::new(p, state.response_currency))
        .collect();

    Ok(ApiResponse::ok(
        msg::PAYMENTS_LISTED,
        Paginated::new(items, total, limit, offset),
    ))
}
