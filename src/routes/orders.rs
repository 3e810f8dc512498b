use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use utoipa_axum::router::OpenApiRouter;

use super::require_user;
use crate::{
    app::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    orders::{OrderView, checkout},
    sessions::SessionContext,
};

/// Order routes. All of them require a logged in user.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_my_orders, create_order))
        .routes(utoipa_axum::routes!(get_order))
}

/// Fetch the caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/orders",
    tags = ["Orders"],
    security(("sessionCookie" = [])),
    responses(
        (status = 200, description = "Get orders successfully", body = StdResponse<Vec<OrderView>, String>),
        (status = 401, description = "Not logged in")
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = require_user(&session)?;

    let orders = state.store.orders_for_user(user_id).await?;

    Ok(StdResponse {
        data: Some(
            orders
                .into_iter()
                .map(OrderView::from)
                .collect::<Vec<_>>(),
        ),
        message: Some("Get orders successfully"),
    })
}

/// Fetch one of the caller's orders.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    tags = ["Orders"],
    security(("sessionCookie" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderView, String>),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Order does not exist or belongs to someone else")
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = require_user(&session)?;

    let order = state
        .store
        .order_for_user(user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(OrderView::from(order)),
        message: Some("Get order successfully"),
    })
}

/// Place an order from the caller's cart and empty the cart.
#[utoipa::path(
    post,
    path = "/orders",
    tags = ["Orders"],
    security(("sessionCookie" = [])),
    responses(
        (status = 201, description = "Create order successfully", body = StdResponse<OrderView, String>),
        (status = 400, description = "The cart is empty"),
        (status = 401, description = "Not logged in")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    require_user(&session)?;

    let order = checkout(&state.carts(), state.store.as_ref(), &session).await?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(OrderView::from(order)),
            message: Some("Create order successfully"),
        },
    ))
}
