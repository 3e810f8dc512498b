use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    carts::{models::CartView, mutations::parse_quantity},
    sessions::SessionContext,
};

/// Cart routes. Anonymous and logged in visitors use the same endpoints; the
/// session decides whose cart is meant.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_cart))
        .routes(utoipa_axum::routes!(add_item))
        .routes(utoipa_axum::routes!(update_item, remove_item))
}

/// Fetch the caller's cart with its lines and total.
#[utoipa::path(
    get,
    path = "/cart",
    tags = ["Cart"],
    security(("sessionCookie" = [])),
    responses(
        (status = 200, description = "Get cart successfully", body = StdResponse<CartView, String>)
    )
)]
async fn get_cart(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state.carts().current(&session).await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Get cart successfully"),
    })
}

fn default_quantity() -> Value {
    Value::from(1)
}

#[derive(Deserialize, ToSchema)]
struct AddItemReq {
    pub product_id: i32,
    /// A positive integer, as a number or a numeric string. Defaults to 1.
    #[serde(default = "default_quantity")]
    #[schema(value_type = i64, example = 1)]
    pub quantity: Value,
}

/// Add a product to the caller's cart, incrementing its line when present.
#[utoipa::path(
    post,
    path = "/cart/items",
    tags = ["Cart"],
    security(("sessionCookie" = [])),
    request_body = AddItemReq,
    responses(
        (status = 200, description = "Add product to cart successfully", body = StdResponse<CartView, String>),
        (status = 400, description = "Quantity is not a positive integer"),
        (status = 404, description = "Product does not exist")
    )
)]
async fn add_item(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<AddItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let quantity = parse_quantity(&body.quantity)?;
    let cart = state
        .carts()
        .add(&session, body.product_id, quantity)
        .await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Add product to cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateItemReq {
    /// Zero or a negative amount removes the line.
    #[schema(value_type = i64, example = 2)]
    pub quantity: Value,
}

/// Set the quantity of one of the caller's cart lines.
#[utoipa::path(
    patch,
    path = "/cart/items/{id}",
    tags = ["Cart"],
    security(("sessionCookie" = [])),
    params(
        ("id" = i32, Path, description = "Cart item ID to update")
    ),
    request_body = UpdateItemReq,
    responses(
        (status = 200, description = "Update cart item successfully", body = StdResponse<CartView, String>),
        (status = 400, description = "Quantity is not an integer"),
        (status = 404, description = "Cart item does not exist in the caller's cart")
    )
)]
async fn update_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<UpdateItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state
        .carts()
        .update_quantity(&session, id, &body.quantity)
        .await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Update cart item successfully"),
    })
}

/// Remove one of the caller's cart lines.
#[utoipa::path(
    delete,
    path = "/cart/items/{id}",
    tags = ["Cart"],
    security(("sessionCookie" = [])),
    params(
        ("id" = i32, Path, description = "Cart item ID to remove")
    ),
    responses(
        (status = 200, description = "Remove cart item successfully", body = StdResponse<CartView, String>),
        (status = 404, description = "Cart item does not exist in the caller's cart")
    )
)]
async fn remove_item(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state.carts().remove(&session, id).await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Remove cart item successfully"),
    })
}
