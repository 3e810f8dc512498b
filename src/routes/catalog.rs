use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    catalog::{Category, ProductView},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_products))
        .routes(utoipa_axum::routes!(get_product))
        .routes(utoipa_axum::routes!(get_categories))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ProductsQuery {
    /// Only list products of this category.
    pub category_id: Option<i32>,
}

/// List products, newest first.
#[utoipa::path(
    get,
    path = "/products",
    tags = ["Catalog"],
    params(ProductsQuery),
    responses(
        (status = 200, description = "Get products successfully", body = StdResponse<Vec<ProductView>, String>)
    )
)]
async fn get_products(
    State(state): State<AppState>,
    Query(query): Query<ProductsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let products = state.store.list_products(query.category_id).await?;

    Ok(StdResponse {
        data: Some(
            products
                .into_iter()
                .map(ProductView::from)
                .collect::<Vec<_>>(),
        ),
        message: Some("Get products successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/products/{id}",
    tags = ["Catalog"],
    params(
        ("id" = i32, Path, description = "Product ID to fetch")
    ),
    responses(
        (status = 200, description = "Get product successfully", body = StdResponse<ProductView, String>),
        (status = 404, description = "Product does not exist")
    )
)]
async fn get_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let product = state
        .store
        .get_product(id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(ProductView::from(product)),
        message: Some("Get product successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/categories",
    tags = ["Catalog"],
    responses(
        (status = 200, description = "Get categories successfully", body = StdResponse<Vec<Category>, String>)
    )
)]
async fn get_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let categories = state.store.list_categories().await?;

    Ok(StdResponse {
        data: Some(categories),
        message: Some("Get categories successfully"),
    })
}
