pub mod auth;
pub mod carts;
pub mod catalog;
pub mod orders;

use axum::{Router, middleware};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app::{app_error::AppError, app_state::AppState, swagger},
    sessions::{SessionContext, session_middleware},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(catalog::routes_with_openapi())
        .merge(carts::routes_with_openapi())
        .merge(auth::routes_with_openapi())
        .merge(orders::routes_with_openapi())
}

/// API routes behind the session middleware, plus Swagger UI.
pub fn app(state: &AppState) -> Router<AppState> {
    let routes = routes_with_openapi();

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Storefront API")
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi, &state.config.session.cookie_name);

    Router::new()
        .merge(routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ))
        .merge(swagger_ui)
}

fn require_user(session: &SessionContext) -> Result<i32, AppError> {
    session.user_id().ok_or(AppError::Unauthorized)
}
