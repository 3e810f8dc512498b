use axum::Router;
use utoipa::openapi::{
    OpenApi,
    security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::app::app_state::AppState;

/// Serves the OpenAPI document and Swagger UI. The session cookie is
/// registered as the security scheme handlers reference.
pub fn create_swagger_ui(mut openapi: OpenApi, cookie_name: &str) -> Router<AppState> {
    let components = openapi.components.get_or_insert_with(Default::default);
    components.add_security_scheme(
        "sessionCookie",
        SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(cookie_name))),
    );

    Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
}
