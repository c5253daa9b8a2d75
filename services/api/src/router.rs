//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ChatRequest, ChatResponse, ConversationView, ErrorResponse, HealthResponse, TurnView,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::send_chat,
        handlers::list_conversations,
    ),
    components(
        schemas(
            HealthResponse,
            ChatRequest,
            ChatResponse,
            ConversationView,
            TurnView,
            ErrorResponse
        )
    ),
    tags(
        (name = "FieldVoice API", description = "Live voice and text advisory sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/chat/send", post(handlers::send_chat))
        .route(
            "/users/{user_id}/conversations",
            get(handlers::list_conversations),
        )
        .route("/ws/{user_id}", get(ws_handler))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_rest_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        assert!(paths.contains(&"/health".to_string()));
        assert!(paths.contains(&"/users/{user_id}/conversations".to_string()));
        assert!(doc.paths.paths["/chat/send"].post.is_some());
    }
}
