use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod documents;
pub mod health;
pub mod messages;
pub mod realtime;
pub mod reports;
pub mod request_types;
pub mod requests;
pub mod status_history;
pub mod users;

const MIN_BODY_LIMIT: usize = 16 * 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    // Uploads enforce their own limit; leave room so they can answer 413 themselves.
    let body_limit = MIN_BODY_LIMIT.max(state.config.max_upload_bytes + 1024 * 1024);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/me", get(auth::me));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        );

    let request_types_routes = Router::new()
        .route(
            "/",
            get(request_types::list_request_types).post(request_types::create_request_type),
        )
        .route(
            "/:id",
            get(request_types::get_request_type)
                .put(request_types::update_request_type)
                .delete(request_types::delete_request_type),
        );

    let requests_routes = Router::new()
        .route(
            "/",
            get(requests::list_requests).post(requests::create_request),
        )
        .route(
            "/:id",
            get(requests::get_request)
                .put(requests::update_request)
                .delete(requests::delete_request),
        )
        .route("/:id/status", post(requests::transition_request));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route("/upload", post(documents::upload_document))
        .route("/download/:id", get(documents::download_document))
        .route(
            "/:id",
            get(documents::get_document)
                .put(documents::update_document)
                .delete(documents::delete_document),
        );

    let messages_routes = Router::new()
        .route(
            "/",
            get(messages::list_messages).post(messages::create_message),
        )
        .route("/requete/:id", get(messages::list_request_messages))
        .route("/:id", get(messages::get_message))
        .route("/:id/lu", patch(messages::mark_message_read));

    let status_history_routes = Router::new()
        .route(
            "/",
            get(status_history::list_status_history).post(status_history::create_status_history),
        )
        .route(
            "/:id",
            get(status_history::get_status_history)
                .put(status_history::update_status_history)
                .delete(status_history::delete_status_history),
        );

    let reports_routes = Router::new()
        .route("/excel", get(reports::excel_report))
        .route("/pdf", get(reports::pdf_report));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/request-types", request_types_routes)
        .nest("/api/requests", requests_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/messages", messages_routes)
        .nest("/api/status-history", status_history_routes)
        .nest("/api/reports", reports_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let uploads = ServeDir::new(&state.config.uploads_dir);

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .route("/ws", get(realtime::ws_handler))
        .nest_service("/uploads", uploads)
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
