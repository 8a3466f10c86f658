pub mod cli;
pub mod config;
pub mod entity;
pub mod images;
pub mod logging;
pub mod middleware;
pub mod migration;
pub mod naming;
pub mod openapi;
pub mod storage;
pub mod store;
pub mod validation;
#[cfg(test)]
mod tests;

use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use images::{
    delete_image, get_image, health, list_images, list_images_page, serve_image, upload_image,
};
use sea_orm::DatabaseConnection;
use std::{borrow::Cow, sync::Arc, time::Duration};
use tower::{BoxError, ServiceBuilder};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};
use tracing::error;

use crate::{
    config::ImageConfig, logging::logging_layer, storage::DBError, store::ImageStore,
    validation::Validator,
};

/// Nothing in here is mutated after startup, so requests share it without a lock.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub conn: DatabaseConnection,
    pub store: ImageStore,
    pub validator: Validator,
    pub config: ImageConfig,
}

impl AppState {
    pub async fn new(config: ImageConfig) -> Result<Self, DBError> {
        let conn = storage::new(&config.db_path).await?;
        Ok(Self::with_connection(conn, config))
    }

    pub fn with_connection(conn: DatabaseConnection, config: ImageConfig) -> Self {
        let store = ImageStore::new(conn.clone(), config.images_path.clone());
        let validator = Validator::new(config.allowed_extensions.clone(), config.max_upload_size);
        Self {
            conn,
            store,
            validator,
            config,
        }
    }

    #[cfg(test)]
    pub async fn test(images_path: &std::path::Path) -> Self {
        let conn = storage::start_db(None)
            .await
            .expect("Failed to start test DB");
        Self::with_connection(conn, ImageConfig::for_images_path(images_path))
    }
}

pub fn build_app<T>(shared_state: &SharedState) -> Router<T> {
    let static_service =
        ServeDir::new(&shared_state.config.static_path).append_index_html_on_directories(true);
    let body_limit = shared_state.config.request_body_limit();

    // Build our application by composing routes
    let router = Router::new()
        .route(
            "/api/v1/images",
            get(list_images)
                .post(upload_image)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/v1/images/page", get(list_images_page))
        .route(
            "/api/v1/images/{stored_name}",
            get(get_image).delete(delete_image),
        )
        .route("/images/{stored_name}", get(serve_image))
        .route("/api/v1/health", get(health))
        .merge(openapi::api_route())
        .fallback_service(static_service);

    router
        // Add middleware to all routes
        .layer(
            ServiceBuilder::new()
                .layer(middleware::corslayer())
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    |response: &Response<Body>| {
                        if response.status() == StatusCode::OK {
                            "private, no-transform max-age=0".parse().ok()
                        } else {
                            None
                        }
                    },
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .concurrency_limit(1024)
                .timeout(Duration::from_secs(10))
                .layer(logging_layer()),
        )
        .with_state(shared_state.clone())
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        let msg = "service is overloaded, try again later";
        error!("{}", msg);
        return (StatusCode::SERVICE_UNAVAILABLE, Cow::from(msg));
    }

    let msg = format!("Unhandled internal error: {error}");
    error!("{}", msg);
    (StatusCode::INTERNAL_SERVER_ERROR, Cow::from(msg))
}

#[tokio::test]
async fn test_handle_error() {
    let err = tower::timeout::error::Elapsed::new();
    let res = handle_error(Box::new(err)).await.into_response();
    let expected = (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out")).into_response();

    assert_eq!(res.status(), expected.status());

    let err = tower::load_shed::error::Overloaded::new();
    let res = handle_error(Box::new(err)).await.into_response();
    let expected = (
        StatusCode::SERVICE_UNAVAILABLE,
        Cow::from("service is overloaded, try again later"),
    )
        .into_response();

    assert_eq!(res.status(), expected.status());
}
