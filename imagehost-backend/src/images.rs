use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use imagehost_shared::{HealthStatus, PageQuery, Pagination};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use utoipa::ToSchema;

use crate::{
    entity::image,
    store::{StorageError, FALLBACK_CONTENT_TYPE},
    validation::ValidationError,
    SharedState,
};

#[derive(Debug)]
pub struct WebError {
    status: StatusCode,
    message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        WebError {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        let mut response = axum::response::Response::new(body.to_string().into());
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

impl From<ValidationError> for WebError {
    fn from(err: ValidationError) -> Self {
        let status = match err {
            ValidationError::UnsupportedExtension { .. } | ValidationError::Read(_) => {
                StatusCode::BAD_REQUEST
            }
            ValidationError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        };
        WebError::new(status, err.to_string())
    }
}

impl From<StorageError> for WebError {
    fn from(err: StorageError) -> Self {
        let message = match err {
            StorageError::Database(_) => "Database error",
            StorageError::Io { .. } => "Image storage error",
        };
        WebError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<MultipartError> for WebError {
    fn from(err: MultipartError) -> Self {
        WebError::new(
            err.status(),
            format!("Failed to read multipart field: {}", err.body_text()),
        )
    }
}

/// One page of the image listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImagePage {
    pub images: Vec<image::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Upload an image
#[utoipa::path(
    post,
    path = "/api/v1/images",
    request_body(content_type = "multipart/form-data", description = "The image, in a field named `file`"),
    responses(
        (status = 200, description = "Image stored", body = image::Model),
        (status = 400, description = "Unsupported extension or malformed upload"),
        (status = 413, description = "Image larger than the configured limit"),
        (status = 500, description = "Storage failure"),
    )
)]
pub async fn upload_image(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<image::Model>, WebError> {
    while let Some(field) = multipart.next_field().await.inspect_err(|e| {
        error!("Failed to read multipart field: {:?}", e);
    })? {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name != "file" {
            debug!("Ignoring unknown multipart field: {}", field_name);
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| WebError::new(StatusCode::BAD_REQUEST, "Missing filename in upload"))?;
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        info!("File received: {}", filename);

        let content = state
            .validator
            .validate(&filename, field)
            .await
            .inspect_err(|err| error!("Upload failed for {}: {}", filename, err))?;

        let record = state
            .store
            .store(&filename, &content, &content_type, None)
            .await?;

        return Ok(Json(record));
    }

    Err(WebError::new(
        StatusCode::BAD_REQUEST,
        "Missing file data in upload",
    ))
}

/// List every image, newest first
#[utoipa::path(
    get,
    path = "/api/v1/images",
    responses((status = 200, description = "All images", body = Vec<image::Model>))
)]
pub async fn list_images(State(state): State<SharedState>) -> Json<Vec<image::Model>> {
    let images = state.store.list_all().await.unwrap_or_else(|err| {
        error!("Failed to list images, returning an empty list: {:?}", err);
        Vec::new()
    });
    debug!("Listed {} images", images.len());
    Json(images)
}

/// One page of images, newest upload first
#[utoipa::path(
    get,
    path = "/api/v1/images/page",
    params(PageQuery),
    responses((status = 200, description = "A page of images", body = ImagePage))
)]
pub async fn list_images_page(
    State(state): State<SharedState>,
    Query(query): Query<PageQuery>,
) -> Json<ImagePage> {
    let pagination = Pagination::from(query);

    let total = state.store.count().await.unwrap_or_else(|err| {
        error!("Failed to count images: {:?}", err);
        0
    });
    let images = state
        .store
        .list_page(pagination.limit(), pagination.offset())
        .await
        .unwrap_or_else(|err| {
            error!("Failed to fetch image page: {:?}", err);
            Vec::new()
        });

    Json(ImagePage {
        images,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages: pagination.total_pages(total),
    })
}

/// Metadata for one image
#[utoipa::path(
    get,
    path = "/api/v1/images/{stored_name}",
    params(("stored_name" = String, Path, description = "Generated name of the image")),
    responses(
        (status = 200, description = "The image record", body = image::Model),
        (status = 404, description = "No such image"),
    )
)]
pub async fn get_image(
    State(state): State<SharedState>,
    Path(stored_name): Path<String>,
) -> Result<Json<image::Model>, WebError> {
    state
        .store
        .find(&stored_name)
        .await
        .inspect_err(|err| error!("Failed to get image {}: {:?}", stored_name, err))?
        .map(Json)
        .ok_or_else(|| WebError::not_found(format!("Image {} not found", stored_name)))
}

/// Delete an image by its stored name
#[utoipa::path(
    delete,
    path = "/api/v1/images/{stored_name}",
    params(("stored_name" = String, Path, description = "Generated name of the image")),
    responses((status = 200, description = "Image deleted, or there was nothing to delete"))
)]
pub async fn delete_image(
    State(state): State<SharedState>,
    Path(stored_name): Path<String>,
) -> Result<String, WebError> {
    // Just attempt deletion, a missing image is not an error
    let removed = state.store.delete(&stored_name).await?;
    debug!("Delete of {} removed a record: {}", stored_name, removed);

    Ok(match removed {
        true => "Image deleted successfully".to_string(),
        false => "Nothing to delete".to_string(),
    })
}

/// Serve the image bytes
#[utoipa::path(
    get,
    path = "/images/{stored_name}",
    params(("stored_name" = String, Path, description = "Generated name of the image")),
    responses(
        (status = 200, description = "The raw image"),
        (status = 404, description = "No such image"),
    )
)]
pub async fn serve_image(
    State(state): State<SharedState>,
    Path(stored_name): Path<String>,
) -> Result<Response, WebError> {
    let image = state
        .store
        .fetch(&stored_name)
        .await
        .inspect_err(|err| error!("Failed to read image {}: {:?}", stored_name, err))?
        .ok_or_else(|| WebError::not_found("Image not found"))?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, image.content_type)],
        image.content,
    )
        .into_response())
}

/// Check the database is reachable
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Database reachable", body = HealthStatus),
        (status = 503, description = "Database unreachable", body = HealthStatus),
    )
)]
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthStatus>) {
    match state.conn.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthStatus::ok("Connection to database successful")),
        ),
        Err(err) => {
            error!("[DB] Database connection error: {:?}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus::error("Connection to database failed")),
            )
        }
    }
}
