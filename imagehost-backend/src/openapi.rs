use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(description = "Image hosting API", license(name = "MIT or Apache2", identifier="MIT Apache2.0"), title = "imagehost", version = env!("CARGO_PKG_VERSION")),
    paths(
        crate::images::upload_image,
        crate::images::list_images,
        crate::images::list_images_page,
        crate::images::get_image,
        crate::images::delete_image,
        crate::images::serve_image,
        crate::images::health
    )
)]
pub struct ApiDoc;

pub(crate) fn api_route<T: Clone + Sync + Send + 'static>() -> Router<T> {
    let doc = ApiDoc::openapi();
    Router::new().merge(SwaggerUi::new("/api/v1/swagger-ui").url("/api/v1/openapi.json", doc))
}
