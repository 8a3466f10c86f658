use crate::entity::image;
use crate::images::ImagePage;
use crate::{build_app, AppState};
use axum::http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::*;
use imagehost_shared::HealthStatus;
use std::path::Path;
use std::sync::{Arc, Once};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static INIT: Once = Once::new();

struct TestContext {
    server: TestServer,
    // dropped last, removes the image directory
    dir: tempfile::TempDir,
}

impl TestContext {
    fn images_path(&self) -> std::path::PathBuf {
        self.dir.path().join("images")
    }

    fn files_on_disk(&self) -> Vec<String> {
        files_in(&self.images_path())
    }
}

fn files_in(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

async fn setup_test_server() -> TestContext {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                "imagehost_backend=debug,tower_http=debug,debug",
            ))
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let appstate = AppState::test(&dir.path().join("images")).await;
    let shared_state = Arc::new(appstate);
    let app: axum::Router = build_app(&shared_state);

    let config = TestServerConfig {
        expect_success_by_default: true,
        restrict_requests_with_http_schema: false,
        default_content_type: None,
        default_scheme: Some("http".into()),
        ..Default::default()
    };

    TestContext {
        server: TestServer::new_with_config(app, config).unwrap(),
        dir,
    }
}

fn image_form(filename: &str, mime_type: &str, content: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(content).file_name(filename).mime_type(mime_type),
    )
}

async fn upload(ctx: &TestContext, filename: &str, content: Vec<u8>) -> image::Model {
    let res = ctx
        .server
        .post("/api/v1/images")
        .multipart(image_form(filename, "image/png", content))
        .await;
    res.assert_status_ok();
    res.json()
}

#[tokio::test]
async fn test_api_upload_photo_png() {
    let ctx = setup_test_server().await;

    let content = vec![0x89u8; 2000];
    let res = ctx
        .server
        .post("/api/v1/images")
        .multipart(image_form("photo.PNG", "image/png", content.clone()))
        .await;
    res.assert_status_ok();
    let record: image::Model = res.json();

    assert_eq!(record.original_name, "photo.PNG");
    assert_eq!(record.size_bytes, 2000);
    assert_eq!(record.mime_type, "image/png");
    assert!(record.stored_name.ends_with(".png"));
    assert_eq!(ctx.files_on_disk(), vec![record.stored_name.clone()]);

    // the bytes come back with the recorded content type
    let res = ctx
        .server
        .get(&format!("/images/{}", record.stored_name))
        .await;
    res.assert_status_ok();
    assert_eq!(res.as_bytes().as_ref(), content.as_slice());
    let content_type = res.header(CONTENT_TYPE);
    assert_eq!(content_type.to_str().unwrap(), "image/png");
    assert_eq!(res.header(X_CONTENT_TYPE_OPTIONS).to_str().unwrap(), "nosniff");

    let res = ctx
        .server
        .get(&format!("/api/v1/images/{}", record.stored_name))
        .await;
    res.assert_status_ok();
    assert_eq!(res.json::<image::Model>(), record);
}

#[tokio::test]
async fn test_api_html_upload_is_served_as_bytes() {
    let ctx = setup_test_server().await;

    let content = b"<html><script>alert(document.cookie)</script></html>".to_vec();
    let res = ctx
        .server
        .post("/api/v1/images")
        .multipart(image_form("x.png", "text/html", content.clone()))
        .await;
    res.assert_status_ok();
    let record: image::Model = res.json();

    let res = ctx
        .server
        .get(&format!("/images/{}", record.stored_name))
        .await;
    res.assert_status_ok();
    assert_eq!(res.as_bytes().as_ref(), content.as_slice());
    assert_eq!(
        res.header(CONTENT_TYPE).to_str().unwrap(),
        "application/octet-stream"
    );
    assert_eq!(res.header(X_CONTENT_TYPE_OPTIONS).to_str().unwrap(), "nosniff");
}

#[tokio::test]
async fn test_api_upload_rejects_exe() {
    let ctx = setup_test_server().await;

    let res = ctx
        .server
        .post("/api/v1/images")
        .multipart(image_form(
            "malware.exe",
            "application/octet-stream",
            b"MZ\x90\x00".to_vec(),
        ))
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json();
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("malware.exe"));
    assert!(message.contains("jpg"));

    let res = ctx.server.get("/api/v1/images").await;
    assert!(res.json::<Vec<image::Model>>().is_empty());
    assert!(ctx.files_on_disk().is_empty());
}

#[tokio::test]
async fn test_api_upload_size_limit() {
    let ctx = setup_test_server().await;
    let limit = 5 * 1024 * 1024;

    info!("uploading a file exactly at the limit");
    let record = upload(&ctx, "big.jpg", vec![1u8; limit]).await;
    assert_eq!(record.size_bytes, limit as i64);

    info!("uploading a file one byte over the limit");
    let res = ctx
        .server
        .post("/api/v1/images")
        .multipart(image_form("bigger.jpg", "image/jpeg", vec![1u8; limit + 1]))
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = res.json();
    assert_eq!(body["error"], "File too large - limit is 5 MB");

    let res = ctx.server.get("/api/v1/images").await;
    assert_eq!(res.json::<Vec<image::Model>>().len(), 1);
    assert_eq!(ctx.files_on_disk(), vec![record.stored_name]);
}

#[tokio::test]
async fn test_api_upload_without_file_field() {
    let ctx = setup_test_server().await;

    let form = MultipartForm::new().add_text("comment", "no file here");
    let res = ctx
        .server
        .post("/api/v1/images")
        .multipart(form)
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_list_newest_first() {
    let ctx = setup_test_server().await;

    let first = upload(&ctx, "first.png", b"1".to_vec()).await;
    let second = upload(&ctx, "second.gif", b"2".to_vec()).await;

    let res = ctx.server.get("/api/v1/images").await;
    res.assert_status_ok();
    let images: Vec<image::Model> = res.json();
    assert_eq!(images, vec![second, first]);
}

#[tokio::test]
async fn test_api_pagination() {
    let ctx = setup_test_server().await;

    for i in 0..3 {
        upload(&ctx, &format!("img{i}.jpeg"), vec![i as u8; 10]).await;
    }

    let res = ctx
        .server
        .get("/api/v1/images/page")
        .add_query_param("page", 1)
        .add_query_param("per_page", 2)
        .await;
    res.assert_status_ok();
    let page: ImagePage = res.json();
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.images.len(), 2);

    let res = ctx
        .server
        .get("/api/v1/images/page")
        .add_query_param("page", 2)
        .add_query_param("per_page", 2)
        .await;
    let page: ImagePage = res.json();
    assert_eq!(page.images.len(), 1);

    // way past the end is an empty page, not an error
    let res = ctx
        .server
        .get("/api/v1/images/page")
        .add_query_param("page", 101)
        .add_query_param("per_page", 10)
        .await;
    res.assert_status_ok();
    let page: ImagePage = res.json();
    assert!(page.images.is_empty());
    assert_eq!(page.total, 3);

    // defaults
    let res = ctx.server.get("/api/v1/images/page").await;
    let page: ImagePage = res.json();
    assert_eq!(page.page, 1);
    assert_eq!(page.per_page, 10);
    assert_eq!(page.images.len(), 3);
}

#[tokio::test]
async fn test_api_delete() {
    let ctx = setup_test_server().await;

    let record = upload(&ctx, "doomed.png", b"png".to_vec()).await;
    assert_eq!(ctx.files_on_disk().len(), 1);

    ctx.server
        .delete(&format!("/api/v1/images/{}", record.stored_name))
        .await
        .assert_status_ok();

    let res = ctx.server.get("/api/v1/images").await;
    assert!(res.json::<Vec<image::Model>>().is_empty());
    assert!(ctx.files_on_disk().is_empty());

    // deleting again is fine
    ctx.server
        .delete(&format!("/api/v1/images/{}", record.stored_name))
        .await
        .assert_status_ok();

    let res = ctx
        .server
        .get(&format!("/images/{}", record.stored_name))
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_not_found() {
    let ctx = setup_test_server().await;

    let res = ctx
        .server
        .get("/images/0123456789abcdef0123456789abcdef.png")
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

    let res = ctx
        .server
        .get("/api/v1/images/0123456789abcdef0123456789abcdef.png")
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

    // not a name we would ever generate
    let res = ctx
        .server
        .get("/images/..%2Fimagehost.sqlite3")
        .expect_failure()
        .await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_health() {
    let ctx = setup_test_server().await;

    let res = ctx.server.get("/api/v1/health").await;
    res.assert_status_ok();
    let status: HealthStatus = res.json();
    assert!(status.is_ok());
}

#[tokio::test]
async fn test_api_openapi_doc() {
    let ctx = setup_test_server().await;

    let res = ctx.server.get("/api/v1/openapi.json").await;
    res.assert_status_ok();
    let doc: serde_json::Value = res.json();
    assert!(doc["paths"]["/api/v1/images"].is_object());
    assert!(doc["paths"]["/images/{stored_name}"].is_object());
}
