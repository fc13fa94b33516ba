use super::{MAX_IMAGE_SIZE_BYTES, SharedState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

pub fn create_app(state: SharedState) -> Router {
    Router::new()
        // Background removal, gated to one job at a time
        .route("/remove-background", post(handlers::remove_background))
        .route(
            "/remove-background/link",
            post(handlers::remove_background_link),
        )
        .route("/processing-status", get(handlers::processing_status))
        // Stored results
        .route(
            &format!("{}/{{file_name}}", handlers::OUTPUT_ROUTE),
            get(handlers::get_processed_image),
        )
        .route("/health", get(handlers::health))
        // Apply a layer to limit the maximum size of request bodies
        .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE_BYTES))
        // The browser front end lives on another origin
        .layer(CorsLayer::permissive())
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::gate::Admission;
    use crate::queue::{AdmissionGate, JobRunner};
    use crate::removal::{BackgroundRemover, RemovalError};
    use crate::storage::ResultStore;
    use crate::web::AppState;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use base64::prelude::{BASE64_STANDARD, Engine as _};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const PROCESSED: &[u8] = b"\x89PNG processed";
    const BOUNDARY: &str = "X-BGREMOVE-TEST-BOUNDARY";

    struct StubRemover {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl BackgroundRemover for StubRemover {
        fn name(&self) -> &str {
            "stub"
        }

        async fn remove_background(&self, _image: &[u8]) -> Result<Vec<u8>, RemovalError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(RemovalError::CommandFailed {
                    status: "exit status: 1".to_string(),
                    stderr: "out of memory".to_string(),
                });
            }
            Ok(PROCESSED.to_vec())
        }
    }

    struct TestApp {
        router: Router,
        gate: AdmissionGate,
        dir: tempfile::TempDir,
    }

    async fn test_app(fail: bool) -> TestApp {
        build_app(StubRemover {
            fail,
            delay: Duration::ZERO,
        })
        .await
    }

    async fn build_app(remover: StubRemover) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let gate = AdmissionGate::new();
        let runner = JobRunner::new(gate.clone(), Arc::new(remover), None);
        let store = ResultStore::open(dir.path()).await.unwrap();
        let state = Arc::new(AppState::new(runner, store, None));
        TestApp {
            router: create_app(state),
            gate,
            dir,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 255, 255, 255]));
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"photo.png\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(uri: &str, field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        Request::post(uri)
            .header(header::HOST, "localhost:3001")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(field, content_type, data)))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn send_owned(router: Router, request: Request<Body>) -> Response {
        router.oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn processing(router: &Router) -> Value {
        let response = send(
            router,
            Request::get("/processing-status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn status_is_idle_on_startup() {
        let app = test_app(false).await;
        assert_eq!(processing(&app.router).await, json!({ "processing": false }));
    }

    #[tokio::test]
    async fn health_check_answers_ok() {
        let app = test_app(false).await;
        let response = send(&app.router, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn remove_background_returns_inline_png() {
        let app = test_app(false).await;
        let response = send(
            &app.router,
            upload_request("/remove-background", "image", "image/png", &png_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], 200);
        assert_eq!(body["data"]["contentType"], "image/png");
        let buffer = BASE64_STANDARD
            .decode(body["data"]["buffer"].as_str().unwrap())
            .unwrap();
        assert_eq!(buffer, PROCESSED);

        assert_eq!(processing(&app.router).await, json!({ "processing": false }));
        assert!(app.gate.snapshot().last_processing_time.is_some());
    }

    #[tokio::test]
    async fn raw_image_body_is_accepted() {
        let app = test_app(false).await;
        let request = Request::post("/remove-background")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(png_bytes()))
            .unwrap();
        assert_eq!(send(&app.router, request).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_image_field_is_rejected_before_the_gate() {
        let app = test_app(false).await;
        let response = send(
            &app.router,
            upload_request("/remove-background", "picture", "image/png", &png_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert!(body["error"].as_str().unwrap().contains("'image'"));
        assert_eq!(app.gate.snapshot().last_processing_time, None);
    }

    #[tokio::test]
    async fn unsupported_image_type_is_415() {
        let app = test_app(false).await;
        let response = send(
            &app.router,
            upload_request("/remove-background", "image", "image/gif", b"GIF89a...."),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn busy_gate_answers_429_with_last_duration() {
        let app = test_app(false).await;

        let Admission::Admitted(permit) = app.gate.try_admit() else {
            panic!("fresh gate must admit");
        };
        assert_eq!(processing(&app.router).await, json!({ "processing": true }));

        let response = send(
            &app.router,
            upload_request("/remove-background", "image", "image/png", &png_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["status"], 429);
        assert_eq!(body["lastProcessingTime"], Value::Null);

        permit.release(Duration::from_millis(1234));

        let Admission::Admitted(_permit) = app.gate.try_admit() else {
            panic!("released gate must admit");
        };
        let response = send(
            &app.router,
            upload_request("/remove-background/link", "image", "image/png", &png_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["lastProcessingTime"], 1234);
    }

    #[tokio::test]
    async fn failed_removal_is_500_and_frees_the_gate() {
        let app = test_app(true).await;

        for _ in 0..2 {
            let response = send(
                &app.router,
                upload_request("/remove-background", "image", "image/png", &png_bytes()),
            )
            .await;
            // A second 500 (not 429) proves the first job released the gate.
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = body_json(response).await;
            assert_eq!(body["status"], 500);
            assert!(body["error"].as_str().unwrap().contains("out of memory"));
            assert!(!app.gate.snapshot().busy);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_during_slow_job_gets_429_then_gate_reopens() {
        let app = build_app(StubRemover {
            fail: false,
            delay: Duration::from_millis(200),
        })
        .await;

        let first = tokio::spawn(send_owned(
            app.router.clone(),
            upload_request("/remove-background", "image", "image/png", &png_bytes()),
        ));
        // Let the first job get admitted and park in the remover.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(processing(&app.router).await, json!({ "processing": true }));

        let response = send(
            &app.router,
            upload_request("/remove-background", "image", "image/png", &png_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await["lastProcessingTime"], Value::Null);

        let response = first.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["processingTime"], 200);
        assert_eq!(processing(&app.router).await, json!({ "processing": false }));
        assert_eq!(
            app.gate.snapshot().last_processing_time,
            Some(Duration::from_millis(200))
        );
    }

    #[tokio::test]
    async fn failed_removal_on_link_route_is_500_and_stores_nothing() {
        let app = test_app(true).await;
        let response = send(
            &app.router,
            upload_request("/remove-background/link", "image", "image/png", &png_bytes()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["status"], 500);
        assert_eq!(body["message"], "Internal server error");
        assert!(!app.gate.snapshot().busy);
        assert_eq!(std::fs::read_dir(app.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn link_points_at_a_servable_image() {
        let app = test_app(false).await;
        let response = send(
            &app.router,
            upload_request("/remove-background/link", "image", "image/jpeg", &png_bytes()),
        )
        .await;
        // Declared JPEG but PNG bytes: both are accepted formats.
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let url = body["data"]["url"].as_str().unwrap();
        let path = url
            .strip_prefix("http://localhost:3001")
            .expect("link should be built from the Host header");
        assert!(path.starts_with("/images-output/output-"));

        let response = send(&app.router, Request::get(path).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], PROCESSED);
    }

    #[tokio::test]
    async fn unknown_output_file_is_404() {
        let app = test_app(false).await;
        let response = send(
            &app.router,
            Request::get("/images-output/output-nope.png")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
