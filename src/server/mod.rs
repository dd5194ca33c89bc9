pub mod error;
pub mod handlers;
pub mod routes;
pub mod templates;

pub use routes::create_router;

use std::net::SocketAddr;

use tokio::signal;
use tracing::info;

use crate::state::AppState;

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    max_upload_bytes: usize,
) -> anyhow::Result<()> {
    let app = create_router(state, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("CityLens listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use base64::Engine;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::llm::{DescribeError, DescribeImageInput, ImageDescriber, ImageDescription};
    use crate::report::{ControllerSettings, SimulatedDelivery};

    const BOUNDARY: &str = "citylens-test-boundary";

    struct FixedDescriber;

    #[async_trait]
    impl ImageDescriber for FixedDescriber {
        fn model_label(&self) -> String {
            "fixed".to_string()
        }

        async fn describe(
            &self,
            input: &DescribeImageInput,
        ) -> Result<ImageDescription, DescribeError> {
            crate::llm::media::DataUri::parse(&input.photo_data_uri)?;
            Ok(ImageDescription {
                description: "A pothole is visible in the center of the road.".to_string(),
            })
        }
    }

    fn test_app() -> Router {
        test_app_with_limit(1024 * 1024)
    }

    fn test_app_with_limit(max_upload_bytes: usize) -> Router {
        let state = AppState::new(
            Arc::new(FixedDescriber),
            Arc::new(SimulatedDelivery::new(Duration::from_millis(5))),
            ControllerSettings {
                location_timeout: Duration::from_millis(200),
            },
            Duration::from_secs(60),
        );
        create_router(state, max_upload_bytes)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn patch_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload(uri: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn open_session(app: &Router) -> String {
        let (status, json) = send(app, post_empty("/api/sessions")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["phase"], "empty");
        json["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let app = test_app();

        let (status, json) = send(
            &app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Help make your city better."));
    }

    #[tokio::test]
    async fn test_describe_endpoint() {
        let app = test_app();

        let (status, json) = send(
            &app,
            post_json(
                "/api/describe",
                json!({ "photoDataUri": "data:image/png;base64,iVBORw0KGgo=" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json["description"],
            "A pothole is visible in the center of the road."
        );

        let (status, json) = send(
            &app,
            post_json("/api/describe", json!({ "photoDataUri": "not a data uri" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_full_report_flow() {
        let app = test_app();
        let id = open_session(&app).await;
        let base = format!("/api/sessions/{id}");

        let (status, json) = send(
            &app,
            upload(
                &format!("{base}/image?source=drop"),
                "pothole.png",
                "image/png",
                &[0x89, b'P', b'N', b'G', 1, 2, 3],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "imageSelected");
        assert_eq!(json["imageName"], "pothole.png");
        assert_eq!(json["canAnalyze"], true);

        let (status, json) = send(&app, post_empty(&format!("{base}/analyze"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "reportFormVisible");
        assert_eq!(
            json["values"]["description"],
            "A pothole is visible in the center of the road."
        );
        assert_eq!(json["values"]["sendToCityHall"], false);

        let (status, json) = send(
            &app,
            post_json(
                &format!("{base}/location"),
                json!({ "latitude": 40.7127753, "longitude": -74.0059728 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["values"]["location"], "40.71278, -74.00597");

        let (status, json) = send(
            &app,
            patch_json(
                &format!("{base}/fields"),
                json!({ "email": "me@example.com", "sendToCityHall": true }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["values"]["email"], "me@example.com");

        let (status, json) = send(&app, post_empty(&format!("{base}/submit"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "submitSucceeded");
        assert_eq!(json["submitSuccess"], true);
        assert_eq!(json["notices"][0]["title"], "Report Submitted!");

        let (status, json) = send(&app, post_empty(&format!("{base}/reset"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "empty");
        assert_eq!(json["values"]["description"], "");
    }

    #[tokio::test]
    async fn test_invalid_submit_returns_field_errors() {
        let app = test_app();
        let id = open_session(&app).await;
        let base = format!("/api/sessions/{id}");

        send(
            &app,
            upload(&format!("{base}/image"), "a.png", "image/png", b"\x89PNG"),
        )
        .await;
        send(&app, post_empty(&format!("{base}/analyze"))).await;
        send(
            &app,
            patch_json(
                &format!("{base}/fields"),
                json!({ "description": "too short" }),
            ),
        )
        .await;

        let (status, json) = send(&app, post_empty(&format!("{base}/submit"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["phase"], "reportFormVisible");
        assert_eq!(json["fieldErrors"]["description"]["kind"], "too_short");
        assert!(json["fieldErrors"]["location"].is_object());
        assert!(json["fieldErrors"]["sendToLocalPolice"].is_object());
    }

    #[tokio::test]
    async fn test_rejects_non_images_and_unknown_sessions() {
        let app = test_app();
        let id = open_session(&app).await;

        let (status, json) = send(
            &app,
            upload(
                &format!("/api/sessions/{id}/image"),
                "notes.txt",
                "text/plain",
                b"hello",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json["notice"]["title"], "Invalid File Type");

        let (status, _) = send(&app, post_empty(&format!("/api/sessions/{id}/reset"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let missing = uuid::Uuid::new_v4();
        let (status, _) = send(
            &app,
            Request::builder()
                .uri(format!("/api/sessions/{missing}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sessions/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_upload_limit_is_the_file_size_limit() {
        let limit = 64 * 1024;
        let app = test_app_with_limit(limit);
        let id = open_session(&app).await;
        let uri = format!("/api/sessions/{id}/image");

        let mut oversized = vec![0x89, b'P', b'N', b'G'];
        oversized.resize(limit + 8 * 1024, 0);
        let (status, json) = send(&app, upload(&uri, "big.png", "image/png", &oversized)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json["error"].is_string());

        let mut fits = vec![0x89, b'P', b'N', b'G'];
        fits.resize(limit - 1024, 0);
        let (status, json) = send(&app, upload(&uri, "ok.png", "image/png", &fits)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "imageSelected");

        let encoded = base64::engine::general_purpose::STANDARD.encode(vec![0u8; 52 * 1024]);
        let (status, _) = send(
            &app,
            post_json(
                "/api/describe",
                json!({ "photoDataUri": format!("data:image/png;base64,{encoded}") }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
