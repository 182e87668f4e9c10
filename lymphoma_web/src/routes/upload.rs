use crate::{
    filenames::{allowed_file, secure_filename},
    server::SharedState,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use lymphoma_classifier::{ClassifierError, PredictionSource};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/upload";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file provided")]
    MissingFile,
    #[error("No file selected")]
    EmptyFilename,
    #[error("Invalid file type. Please upload JPG, PNG, or WebP.")]
    DisallowedFileType,
    #[error("Failed to read upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadError::MissingFile
            | UploadError::EmptyFilename
            | UploadError::DisallowedFileType => StatusCode::BAD_REQUEST,
            UploadError::Multipart(err) => err.status(),
            UploadError::Storage(_) | UploadError::Classification(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("Upload failed: {}", self);
        } else {
            tracing::info!("Upload rejected: {}", self);
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    pub image_url: String,
    pub prediction: String,
    pub confidence: String,
    pub description: String,
    pub source: PredictionSource,
}

#[instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    state.metrics.record_request(ROUTE);

    // A body that is not a multipart form carries no file field.
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Upload is not a multipart form: {}", rejection);
        UploadError::MissingFile
    })?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            upload = Some((filename, data));
            break;
        }
    }

    let (original_name, data) = upload.ok_or(UploadError::MissingFile)?;
    if original_name.is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    if !allowed_file(&original_name) {
        return Err(UploadError::DisallowedFileType);
    }
    let filename = secure_filename(&original_name);
    if !allowed_file(&filename) {
        return Err(UploadError::DisallowedFileType);
    }

    let filepath = state.uploads_dir.join(&filename);
    tokio::fs::write(&filepath, &data).await?;
    tracing::debug!("Stored {} bytes at {:?}", data.len(), filepath);

    let start = Instant::now();
    let classification = state.model_service.classify(&filepath).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);
    if classification.is_fabricated() {
        state
            .metrics
            .record_fabricated_prediction(classification.source.as_str(), ROUTE);
    }

    let prediction = classification.prediction;
    Ok(Json(UploadResponse {
        success: true,
        image_url: format!("/uploads/{}", filename),
        prediction: prediction.label,
        confidence: prediction.confidence,
        description: prediction.description,
        source: classification.source,
    }))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{
        dummy_model_service, jpeg_bytes, multipart_request, real_model_service, router,
        router_with_limit, BOUNDARY,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use lymphoma_classifier::config::FallbackPolicy;
    use serde_json::Value;
    use tower::ServiceExt;

    const DISPLAY_NAMES: [&str; 3] = [
        "Diffuse Large B-Cell Lymphoma",
        "Follicular Lymphoma",
        "Hodgkin Lymphoma",
    ];

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn is_percentage(confidence: &str) -> bool {
        let Some(number) = confidence.strip_suffix('%') else {
            return false;
        };
        let Some((integer, fraction)) = number.split_once('.') else {
            return false;
        };
        integer.len() >= 2
            && fraction.len() == 2
            && integer.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit())
    }

    fn percent_value(confidence: &str) -> f64 {
        confidence.trim_end_matches('%').parse().unwrap()
    }

    #[tokio::test]
    async fn test_valid_jpeg_is_classified_by_model() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(real_model_service(FallbackPolicy::Lenient), dir.path());

        let response = app
            .oneshot(multipart_request("/upload", "file", "sample.jpg", &jpeg_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["source"], "model");
        assert_eq!(body["image_url"], "/uploads/sample.jpg");
        assert_eq!(body["prediction"], "Hodgkin Lymphoma");
        assert!(DISPLAY_NAMES.contains(&body["prediction"].as_str().unwrap()));
        assert!(is_percentage(body["confidence"].as_str().unwrap()));
        assert!(dir.path().join("sample.jpg").exists());
    }

    #[tokio::test]
    async fn test_text_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(real_model_service(FallbackPolicy::Lenient), dir.path());

        let response = app
            .oneshot(multipart_request("/upload", "file", "notes.txt", b"just some notes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_ne!(body["success"], true);
        assert!(body["error"].as_str().unwrap().contains("Invalid file type"));
        assert!(body.get("prediction").is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_corrupted_jpeg_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(real_model_service(FallbackPolicy::Lenient), dir.path());

        let response = app
            .oneshot(multipart_request(
                "/upload",
                "file",
                "corrupted.jpg",
                b"\xFF\xD8\xFF\xE0\x00\x10JFIF truncated",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["source"], "fallback");
        assert_eq!(body["prediction"], "Diffuse Large B-Cell Lymphoma");
        let confidence = body["confidence"].as_str().unwrap();
        assert!(is_percentage(confidence));
        assert!((90.0..=99.99).contains(&percent_value(confidence)));
    }

    #[tokio::test]
    async fn test_corrupted_jpeg_fails_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(real_model_service(FallbackPolicy::Strict), dir.path());

        let response = app
            .oneshot(multipart_request(
                "/upload",
                "file",
                "corrupted.jpg",
                b"\xFF\xD8\xFF\xE0 truncated",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("Classification failed"));
    }

    #[tokio::test]
    async fn test_empty_filename_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dummy_model_service(), dir.path());

        let response = app
            .oneshot(multipart_request("/upload", "file", "", &jpeg_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["error"], "No file selected");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dummy_model_service(), dir.path());

        let response = app
            .oneshot(multipart_request("/upload", "image", "sample.jpg", &jpeg_bytes()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No file provided");

        let app = router(dummy_model_service(), dir.path());
        let empty_form = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!("--{BOUNDARY}--\r\n")))
            .unwrap();
        let response = app.oneshot(empty_form).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_path_components_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dummy_model_service(), dir.path());

        let response = app
            .oneshot(multipart_request(
                "/upload",
                "file",
                "../../Tile 01.JPG",
                &jpeg_bytes(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["image_url"], "/uploads/Tile_01.JPG");
        assert_eq!(body["source"], "dummy");
        assert!(dir.path().join("Tile_01.JPG").exists());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router_with_limit(dummy_model_service(), dir.path(), 1024);

        let response = app
            .oneshot(multipart_request("/upload", "file", "large.png", &vec![0u8; 4096]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["success"], false);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_non_multipart_body_gets_json_error() {
        let dir = tempfile::tempdir().unwrap();

        let requests = [
            Request::builder()
                .method("POST")
                .uri("/upload")
                .body(Body::empty())
                .unwrap(),
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("file=sample.jpg"))
                .unwrap(),
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("content-type", "multipart/form-data")
                .body(Body::from("no boundary"))
                .unwrap(),
        ];
        for request in requests {
            let app = router(dummy_model_service(), dir.path());
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let body = json_body(response).await;
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "No file provided");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
