use crate::server::SharedState;
use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    model_mode: String,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
        model_mode: state.model_service.mode().as_str().into(),
    })
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{dummy_model_service, real_model_service, router};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use lymphoma_classifier::config::FallbackPolicy;
    use tower::ServiceExt;

    async fn health(app: axum::Router) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck_reports_mode() {
        let dir = tempfile::tempdir().unwrap();

        let body = health(router(dummy_model_service(), dir.path())).await;
        assert_eq!(body["status"], "Available");
        assert_eq!(body["model_mode"], "dummy");

        let body = health(router(real_model_service(FallbackPolicy::Strict), dir.path())).await;
        assert_eq!(body["model_mode"], "real");
    }
}
