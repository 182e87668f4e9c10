use crate::server::SharedState;
use axum::{body::Bytes, extract::State, response::Html};
use base64::{engine::general_purpose::STANDARD, Engine};
use lymphoma_classifier::{Classification, ClassifierError};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/demo/classify";
const DEMO_HTML: &str = include_str!("../../templates/demo.html");

const PLACEHOLDER: &str =
    "<div class='placeholder-message'><p>Upload an image to see prediction results</p></div>";

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("Failed to stage image: {0}")]
    TempFile(#[from] std::io::Error),
    #[error("{0}")]
    Classification(#[from] ClassifierError),
}

pub async fn demo_page() -> Html<&'static str> {
    Html(DEMO_HTML)
}

/// Classifies the raw image in the request body and renders the result card.
#[instrument(skip(state, image_data))]
pub async fn classify_and_format(State(state): State<SharedState>, image_data: Bytes) -> Html<String> {
    if image_data.is_empty() {
        return Html(PLACEHOLDER.to_string());
    }
    state.metrics.record_request(ROUTE);

    match classify_bytes(&state, &image_data).await {
        Ok(classification) => Html(render_result(&image_data, &classification)),
        Err(DemoError::Classification(ClassifierError::ModelNotLoaded)) => Html(render_error(
            "Error: Model not loaded. Please check the deployment logs.",
        )),
        Err(e) => {
            tracing::error!("Demo classification failed: {}", e);
            Html(render_error(&format!("Error during classification: {}", e)))
        }
    }
}

/// The image is staged in a temporary file that is removed when it goes out of
/// scope; a failed removal is ignored.
async fn classify_bytes(state: &SharedState, image_data: &[u8]) -> Result<Classification, DemoError> {
    let staged = tempfile::Builder::new().prefix("demo-").tempfile()?;
    tokio::fs::write(staged.path(), image_data).await?;

    let start = Instant::now();
    let classification = state.model_service.classify(staged.path()).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);
    if classification.is_fabricated() {
        state
            .metrics
            .record_fabricated_prediction(classification.source.as_str(), ROUTE);
    }

    Ok(classification)
}

fn image_mime(image_data: &[u8]) -> &'static str {
    match image::guess_format(image_data) {
        Ok(format) => format.to_mime_type(),
        Err(_) => "application/octet-stream",
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn render_result(image_data: &[u8], classification: &Classification) -> String {
    let prediction = &classification.prediction;
    let notice = if classification.is_fabricated() {
        format!(
            "\n    <div class=\"fallback-notice\">Not computed by the model (source: {}).</div>",
            classification.source.as_str()
        )
    } else {
        String::new()
    };

    format!(
        r#"<div class="result-content" data-source="{source}">
    <img src="data:{mime};base64,{image}" class="result-image" alt="Uploaded image">
    <div class="prediction-label">{label}</div>
    <div class="confidence-score"><strong>Confidence:</strong> {confidence}</div>
    <div class="prediction-description"><strong>Description:</strong> {description}</div>{notice}
</div>"#,
        source = classification.source.as_str(),
        mime = image_mime(image_data),
        image = STANDARD.encode(image_data),
        label = escape_html(&prediction.label),
        confidence = escape_html(&prediction.confidence),
        description = escape_html(&prediction.description),
        notice = notice,
    )
}

fn render_error(message: &str) -> String {
    format!(
        "<div class='placeholder-message'><p style='color: #ef4444;'>{}</p></div>",
        escape_html(message)
    )
}
