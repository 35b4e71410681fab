//! Prediction endpoint client for emotion classification
//!
//! Sends one audio clip as a multipart form to the remote `/predict`
//! endpoint and returns the emotion label from the JSON response.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::state_machine::AudioPayload;

/// Default endpoint, matching the reference backend.
pub const DEFAULT_PREDICT_URL: &str = "http://localhost:5000/predict";

/// Environment variable overriding the configured endpoint URL.
pub const PREDICT_URL_ENV: &str = "MOODCUE_PREDICT_URL";

/// Multipart field name the endpoint expects the clip under.
const AUDIO_FIELD: &str = "file";

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Errors that can occur during a submission
#[derive(Debug)]
pub enum PredictionError {
    /// Transport-level failure (connection refused, timeout, ...)
    Network(String),
    /// Endpoint returned a non-success status
    Endpoint { status: u16, message: String },
    /// Response body was not the expected JSON shape
    MalformedResponse(String),
}

impl std::fmt::Display for PredictionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictionError::Network(e) => write!(f, "Network error: {}", e),
            PredictionError::Endpoint { status, message } => {
                write!(f, "Prediction endpoint error ({}): {}", status, message)
            }
            PredictionError::MalformedResponse(e) => {
                write!(f, "Malformed prediction response: {}", e)
            }
        }
    }
}

impl std::error::Error for PredictionError {}

/// Successful prediction response: `{ "emotion": "<label>" }`
#[derive(Debug, Deserialize)]
struct PredictResponse {
    emotion: String,
}

/// Endpoint error body: `{ "error": "<message>" }`
#[derive(Debug, Deserialize)]
struct EndpointErrorResponse {
    error: String,
}

/// Resolve the endpoint URL: environment variable first, then the configured
/// value.
pub fn resolve_predict_url(configured: &str) -> String {
    match std::env::var(PREDICT_URL_ENV) {
        Ok(url) if !url.is_empty() => url,
        _ => configured.to_string(),
    }
}

/// Submit one audio payload to the prediction endpoint.
///
/// Fire-once: a non-success status, a transport failure, or an unexpected
/// body all fail this submission with no retry.
pub async fn predict(url: &str, payload: &AudioPayload) -> Result<String, PredictionError> {
    let file_name = payload.source.file_name().to_string();

    log::info!(
        "Submitting clip: {} ({} bytes) to {}",
        file_name,
        payload.bytes.len(),
        url
    );

    let file_part = Part::bytes(payload.bytes.to_vec())
        .file_name(file_name)
        .mime_str("audio/wav")
        .map_err(|e| PredictionError::MalformedResponse(e.to_string()))?;

    let form = Form::new().part(AUDIO_FIELD, file_part);

    let response = get_http_client()
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| PredictionError::Network(e.to_string()))?;

    let status = response.status();

    if status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| PredictionError::Network(e.to_string()))?;

        let prediction = parse_prediction(&body)?;
        log::info!("Prediction successful: {}", prediction);
        Ok(prediction)
    } else {
        let error_text = response.text().await.unwrap_or_default();

        let message =
            if let Ok(error_response) = serde_json::from_str::<EndpointErrorResponse>(&error_text) {
                error_response.error
            } else {
                error_text
            };

        log::error!(
            "Prediction endpoint error ({}): {}",
            status.as_u16(),
            message
        );

        Err(PredictionError::Endpoint {
            status: status.as_u16(),
            message,
        })
    }
}

/// Parse a success body into the emotion label.
fn parse_prediction(body: &str) -> Result<String, PredictionError> {
    // Some backends report errors with a 200 status and an error body;
    // treat those as malformed rather than displaying an empty label.
    match serde_json::from_str::<PredictResponse>(body) {
        Ok(parsed) => Ok(parsed.emotion),
        Err(e) => {
            if let Ok(err_body) = serde_json::from_str::<EndpointErrorResponse>(body) {
                Err(PredictionError::MalformedResponse(err_body.error))
            } else {
                Err(PredictionError::MalformedResponse(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prediction_extracts_label() {
        let label = parse_prediction(r#"{"emotion":"Happy"}"#).unwrap();
        assert_eq!(label, "Happy");
    }

    #[test]
    fn parse_prediction_rejects_missing_field() {
        let err = parse_prediction(r#"{"mood":"Happy"}"#).unwrap_err();
        assert!(matches!(err, PredictionError::MalformedResponse(_)));
    }

    #[test]
    fn parse_prediction_surfaces_error_body() {
        let err = parse_prediction(r#"{"error":"No file part"}"#).unwrap_err();
        match err {
            PredictionError::MalformedResponse(msg) => assert_eq!(msg, "No file part"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn endpoint_error_display_includes_status() {
        let err = PredictionError::Endpoint {
            status: 500,
            message: "model unavailable".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("model unavailable"));
    }

    #[test]
    fn resolve_url_prefers_environment() {
        std::env::remove_var(PREDICT_URL_ENV);
        assert_eq!(
            resolve_predict_url(DEFAULT_PREDICT_URL),
            DEFAULT_PREDICT_URL
        );
        std::env::set_var(PREDICT_URL_ENV, "http://example.test/predict");
        assert_eq!(
            resolve_predict_url(DEFAULT_PREDICT_URL),
            "http://example.test/predict"
        );
        std::env::remove_var(PREDICT_URL_ENV);
    }
}
