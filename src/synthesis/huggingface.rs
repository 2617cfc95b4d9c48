//! Hugging Face Inference API client

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ImageSynthesizer, SynthesisError, SynthesisPrompt, SynthesizedImage};

pub const HUGGINGFACE_API_URL: &str = "https://api-inference.huggingface.co";

/// Diffusion models need dimensions divisible by 8
const DIMENSION_STEP: u32 = 8;

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters<'a>,
}

#[derive(Serialize)]
struct InferenceParameters<'a> {
    negative_prompt: &'a str,
    width: u32,
    height: u32,
}

/// Error body, e.g. `{"error": "Model is currently loading", "estimated_time": 20.0}`
#[derive(Deserialize)]
struct InferenceError {
    error: String,
    estimated_time: Option<f64>,
}

/// Text-to-image client for a hosted diffusion model
pub struct HuggingFaceClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl HuggingFaceClient {
    pub fn new(api_key: String, model: String) -> Result<Self, SynthesisError> {
        Self::with_base_url(api_key, model, HUGGINGFACE_API_URL.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: String,
    ) -> Result<Self, SynthesisError> {
        // Image generation on a cold model can take well over a minute
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }
}

fn round_down(value: u32) -> u32 {
    (value / DIMENSION_STEP).max(1) * DIMENSION_STEP
}

fn request_body(prompt: &SynthesisPrompt) -> InferenceRequest<'_> {
    InferenceRequest {
        inputs: &prompt.prompt,
        parameters: InferenceParameters {
            negative_prompt: &prompt.negative_prompt,
            width: round_down(prompt.width),
            height: round_down(prompt.height),
        },
    }
}

#[async_trait]
impl ImageSynthesizer for HuggingFaceClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn synthesize(
        &self,
        prompt: &SynthesisPrompt,
    ) -> Result<SynthesizedImage, SynthesisError> {
        debug!(model = %self.model, width = prompt.width, height = prompt.height, "Requesting image");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "image/png")
            .json(&request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(api_error) = serde_json::from_str::<InferenceError>(&error_text) {
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    if let Some(estimated_secs) = api_error.estimated_time {
                        warn!(model = %self.model, estimated_secs, "Image model is still loading");
                        return Err(SynthesisError::ModelLoading { estimated_secs });
                    }
                }
                return Err(SynthesisError::Api {
                    status: status.as_u16(),
                    message: api_error.error,
                });
            }
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyImage);
        }

        debug!(model = %self.model, bytes = bytes.len(), "Image received");
        Ok(SynthesizedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
