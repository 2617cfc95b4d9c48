//! Text-to-image synthesis
//!
//! The image model sits behind [`ImageSynthesizer`] so the orchestrator can
//! run against the hosted model, a fake in tests, or nothing at all (the
//! placeholder path).

mod huggingface;
mod prompts;

pub use huggingface::{HuggingFaceClient, HUGGINGFACE_API_URL};
pub use prompts::{build_prompt, event_phrase, stored_prompt, NEGATIVE_PROMPT};

use async_trait::async_trait;

/// Model name recorded for placeholder posters
pub const PLACEHOLDER_MODEL: &str = "placeholder";

/// Everything the model needs for one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisPrompt {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
}

/// Raw image returned by the model
#[derive(Debug, Clone)]
pub struct SynthesizedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("image model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("image model returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("image model is loading, estimated {estimated_secs:.0}s")]
    ModelLoading { estimated_secs: f64 },

    #[error("image model returned an empty image")]
    EmptyImage,
}

#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Model identifier stored on each poster
    fn model(&self) -> &str;

    async fn synthesize(&self, prompt: &SynthesisPrompt)
        -> Result<SynthesizedImage, SynthesisError>;
}

/// Deterministic stand-in image used when no model is configured
pub fn placeholder_url(width: u32, height: u32, title: &str) -> String {
    let base = format!("https://placehold.co/{}x{}/png", width, height);
    match reqwest::Url::parse_with_params(&base, &[("text", title)]) {
        Ok(url) => url.into(),
        Err(_) => base,
    }
}

#[cfg(test)]
pub(crate) use fake::FakeSynthesizer;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_url_encodes_title() {
        let url = placeholder_url(1080, 1920, "Spring Gala & Dinner");
        assert!(url.starts_with("https://placehold.co/1080x1920/png?text="));
        assert!(url.contains("Spring+Gala+%26+Dinner"));
    }
}
