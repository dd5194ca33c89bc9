use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::media::DataUriError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeImageInput {
    pub photo_data_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DescribeError {
    #[error("Invalid photo data URI: {0}")]
    InvalidInput(#[from] DataUriError),
    #[error("Image analysis is not configured: {0}")]
    NotConfigured(String),
    #[error("AI request failed: {0}")]
    Request(String),
    #[error("AI provider returned status {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("AI returned an unreadable response: {0}")]
    MalformedResponse(String),
    #[error("AI did not return a description.")]
    EmptyResult,
}

#[async_trait]
pub trait ImageDescriber: Send + Sync {
    fn model_label(&self) -> String;

    async fn describe(&self, input: &DescribeImageInput) -> Result<ImageDescription, DescribeError>;
}
