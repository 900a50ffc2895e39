//! services/api/src/adapters/cover.rs
//!
//! This module contains the adapter for cover metadata analysis. The first
//! captured page is shown to a vision-capable chat model which guesses the
//! book's title, author, category, and keyword chips. It implements the
//! `CoverAnalysisService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageContent,
        CreateChatCompletionRequestArgs, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use readalong_core::domain::{BookAnalysis, Keyword};
use readalong_core::ports::{CoverAnalysisService, PortError, PortResult};
use serde::Deserialize;
use tracing::warn;

const PROMPT: &str = "Look at this photo of a book page or cover. Respond with ONLY a JSON \
object: {\"title\": string, \"author\": string or null, \"category\": string, \
\"categories\": [string], \"keywords\": [{\"label\": string, \"emoji\": string, \
\"group\": string}]}. Choose a short, reader-friendly primary category. If you cannot \
tell, use \"Unknown Book\" and \"General\". No explanation.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CoverAnalysisService` using an OpenAI vision model.
#[derive(Clone)]
pub struct OpenAiCoverAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCoverAdapter {
    /// Creates a new `OpenAiCoverAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// Response parsing
//=========================================================================================

#[derive(Debug, Default, Deserialize)]
struct RawAnalysis {
    title: Option<String>,
    author: Option<String>,
    category: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    keywords: Vec<Keyword>,
}

/// Permissive parse: fenced code blocks are unwrapped, missing fields fall
/// back to defaults, and unparseable answers degrade to the default analysis
/// rather than failing the whole ingestion.
fn analysis_from_content(content: &str) -> BookAnalysis {
    let stripped = strip_code_fence(content);
    let raw: RawAnalysis = match serde_json::from_str(stripped) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Cover analysis response was not valid JSON ({}), using defaults", e);
            RawAnalysis::default()
        }
    };
    let defaults = BookAnalysis::default();
    BookAnalysis {
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(defaults.title),
        author: raw.author.filter(|a| !a.trim().is_empty()),
        category: raw
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(defaults.category),
        categories: raw.categories,
        keywords: raw.keywords,
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

//=========================================================================================
// `CoverAnalysisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CoverAnalysisService for OpenAiCoverAdapter {
    async fn analyze_cover(&self, image: &[u8]) -> PortResult<BookAnalysis> {
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(PROMPT)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(data_url)
                            .build()
                            .map_err(|e| PortError::Unexpected(e.to_string()))?,
                    )
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
            ]))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .max_tokens(500u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| PortError::Transient(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(analysis_from_content(&content))
    }
}

//=========================================================================================
// Tests
//=========================================================================================
