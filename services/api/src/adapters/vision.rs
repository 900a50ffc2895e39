//! services/api/src/adapters/vision.rs
//!
//! This module contains the OCR adapter implementing the `VisionService`
//! port. The primary path is Google Cloud Vision's document text detection,
//! which reports a tree of blocks, paragraphs, words, and symbols with
//! per-word polygons in the stored image frame. Those rectangles are then
//! rewritten into the displayed frame using the image's EXIF orientation.
//! When the primary provider fails or finds nothing, a general-purpose
//! vision model is asked for the blocks directly.

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
use readalong_core::domain::VisionBlock;
use readalong_core::geometry::{Orientation, Rect};
use readalong_core::ports::{PortError, PortResult, VisionService};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::{info, warn};

const GOOGLE_VISION_URL: &str = "https://vision.googleapis.com/v1/images:annotate";
const OCR_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocks whose concatenated text is shorter than this are OCR noise.
const MIN_BLOCK_TEXT_LEN: usize = 3;
const DEFAULT_CONFIDENCE: f64 = 0.9;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An OCR adapter with a document-text primary and a vision-model fallback.
#[derive(Clone)]
pub struct VisionAdapter {
    http: reqwest::Client,
    google_api_key: Option<String>,
    openai: Option<Client<OpenAIConfig>>,
    fallback_model: String,
}

impl VisionAdapter {
    pub fn new(
        google_api_key: Option<String>,
        openai: Option<Client<OpenAIConfig>>,
        fallback_model: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(OCR_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            google_api_key,
            openai,
            fallback_model,
        }
    }

    /// Reads `(width, height, orientation)` from the image header without
    /// decoding pixel data.
    fn probe_image(image: &[u8]) -> PortResult<(f64, f64, Orientation)> {
        let reader = image::ImageReader::new(Cursor::new(image))
            .with_guessed_format()
            .map_err(|e| PortError::Validation(format!("Unreadable image: {}", e)))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| PortError::Validation(format!("Unreadable image header: {}", e)))?;

        let orientation = exif::Reader::new()
            .read_from_container(&mut Cursor::new(image))
            .ok()
            .and_then(|data| {
                data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                    .and_then(|field| field.value.get_uint(0))
            })
            .map(Orientation::from_exif)
            .unwrap_or(Orientation::Normal);

        Ok((width as f64, height as f64, orientation))
    }

    async fn google_extract(&self, image: &[u8]) -> PortResult<Vec<RawBlock>> {
        let api_key = self
            .google_api_key
            .as_ref()
            .ok_or_else(|| PortError::ConfigMissing("GOOGLE_VISION_API_KEY".to_string()))?;

        let payload = serde_json::json!({
            "requests": [{
                "image": { "content": base64::engine::general_purpose::STANDARD.encode(image) },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }]
            }]
        });

        let response = self
            .http
            .post(GOOGLE_VISION_URL)
            .query(&[("key", api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("Vision request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(PortError::Transient(format!(
                "Vision provider returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Vision provider returned {}: {}",
                status, body
            )));
        }

        let annotated: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Unparseable vision response: {}", e)))?;

        let first = annotated
            .responses
            .into_iter()
            .next()
            .unwrap_or_default();
        if let Some(err) = first.error {
            return Err(PortError::Unexpected(format!(
                "Vision provider error: {}",
                err.message.unwrap_or_default()
            )));
        }

        Ok(blocks_from_annotation(first.full_text_annotation))
    }

    async fn fallback_extract(
        &self,
        image: &[u8],
        displayed_w: f64,
        displayed_h: f64,
    ) -> PortResult<Vec<VisionBlock>> {
        let openai = self
            .openai
            .as_ref()
            .ok_or_else(|| PortError::ConfigMissing("OPENAI_API_KEY".to_string()))?;

        let prompt = format!(
            "This photo of a book page is {w} pixels wide and {h} pixels tall. \
             Find every paragraph of printed text. Respond with ONLY a JSON array where \
             each element is {{\"text\": string, \"x\": number, \"y\": number, \
             \"width\": number, \"height\": number, \"confidence\": number}} with pixel \
             coordinates of the paragraph's bounding box. No explanation.",
            w = displayed_w as i64,
            h = displayed_h as i64
        );

        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt)
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
            .model(&self.fallback_model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = tokio::time::timeout(OCR_TIMEOUT, openai.chat().create(request))
            .await
            .map_err(|_| PortError::Transient("Vision fallback timed out".to_string()))?
            .map_err(|e| PortError::Transient(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let blocks = parse_fallback_blocks(&content)?;
        Ok(blocks
            .into_iter()
            .filter(|b| b.text.trim().chars().count() >= MIN_BLOCK_TEXT_LEN)
            .map(|b| VisionBlock {
                text: b.text,
                rect: Rect::new(b.x, b.y, b.width, b.height)
                    .clip_to_bounds(displayed_w, displayed_h),
                confidence: b.confidence.clamp(0.0, 1.0),
            })
            .collect())
    }
}

//=========================================================================================
// `VisionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl VisionService for VisionAdapter {
    async fn extract_blocks(&self, image: &[u8]) -> PortResult<Vec<VisionBlock>> {
        let (stored_w, stored_h, orientation) = Self::probe_image(image)?;
        let (displayed_w, displayed_h) = orientation.displayed_dimensions(stored_w, stored_h);

        // Primary path: document text detection in the stored frame,
        // reconciled to the displayed frame.
        match self.google_extract(image).await {
            Ok(raw) if !raw.is_empty() => {
                return Ok(raw
                    .into_iter()
                    .map(|b| VisionBlock {
                        text: b.text,
                        rect: b
                            .rect
                            .to_displayed(orientation, stored_w, stored_h)
                            .clip_to_bounds(displayed_w, displayed_h),
                        confidence: b.confidence,
                    })
                    .collect());
            }
            Ok(_) => info!("Primary OCR provider returned no blocks, trying fallback"),
            Err(e) => warn!("Primary OCR provider failed, trying fallback: {}", e),
        }

        match self.fallback_extract(image, displayed_w, displayed_h).await {
            Ok(blocks) => {
                info!("OCR fallback produced {} block(s)", blocks.len());
                Ok(blocks)
            }
            Err(e) => {
                // Both paths are exhausted; the pipeline records the page
                // as failed on an empty result.
                warn!("OCR fallback failed: {}", e);
                if e.is_transient() {
                    Err(e)
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }
}

//=========================================================================================
// Google Vision response model
//=========================================================================================

/// A provider block in the stored coordinate frame, before reconciliation.
#[derive(Debug, Clone, PartialEq)]
struct RawBlock {
    text: String,
    rect: Rect,
    confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<ProviderStatus>,
}

#[derive(Debug, Deserialize)]
struct ProviderStatus {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    pages: Vec<AnnotatedPage>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotatedPage {
    #[serde(default)]
    blocks: Vec<AnnotatedBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotatedBlock {
    #[serde(default)]
    paragraphs: Vec<AnnotatedParagraph>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotatedParagraph {
    #[serde(default)]
    words: Vec<AnnotatedWord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotatedWord {
    #[serde(default)]
    symbols: Vec<AnnotatedSymbol>,
    bounding_box: Option<BoundingPoly>,
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotatedSymbol {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

/// Vertices omit zero-valued coordinates on the wire.
#[derive(Debug, Default, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
}

/// Flattens the provider's block/paragraph/word tree into text blocks with
/// stored-frame bounding rectangles.
fn blocks_from_annotation(annotation: Option<TextAnnotation>) -> Vec<RawBlock> {
    let mut out = Vec::new();
    let Some(annotation) = annotation else {
        return out;
    };
    for page in annotation.pages {
        for block in page.blocks {
            let mut paragraph_texts = Vec::new();
            let mut confidences = Vec::new();
            let mut min_x = f64::MAX;
            let mut min_y = f64::MAX;
            let mut max_x = f64::MIN;
            let mut max_y = f64::MIN;

            for paragraph in &block.paragraphs {
                let words: Vec<String> = paragraph
                    .words
                    .iter()
                    .map(|w| w.symbols.iter().map(|s| s.text.as_str()).collect())
                    .collect();
                if !words.is_empty() {
                    paragraph_texts.push(words.join(" "));
                }
                for word in &paragraph.words {
                    if let Some(c) = word.confidence {
                        confidences.push(c);
                    }
                    if let Some(poly) = &word.bounding_box {
                        for vertex in &poly.vertices {
                            let x = vertex.x.unwrap_or(0.0);
                            let y = vertex.y.unwrap_or(0.0);
                            min_x = min_x.min(x);
                            min_y = min_y.min(y);
                            max_x = max_x.max(x);
                            max_y = max_y.max(y);
                        }
                    }
                }
            }

            // Paragraphs within one block collapse into a single text run.
            let text = paragraph_texts.join(" ");
            if text.trim().chars().count() < MIN_BLOCK_TEXT_LEN || min_x > max_x {
                continue;
            }
            let confidence = if confidences.is_empty() {
                DEFAULT_CONFIDENCE
            } else {
                confidences.iter().sum::<f64>() / confidences.len() as f64
            };
            out.push(RawBlock {
                text,
                rect: Rect::new(min_x, min_y, max_x - min_x, max_y - min_y),
                confidence,
            });
        }
    }
    out
}

//=========================================================================================
// Fallback response model
//=========================================================================================

#[derive(Debug, Deserialize)]
struct FallbackBlock {
    text: String,
    x: f64,
    y: f64,
    #[serde(alias = "w")]
    width: f64,
    #[serde(alias = "h")]
    height: f64,
    #[serde(default = "default_fallback_confidence")]
    confidence: f64,
}

fn default_fallback_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

/// The model may answer with a bare array or wrap it in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FallbackPayload {
    List(Vec<FallbackBlock>),
    Wrapped {
        #[serde(alias = "textBlocks", alias = "text_blocks")]
        blocks: Vec<FallbackBlock>,
    },
}

/// Accepts a raw JSON payload or one wrapped in a fenced code block.
fn parse_fallback_blocks(content: &str) -> PortResult<Vec<FallbackBlock>> {
    let stripped = strip_code_fence(content);
    let payload: FallbackPayload = serde_json::from_str(stripped).map_err(|e| {
        PortError::Unexpected(format!("Unparseable fallback OCR response: {}", e))
    })?;
    Ok(match payload {
        FallbackPayload::List(blocks) => blocks,
        FallbackPayload::Wrapped { blocks } => blocks,
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") and the closing fence.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, confidence: Option<f64>, xs: [f64; 2], ys: [f64; 2]) -> AnnotatedWord {
        AnnotatedWord {
            symbols: text
                .chars()
                .map(|c| AnnotatedSymbol {
                    text: c.to_string(),
                })
                .collect(),
            bounding_box: Some(BoundingPoly {
                vertices: vec![
                    Vertex {
                        x: Some(xs[0]),
                        y: Some(ys[0]),
                    },
                    Vertex {
                        x: Some(xs[1]),
                        y: Some(ys[1]),
                    },
                ],
            }),
            confidence,
        }
    }

    fn annotation(blocks: Vec<AnnotatedBlock>) -> Option<TextAnnotation> {
        Some(TextAnnotation {
            pages: vec![AnnotatedPage { blocks }],
        })
    }

    #[test]
    fn joins_words_and_paragraphs_with_spaces() {
        let block = AnnotatedBlock {
            paragraphs: vec![
                AnnotatedParagraph {
                    words: vec![
                        word("The", Some(0.8), [10.0, 40.0], [10.0, 20.0]),
                        word("cat", Some(1.0), [45.0, 70.0], [10.0, 20.0]),
                    ],
                },
                AnnotatedParagraph {
                    words: vec![word("sat", Some(0.6), [10.0, 40.0], [25.0, 35.0])],
                },
            ],
        };
        let out = blocks_from_annotation(annotation(vec![block]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "The cat sat");
        assert!((out[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(out[0].rect, Rect::new(10.0, 10.0, 60.0, 25.0));
    }

    #[test]
    fn rejects_blocks_shorter_than_three_chars() {
        let block = AnnotatedBlock {
            paragraphs: vec![AnnotatedParagraph {
                words: vec![word("ab", Some(0.9), [0.0, 5.0], [0.0, 5.0])],
            }],
        };
        assert!(blocks_from_annotation(annotation(vec![block])).is_empty());
    }

    #[test]
    fn defaults_confidence_when_provider_omits_it() {
        let block = AnnotatedBlock {
            paragraphs: vec![AnnotatedParagraph {
                words: vec![word("hello", None, [0.0, 50.0], [0.0, 10.0])],
            }],
        };
        let out = blocks_from_annotation(annotation(vec![block]));
        assert_eq!(out[0].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn missing_vertex_coordinates_read_as_zero() {
        let block = AnnotatedBlock {
            paragraphs: vec![AnnotatedParagraph {
                words: vec![AnnotatedWord {
                    symbols: vec![AnnotatedSymbol {
                        text: "dog".to_string(),
                    }],
                    bounding_box: Some(BoundingPoly {
                        vertices: vec![
                            Vertex { x: None, y: None },
                            Vertex {
                                x: Some(30.0),
                                y: Some(12.0),
                            },
                        ],
                    }),
                    confidence: Some(0.5),
                }],
            }],
        };
        let out = blocks_from_annotation(annotation(vec![block]));
        assert_eq!(out[0].rect, Rect::new(0.0, 0.0, 30.0, 12.0));
    }

    #[test]
    fn fallback_accepts_bare_array() {
        let content = r#"[{"text": "Hello there", "x": 1, "y": 2, "width": 3, "height": 4}]"#;
        let blocks = parse_fallback_blocks(content).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Hello there");
        assert_eq!(blocks[0].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn fallback_accepts_fenced_wrapped_object() {
        let content = "```json\n{\"blocks\": [{\"text\": \"Hi all\", \"x\": 0, \"y\": 0, \"w\": 10, \"h\": 5, \"confidence\": 0.7}]}\n```";
        let blocks = parse_fallback_blocks(content).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].width, 10.0);
        assert_eq!(blocks[0].confidence, 0.7);
    }

    #[test]
    fn fallback_rejects_prose() {
        assert!(parse_fallback_blocks("I could not find any text.").is_err());
    }
}
