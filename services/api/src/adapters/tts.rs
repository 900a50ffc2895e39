//! services/api/src/adapters/tts.rs
//!
//! This module contains the adapter for the ElevenLabs synthesis service.
//! It implements the `SpeechService` port from the `core` crate, returning
//! MP3 audio plus optional character-level timing arrays. The adapter is
//! content-only: caching and content identity live with the caller.

use async_trait::async_trait;
use base64::Engine;
use readalong_core::domain::{CharTiming, SpeechResult};
use readalong_core::ports::{PortError, PortResult, SpeechService, VoiceConfig};
use serde::Deserialize;
use std::time::Duration;

const TTS_TIMEOUT: Duration = Duration::from_secs(60);
const MODEL_ID: &str = "eleven_multilingual_v2";
const STABILITY: f64 = 0.5;
const SIMILARITY_BOOST: f64 = 0.75;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechService` port using the ElevenLabs
/// with-timestamps endpoint.
#[derive(Clone)]
pub struct ElevenLabsAdapter {
    http: reqwest::Client,
}

impl ElevenLabsAdapter {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(TTS_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for ElevenLabsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

//=========================================================================================
// Provider wire types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    audio_base64: String,
    alignment: Option<RawAlignment>,
    normalized_alignment: Option<RawAlignment>,
}

/// The provider reports characters and their timings as parallel arrays.
#[derive(Debug, Deserialize)]
struct RawAlignment {
    characters: Vec<String>,
    character_start_times_seconds: Vec<f64>,
    character_end_times_seconds: Vec<f64>,
}

fn convert_alignment(raw: RawAlignment) -> Option<Vec<CharTiming>> {
    if raw.characters.is_empty() {
        return None;
    }
    let timings: Vec<CharTiming> = raw
        .characters
        .iter()
        .zip(raw.character_start_times_seconds.iter())
        .zip(raw.character_end_times_seconds.iter())
        .filter_map(|((c, start), end)| {
            c.chars().next().map(|character| CharTiming {
                character,
                start_time_s: *start,
                end_time_s: *end,
            })
        })
        .collect();
    if timings.is_empty() {
        None
    } else {
        Some(timings)
    }
}

//=========================================================================================
// `SpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechService for ElevenLabsAdapter {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> PortResult<SpeechResult> {
        if voice.api_key.is_empty() {
            return Err(PortError::ConfigMissing(
                "ElevenLabs API key is not configured".to_string(),
            ));
        }
        if voice.voice_id.is_empty() {
            return Err(PortError::ConfigMissing(
                "ElevenLabs voice is not configured".to_string(),
            ));
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}/with-timestamps",
            voice.voice_id
        );
        let payload = serde_json::json!({
            "text": text,
            "model_id": MODEL_ID,
            "voice_settings": {
                "stability": STABILITY,
                "similarity_boost": SIMILARITY_BOOST,
            }
        });

        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &voice.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("Synthesis request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(PortError::Transient(format!(
                "Synthesis provider returned {}",
                status
            )));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PortError::ConfigMissing(
                "Synthesis provider rejected the configured credentials".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Synthesis provider returned {}: {}",
                status, body
            )));
        }

        let body: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Unparseable synthesis response: {}", e)))?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(&body.audio_base64)
            .map_err(|e| PortError::Unexpected(format!("Corrupt audio payload: {}", e)))?;

        Ok(SpeechResult {
            audio,
            alignment: body.alignment.and_then(convert_alignment),
            normalized_alignment: body.normalized_alignment.and_then(convert_alignment),
        })
    }
}

//=========================================================================================
// Tests
//=========================================================================================
