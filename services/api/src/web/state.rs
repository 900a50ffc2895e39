//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use readalong_core::ports::{
    ArtifactStore, CoverAnalysisService, MetadataStore, PortError, PortResult, SpeechService,
    VisionService, VoiceConfig,
};
use std::sync::Arc;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn MetadataStore>,
    pub store: Arc<dyn ArtifactStore>,
    pub vision: Arc<dyn VisionService>,
    pub speech: Arc<dyn SpeechService>,
    pub cover: Arc<dyn CoverAnalysisService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Resolves the synthesis credentials for one caller: the voice comes
    /// from their preferences (falling back to the configured default), the
    /// API key from configuration. Passed by value into the speech port.
    pub async fn resolve_voice(&self, user_id: Uuid) -> PortResult<VoiceConfig> {
        let api_key = self
            .config
            .elevenlabs_api_key
            .clone()
            .ok_or_else(|| PortError::ConfigMissing("ELEVENLABS_API_KEY".to_string()))?;
        let prefs = self.db.get_preferences(user_id).await?;
        let voice_id = prefs
            .voice_id
            .unwrap_or_else(|| self.config.default_voice_id.clone());
        Ok(VoiceConfig { api_key, voice_id })
    }
}
