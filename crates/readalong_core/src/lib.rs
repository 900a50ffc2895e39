pub mod content;
pub mod domain;
pub mod geometry;
pub mod ports;

pub use domain::{
    Book, BookAnalysis, BookStatus, BlockStatus, CaptureSession, CharTiming, Keyword, Page,
    Progress, SessionStatus, SpeechResult, TextBlock, User, UserCredentials, UserPreferences,
    VisionBlock,
};
pub use geometry::{Orientation, Rect};
pub use ports::{
    ArtifactStore, ByteStream, CoverAnalysisService, MetadataStore, PortError, PortResult,
    SpeechService, VisionService, VoiceConfig,
};
