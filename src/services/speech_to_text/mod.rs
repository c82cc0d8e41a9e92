//! Speech-to-Text service wrapper.
//!
//! Continuous recognition runs over a [`StreamConnector`] session at
//! `/v1/recognize`; one-shot recognition and model listing go through the
//! pooled REST connector.
//!
//! [`StreamConnector`]: crate::core::stream::StreamConnector

mod client;
mod messages;


use std::time::Duration;

pub use client::{AudioChunk, ErrorCallback, ResultCallback, SpeechToText};
pub use messages::{Alternative, ResultList, SpeechModel, SpeechResult, TimeStamp, WordConfidence};

/// Service ID used for credential lookup.
pub const SERVICE_ID: &str = "SpeechToTextV1";

/// Largest WAV clip accepted by one-shot recognition.
pub const MAX_RECOGNIZE_CLIP_SIZE: usize = 4 * 1024 * 1024;

/// Chunks held while waiting for the service to start listening.
pub const MAX_QUEUED_RECORDINGS: usize = 30;

pub const DEFAULT_MODEL: &str = "en-US_BroadbandModel";
pub const DEFAULT_RECORDING_HZ: u32 = 22050;
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.03;

/// Recognition parameters shared by the streaming and REST paths.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechToTextOptions {
    pub model: String,
    pub max_alternatives: u32,
    pub timestamps: bool,
    pub word_confidence: bool,
    /// Sample rate of the L16 audio sent while listening
    pub recording_hz: u32,
    /// End the utterance when a chunk's level drops below `silence_threshold`
    pub detect_silence: bool,
    pub silence_threshold: f32,
    /// Overrides the service's keep-alive interval when set
    pub keep_alive_interval: Option<Duration>,
}

impl Default for SpeechToTextOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_alternatives: 1,
            timestamps: false,
            word_confidence: false,
            recording_hz: DEFAULT_RECORDING_HZ,
            detect_silence: true,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            keep_alive_interval: None,
        }
    }
}
