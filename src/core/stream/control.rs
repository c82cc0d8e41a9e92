//! JSON control messages carried in text frames.
//!
//! ```json
//! {"action":"start","content-type":"audio/l16;rate=16000;channels=1;","continuous":true,...}
//! {"action":"stop"}
//! {"action":"no-op"}
//! ```

use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::core::error::ConnectorResult;

/// Content type for mono 16-bit linear PCM at `sample_rate`.
pub fn l16_content_type(sample_rate: u32) -> String {
    format!("audio/l16;rate={sample_rate};channels=1;")
}

/// Recognition session parameters sent with `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage {
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub continuous: bool,
    pub max_alternatives: u32,
    pub interim_results: bool,
    pub word_confidence: bool,
    pub timestamps: bool,
}

impl StartMessage {
    /// Continuous recognition of L16 audio with interim results.
    pub fn l16(sample_rate: u32) -> Self {
        Self {
            content_type: l16_content_type(sample_rate),
            continuous: true,
            max_alternatives: 1,
            interim_results: true,
            word_confidence: false,
            timestamps: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ControlMessage {
    Start(StartMessage),
    Stop,
    NoOp,
}

impl ControlMessage {
    pub fn to_json(&self) -> ConnectorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Text frame carrying this control message.
    pub fn to_message(&self) -> ConnectorResult<Message> {
        Ok(Message::Text(self.to_json()?))
    }
}
