//! Speech-to-Text payload types.
//!
//! Shared by the streaming session and the one-shot REST endpoints.

use serde::{Deserialize, Serialize};

// =============================================================================
// Recognition Results
// =============================================================================

/// `{"results":[...]}` payload from `/v1/recognize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultList {
    pub results: Vec<SpeechResult>,
    #[serde(default)]
    pub result_index: Option<u32>,
}

impl ResultList {
    /// Best transcript of the most recent result.
    pub fn best_transcript(&self) -> Option<&str> {
        self.results
            .last()
            .and_then(|result| result.alternatives.first())
            .map(|alt| alt.transcript.as_str())
    }

    pub fn has_final(&self) -> bool {
        self.results.iter().any(|result| result.is_final)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechResult {
    /// Final results will not change; interim ones may.
    #[serde(rename = "final")]
    pub is_final: bool,
    pub alternatives: Vec<Alternative>,
}

/// One transcription hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub timestamps: Option<Vec<TimeStamp>>,
    #[serde(default)]
    pub word_confidence: Option<Vec<WordConfidence>>,
}

/// `[word, start_seconds, end_seconds]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStamp(pub String, pub f64, pub f64);

/// `[word, confidence]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordConfidence(pub String, pub f64);

// =============================================================================
// Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechModel {
    pub name: String,
    pub rate: u32,
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelList {
    pub(crate) models: Vec<SpeechModel>,
}

// =============================================================================
// Inbound Session Messages
// =============================================================================

/// Text frame received on a listening session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    Results(ResultList),
    State(String),
    Error(String),
    Unknown(serde_json::Value),
}

impl SessionEvent {
    pub(crate) fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        if value.get("results").is_some() {
            return Ok(Self::Results(serde_json::from_value(value)?));
        }
        if let Some(state) = value.get("state").and_then(|s| s.as_str()) {
            return Ok(Self::State(state.to_string()));
        }
        if let Some(error) = value.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Ok(Self::Error(message));
        }
        Ok(Self::Unknown(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results_with_word_details() {
        let json = r#"{
            "result_index": 0,
            "results": [{
                "final": true,
                "alternatives": [{
                    "transcript": "hello world ",
                    "confidence": 0.92,
                    "timestamps": [["hello", 0.1, 0.4], ["world", 0.5, 0.9]],
                    "word_confidence": [["hello", 0.95], ["world", 0.89]]
                }]
            }]
        }"#;

        let SessionEvent::Results(list) = SessionEvent::parse(json).unwrap() else {
            panic!("expected results");
        };
        assert!(list.has_final());
        assert_eq!(list.best_transcript(), Some("hello world "));

        let alt = &list.results[0].alternatives[0];
        assert_eq!(alt.confidence, Some(0.92));
        assert_eq!(
            alt.timestamps.as_deref().unwrap()[1],
            TimeStamp("world".to_string(), 0.5, 0.9)
        );
        assert_eq!(
            alt.word_confidence.as_deref().unwrap()[0],
            WordConfidence("hello".to_string(), 0.95)
        );
    }

    #[test]
    fn test_parse_interim_without_optional_fields() {
        let json = r#"{"results":[{"final":false,"alternatives":[{"transcript":"hel"}]}]}"#;
        let SessionEvent::Results(list) = SessionEvent::parse(json).unwrap() else {
            panic!("expected results");
        };
        assert!(!list.has_final());
        assert_eq!(list.results[0].alternatives[0].confidence, None);
        assert_eq!(list.result_index, None);
    }

    #[test]
    fn test_parse_state_error_and_unknown() {
        assert_eq!(
            SessionEvent::parse(r#"{"state":"listening"}"#).unwrap(),
            SessionEvent::State("listening".to_string())
        );
        assert_eq!(
            SessionEvent::parse(r#"{"error":"No speech detected for 30s."}"#).unwrap(),
            SessionEvent::Error("No speech detected for 30s.".to_string())
        );
        assert!(matches!(
            SessionEvent::parse(r#"{"warnings":["x"]}"#).unwrap(),
            SessionEvent::Unknown(_)
        ));
        assert!(SessionEvent::parse("not json").is_err());
    }

    #[test]
    fn test_parse_model_list() {
        let json = r#"{"models":[
            {"name":"en-US_BroadbandModel","rate":16000,"language":"en-US",
             "description":"US English broadband model.",
             "url":"https://stream.example.com/v1/models/en-US_BroadbandModel"},
            {"name":"ja-JP_NarrowbandModel","rate":8000,"language":"ja-JP"}
        ]}"#;
        let list: ModelList = serde_json::from_str(json).unwrap();
        assert_eq!(list.models.len(), 2);
        assert_eq!(list.models[0].rate, 16000);
        assert_eq!(list.models[1].description, "");
        assert_eq!(list.models[1].url, None);
    }
}
