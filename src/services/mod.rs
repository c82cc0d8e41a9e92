//! Service wrappers built on the connection layer.

pub mod speech_to_text;

pub use speech_to_text::{
    Alternative, AudioChunk, ResultList, SpeechModel, SpeechResult, SpeechToText,
    SpeechToTextOptions, TimeStamp, WordConfidence,
};
