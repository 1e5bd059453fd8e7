mod batch;
mod minimax;

use crate::config::AcousticParams;
use crate::dialogue::DialogueLine;
use crate::util::is_http_retryable;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use batch::{
    synthesize_all, synthesize_line, synthesize_paced, synthesize_stream, BatchPolicy, Pacer,
};
pub use minimax::MiniMaxClient;

/// MiniMax `base_resp.status_code` for "rate limit triggered".
pub const API_RATE_LIMITED: i64 = 1002;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VoiceId(pub String);

impl VoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VoiceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: VoiceId,
    pub acoustic: AcousticParams,
}

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("http error {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("response carried no audio payload")]
    MissingAudio,

    #[error("audio payload is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TtsError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::HttpStatus { status, .. } => is_http_retryable(*status),
            Self::Api { code, .. } => *code == API_RATE_LIMITED,
            Self::MissingAudio | Self::InvalidHex(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Turns one piece of text into one MP3 clip.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, request: SynthesisRequest) -> BoxFuture<'_, Result<Bytes, TtsError>>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum SynthesisOutcome {
    Success(Bytes),
    Failure(String),
}

/// Outcome of synthesizing one dialogue line.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisResult {
    pub line: DialogueLine,
    pub outcome: SynthesisOutcome,
}

impl SynthesisResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SynthesisOutcome::Success(_))
    }

    pub fn audio(&self) -> Option<&Bytes> {
        match &self.outcome {
            SynthesisOutcome::Success(audio) => Some(audio),
            SynthesisOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            SynthesisOutcome::Success(_) => None,
            SynthesisOutcome::Failure(reason) => Some(reason.as_str()),
        }
    }
}

/// `base_resp` envelope shared by every MiniMax endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct BaseResp {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: String,
}

impl BaseResp {
    pub fn failure(&self) -> Option<(i64, String)> {
        (self.status_code != 0).then(|| (self.status_code, self.status_msg.clone()))
    }
}
