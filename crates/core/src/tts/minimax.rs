use crate::config::{ApiKey, AudioEncoding, Settings};
use crate::tts::{BaseResp, SpeechSynthesizer, SynthesisRequest, TtsError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

const LOG_TARGET: &str = "tts::minimax";

/// Client for the MiniMax `t2a_v2` endpoint.
#[derive(Clone)]
pub struct MiniMaxClient {
    client: Client,
    api_key: ApiKey,
    group_id: String,
    base_url: Url,
    model: String,
    encoding: AudioEncoding,
}

impl MiniMaxClient {
    pub fn new(settings: &Settings) -> Result<Self, TtsError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            group_id: settings.group_id.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            encoding: settings.encoding,
        })
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    fn request_body<'a>(&'a self, request: &'a SynthesisRequest) -> T2aRequest<'a> {
        T2aRequest {
            text: &request.text,
            model: &self.model,
            stream: false,
            output_format: self.encoding.wire_name(),
            language_boost: "auto",
            voice_setting: VoiceSetting {
                voice_id: request.voice.as_str(),
                speed: request.acoustic.speed,
                vol: request.acoustic.vol,
                // The API only takes whole semitones.
                pitch: request.acoustic.pitch.round() as i32,
            },
            audio_setting: AudioSetting {
                sample_rate: request.acoustic.sample_rate,
                bitrate: request.acoustic.bitrate,
                format: "mp3",
            },
        }
    }

    async fn fetch_remote_audio(&self, url: &str) -> Result<Bytes, TtsError> {
        tracing::debug!(target: LOG_TARGET, %url, "downloading synthesized audio");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TtsError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }
}

#[derive(Serialize)]
struct T2aRequest<'a> {
    text: &'a str,
    model: &'a str,
    stream: bool,
    output_format: &'static str,
    language_boost: &'static str,
    voice_setting: VoiceSetting<'a>,
    audio_setting: AudioSetting,
}

#[derive(Serialize)]
struct VoiceSetting<'a> {
    voice_id: &'a str,
    speed: f32,
    vol: f32,
    pitch: i32,
}

#[derive(Serialize)]
struct AudioSetting {
    sample_rate: u32,
    bitrate: u32,
    format: &'static str,
}

#[derive(Deserialize)]
struct T2aResponse {
    #[serde(default)]
    base_resp: Option<BaseResp>,
    #[serde(default)]
    data: Option<T2aData>,
}

#[derive(Deserialize)]
struct T2aData {
    #[serde(default)]
    audio: Option<String>,
}

impl SpeechSynthesizer for MiniMaxClient {
    fn synthesize(&self, request: SynthesisRequest) -> BoxFuture<'_, Result<Bytes, TtsError>> {
        async move {
            let body = self.request_body(&request);

            let response = self
                .client
                .post(self.base_url.clone())
                .header(CONTENT_TYPE, "application/json")
                .bearer_auth(self.api_key.expose())
                .header("Groupid", &self.group_id)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(TtsError::HttpStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            let parsed: T2aResponse = response
                .json()
                .await
                .map_err(|e| TtsError::InvalidResponse(format!("failed to parse JSON: {e}")))?;

            if let Some((code, message)) = parsed.base_resp.as_ref().and_then(BaseResp::failure) {
                return Err(TtsError::Api { code, message });
            }

            let audio = parsed
                .data
                .and_then(|d| d.audio)
                .filter(|a| !a.trim().is_empty())
                .ok_or(TtsError::MissingAudio)?;

            match self.encoding {
                AudioEncoding::HexEncoded => Ok(Bytes::from(hex::decode(audio.trim())?)),
                AudioEncoding::RemoteUrl => self.fetch_remote_audio(audio.trim()).await,
            }
        }
        .boxed()
    }
}
