//! Local web page for auditioning voices before committing them to
//! `voice_map`.

use anyhow::Context;
use axum::extract::{Json, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use podcast_narrator_core::audio::AudioAssembler;
use podcast_narrator_core::config::{Settings, VoiceConfig};
use podcast_narrator_core::dialogue::DialogueLine;
use podcast_narrator_core::tts::{
    synthesize_line, synthesize_paced, BatchPolicy, MiniMaxClient, Pacer, SpeechSynthesizer,
    VoiceId,
};
use podcast_narrator_core::voices::{VoiceCatalog, VoiceEntry};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

const LOG_TARGET: &str = "serve";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Voice preview</title></head>
<body>
<h1>Voice preview</h1>
<select id="voice"></select>
<textarea id="text" rows="4" cols="60">大家好，欢迎收听本期节目。</textarea>
<button id="play">Preview</button>

<h2>Compose</h2>
<div id="segments"></div>
<button id="add">Add segment</button>
<button id="compose">Compose</button>

<p id="status"></p>
<audio id="player" controls></audio>
<script>
const voice = document.getElementById('voice');
const status = document.getElementById('status');
let voiceList = [];

function fillVoices(select) {
  for (const v of voiceList) {
    const o = document.createElement('option');
    o.value = v.voice_id;
    o.textContent = (v.voice_name || v.voice_id) + ' (' + v.voice_id + ')';
    select.appendChild(o);
  }
}

function addSegment() {
  const row = document.createElement('div');
  row.className = 'segment';
  const select = document.createElement('select');
  fillVoices(select);
  const text = document.createElement('input');
  text.size = 60;
  const remove = document.createElement('button');
  remove.textContent = 'Remove';
  remove.onclick = () => row.remove();
  row.append(select, text, remove);
  document.getElementById('segments').appendChild(row);
}

async function play(path, body) {
  status.textContent = 'Generating...';
  const r = await fetch(path, {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body),
  });
  if (!r.ok) { status.textContent = (await r.json()).error; return; }
  document.getElementById('player').src = URL.createObjectURL(await r.blob());
  status.textContent = '';
}

fetch('/api/voices').then(r => r.json()).then(list => {
  voiceList = list;
  fillVoices(voice);
  addSegment();
});
document.getElementById('add').onclick = addSegment;
document.getElementById('play').onclick = () => play('/api/preview', {
  text: document.getElementById('text').value,
  voice_id: voice.value,
});
document.getElementById('compose').onclick = () => {
  const segments = [...document.querySelectorAll('.segment')].map(row => ({
    voice_id: row.querySelector('select').value,
    text: row.querySelector('input').value,
  }));
  play('/api/compose', {segments});
};
</script>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    assembler: AudioAssembler,
    voices: VoiceConfig,
    policy: BatchPolicy,
    voices_file: PathBuf,
}

impl AppState {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        assembler: AudioAssembler,
        voices: VoiceConfig,
        policy: BatchPolicy,
        voices_file: PathBuf,
    ) -> Self {
        Self {
            synthesizer,
            assembler,
            voices,
            policy,
            voices_file,
        }
    }

    /// Speaks everything with `voice` while keeping the configured acoustics.
    fn single_voice(&self, voice: &str) -> VoiceConfig {
        VoiceConfig {
            acoustic: self.voices.acoustic,
            ..VoiceConfig::new(VoiceId::from(voice))
        }
    }
}

pub async fn run(settings: Settings, addr: SocketAddr, voices_file: PathBuf) -> anyhow::Result<()> {
    let client = MiniMaxClient::new(&settings).context("failed to build speech client")?;
    tracing::info!(
        target: LOG_TARGET,
        output_format = client.encoding().wire_name(),
        voices = %voices_file.display(),
        "starting preview server"
    );

    let state = AppState::new(
        Arc::new(client),
        AudioAssembler::mp3(settings.voices.acoustic.bitrate),
        settings.voices.clone(),
        BatchPolicy::from_settings(&settings),
        voices_file,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(target: LOG_TARGET, "listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .await
        .context("preview server stopped")?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/voices", get(list_voices))
        .route("/api/preview", post(preview))
        .route("/api/compose", post(compose))
        .with_state(state)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn upstream(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn mp3(audio: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// System voices from the saved catalog; empty when there is none yet.
async fn list_voices(State(state): State<AppState>) -> Json<Vec<VoiceEntry>> {
    match VoiceCatalog::load(&state.voices_file).await {
        Ok(catalog) => Json(catalog.system_voices()),
        Err(e) => {
            tracing::warn!(target: LOG_TARGET, error = %e, "voice catalog unavailable");
            Json(Vec::new())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    voice_id: String,
}

async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Response, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }
    if request.voice_id.trim().is_empty() {
        return Err(ApiError::bad_request("voice_id is required"));
    }

    let voices = state.single_voice(request.voice_id.trim());
    let line = DialogueLine {
        index: 0,
        speaker: request.voice_id.trim().to_owned(),
        text: request.text.trim().to_owned(),
    };
    let result = synthesize_line(
        state.synthesizer.as_ref(),
        line,
        &voices,
        &state.policy.retry,
    )
    .await;

    match result.audio() {
        Some(audio) => Ok(mp3(audio.clone())),
        None => Err(ApiError::upstream(
            result.failure().unwrap_or("synthesis failed"),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    text: String,
    #[serde(default)]
    voice_id: String,
}

#[derive(Debug, Deserialize)]
struct ComposeRequest {
    #[serde(default)]
    segments: Vec<Segment>,
}

/// Renders each segment with its own voice and returns them merged. The
/// first failing segment aborts the request.
async fn compose(
    State(state): State<AppState>,
    Json(request): Json<ComposeRequest>,
) -> Result<Response, ApiError> {
    if request.segments.is_empty() {
        return Err(ApiError::bad_request("segments must not be empty"));
    }
    if let Some(index) = request
        .segments
        .iter()
        .position(|s| s.text.trim().is_empty() || s.voice_id.trim().is_empty())
    {
        return Err(ApiError::bad_request(format!(
            "segment {index} needs both text and voice_id"
        )));
    }

    let pacer = Pacer::new(state.policy.request_delay);
    let mut clips = Vec::with_capacity(request.segments.len());
    for (index, segment) in request.segments.into_iter().enumerate() {
        let voice_id = segment.voice_id.trim();
        let voices = state.single_voice(voice_id);
        let line = DialogueLine {
            index,
            speaker: voice_id.to_owned(),
            text: segment.text.trim().to_owned(),
        };
        let result = synthesize_paced(
            state.synthesizer.as_ref(),
            line,
            &voices,
            &state.policy.retry,
            &pacer,
        )
        .await;

        match result.audio() {
            Some(audio) => clips.push(audio.clone()),
            None => {
                return Err(ApiError::upstream(format!(
                    "segment {index} failed: {}",
                    result.failure().unwrap_or("synthesis failed")
                )))
            }
        }
    }

    let merged = state.assembler.merge_to_bytes(&clips).await.map_err(|e| {
        tracing::warn!(target: LOG_TARGET, error = %e, "failed to merge composed audio");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    })?;
    if let Some(index) = merged.skipped.first() {
        return Err(ApiError::upstream(format!(
            "segment {index} failed: returned audio could not be decoded"
        )));
    }
    Ok(mp3(merged.audio))
}
