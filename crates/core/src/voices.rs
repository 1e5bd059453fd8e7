//! Listing the voices available to an account through MiniMax `get_voice`.
//!
//! The raw response is kept as-is so it can be saved and reloaded later by
//! the preview server; the typed groups are a read-only view over it.

use crate::config::Settings;
use crate::tts::BaseResp;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "voices";

pub const DEFAULT_VOICES_FILE: &str = "voices_data.json";

#[derive(thiserror::Error, Debug)]
pub enum VoiceListError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("invalid voice catalog: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceEntry {
    #[serde(default)]
    pub voice_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumental_id: Option<String>,
}

impl VoiceEntry {
    pub fn name(&self) -> &str {
        self.voice_name.as_deref().unwrap_or("")
    }

    fn description_line(&self) -> Option<String> {
        self.description
            .as_ref()
            .filter(|d| !d.is_empty())
            .map(|d| d.join(", "))
    }

    fn created(&self) -> String {
        match &self.created_time {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "N/A".to_owned(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Default, Deserialize)]
struct VoiceGroups {
    #[serde(default)]
    system_voice: Option<Vec<VoiceEntry>>,
    #[serde(default)]
    voice_cloning: Option<Vec<VoiceEntry>>,
    #[serde(default)]
    voice_generation: Option<Vec<VoiceEntry>>,
    #[serde(default)]
    music_generation: Option<Vec<VoiceEntry>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoiceCatalog {
    raw: Value,
    pub system_voice: Vec<VoiceEntry>,
    pub voice_cloning: Vec<VoiceEntry>,
    pub voice_generation: Vec<VoiceEntry>,
    pub music_generation: Vec<VoiceEntry>,
}

impl Default for VoiceCatalog {
    fn default() -> Self {
        Self {
            raw: json!({}),
            system_voice: Vec::new(),
            voice_cloning: Vec::new(),
            voice_generation: Vec::new(),
            music_generation: Vec::new(),
        }
    }
}

impl VoiceCatalog {
    pub fn from_value(raw: Value) -> Result<Self, VoiceListError> {
        let groups = VoiceGroups::deserialize(&raw)?;
        Ok(Self {
            system_voice: groups.system_voice.unwrap_or_default(),
            voice_cloning: groups.voice_cloning.unwrap_or_default(),
            voice_generation: groups.voice_generation.unwrap_or_default(),
            music_generation: groups.music_generation.unwrap_or_default(),
            raw,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, VoiceListError> {
        Self::from_value(serde_json::from_str(content)?)
    }

    pub async fn load(path: &Path) -> Result<Self, VoiceListError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| VoiceListError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&content)
    }

    /// Writes the response exactly as received, pretty-printed.
    pub async fn save(&self, path: &Path) -> Result<(), VoiceListError> {
        let content = serde_json::to_string_pretty(&self.raw)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| VoiceListError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(target: LOG_TARGET, path = %path.display(), "saved voice catalog");
        Ok(())
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.system_voice.is_empty()
            && self.voice_cloning.is_empty()
            && self.voice_generation.is_empty()
            && self.music_generation.is_empty()
    }

    /// System voices ordered by display name.
    pub fn system_voices(&self) -> Vec<VoiceEntry> {
        let mut voices = self.system_voice.clone();
        voices.sort_by(|a, b| a.name().cmp(b.name()));
        voices
    }

    /// Human-readable listing of every non-empty group.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.system_voice.is_empty() {
            let _ = writeln!(out, "\n=== System voices ===");
            for voice in &self.system_voice {
                let _ = writeln!(out, "Voice ID: {}", voice.voice_id);
                let _ = writeln!(out, "Name: {}", voice.voice_name.as_deref().unwrap_or("N/A"));
                if let Some(description) = voice.description_line() {
                    let _ = writeln!(out, "Description: {description}");
                }
                let _ = writeln!(out, "---");
            }
        }

        for (title, group) in [
            ("Cloned voices", &self.voice_cloning),
            ("Generated voices", &self.voice_generation),
        ] {
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n=== {title} ===");
            for voice in group {
                let _ = writeln!(out, "Voice ID: {}", voice.voice_id);
                if let Some(description) = voice.description_line() {
                    let _ = writeln!(out, "Description: {description}");
                }
                let _ = writeln!(out, "Created: {}", voice.created());
                let _ = writeln!(out, "---");
            }
        }

        if !self.music_generation.is_empty() {
            let _ = writeln!(out, "\n=== Music generation ===");
            for voice in &self.music_generation {
                let _ = writeln!(out, "Voice ID: {}", voice.voice_id);
                let _ = writeln!(
                    out,
                    "Instrumental ID: {}",
                    voice.instrumental_id.as_deref().unwrap_or("N/A")
                );
                let _ = writeln!(out, "Created: {}", voice.created());
                let _ = writeln!(out, "---");
            }
        }

        out
    }
}

/// Fetches every voice group visible to the configured account.
pub async fn fetch_voice_catalog(
    client: &Client,
    settings: &Settings,
) -> Result<VoiceCatalog, VoiceListError> {
    tracing::debug!(target: LOG_TARGET, url = %settings.voices_url, "requesting voice catalog");

    let response = client
        .post(settings.voices_url.clone())
        .bearer_auth(settings.api_key.expose())
        .json(&json!({ "voice_type": "all" }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(VoiceListError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }

    let raw: Value = serde_json::from_slice(&response.bytes().await?)?;
    if let Some(base_resp) = raw.get("base_resp") {
        let base_resp = BaseResp::deserialize(base_resp)?;
        if let Some((code, message)) = base_resp.failure() {
            return Err(VoiceListError::Api { code, message });
        }
    }

    let catalog = VoiceCatalog::from_value(raw)?;
    tracing::info!(
        target: LOG_TARGET,
        system = catalog.system_voice.len(),
        cloned = catalog.voice_cloning.len(),
        generated = catalog.voice_generation.len(),
        music = catalog.music_generation.len(),
        "fetched voice catalog"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, MapEnv};
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    fn sample() -> Value {
        json!({
            "system_voice": [
                {"voice_id": "male-qn-qingse", "voice_name": "青涩青年音色", "description": ["young"]},
                {"voice_id": "female-shaonv", "voice_name": "少女音色", "description": []},
                {"voice_id": "audiobook_male_1", "voice_name": "Audiobook Male"}
            ],
            "voice_cloning": [
                {"voice_id": "my-clone", "description": ["warm", "calm"], "created_time": "2025-01-02"}
            ],
            "voice_generation": null,
            "music_generation": [
                {"voice_id": "m1", "instrumental_id": "piano", "created_time": 1735689600}
            ],
            "base_resp": {"status_code": 0, "status_msg": "success"}
        })
    }

    #[test]
    fn groups_are_read_and_missing_ones_are_empty() {
        let catalog = VoiceCatalog::from_value(sample()).expect("catalog");
        assert_eq!(catalog.system_voice.len(), 3);
        assert_eq!(catalog.voice_cloning.len(), 1);
        assert!(catalog.voice_generation.is_empty());
        assert_eq!(catalog.music_generation.len(), 1);
        assert!(!catalog.is_empty());
        assert!(VoiceCatalog::from_json("{}").expect("empty").is_empty());
    }

    #[test]
    fn system_voices_are_sorted_by_name() {
        let catalog = VoiceCatalog::from_value(sample()).expect("catalog");
        let names: Vec<String> = catalog
            .system_voices()
            .iter()
            .map(|v| v.name().to_owned())
            .collect();
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(names, expected);
        assert_eq!(names[0], "Audiobook Male");
    }

    #[test]
    fn render_lists_each_group() {
        let text = VoiceCatalog::from_value(sample()).expect("catalog").render();
        assert!(text.contains("=== System voices ==="));
        assert!(text.contains("Voice ID: male-qn-qingse"));
        assert!(text.contains("Description: young"));
        assert!(text.contains("=== Cloned voices ==="));
        assert!(text.contains("Description: warm, calm"));
        assert!(text.contains("Created: 2025-01-02"));
        assert!(!text.contains("=== Generated voices ==="));
        assert!(text.contains("Instrumental ID: piano"));
        assert!(text.contains("Created: 1735689600"));
    }

    #[tokio::test]
    async fn saved_catalog_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_VOICES_FILE);
        let catalog = VoiceCatalog::from_value(sample()).expect("catalog");

        catalog.save(&path).await.expect("saved");
        let loaded = VoiceCatalog::load(&path).await.expect("loaded");

        assert_eq!(loaded, catalog);
    }

    #[tokio::test]
    async fn loading_a_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = VoiceCatalog::load(&dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceListError::Io { .. }));
    }

    type Seen = Arc<Mutex<Option<(HeaderMap, Value)>>>;

    async fn voice_server(reply: Value, seen: Seen) -> Settings {
        let app = Router::new()
            .route(
                "/v1/get_voice",
                post(
                    |State((reply, seen)): State<(Value, Seen)>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        *seen.lock().expect("lock") = Some((headers, body));
                        Json(reply)
                    },
                ),
            )
            .with_state((reply, seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server");
        });

        parse_config(
            &format!(
                r#"{{"api_key": "secret", "group_id": "grp", "voices_url": "http://{addr}/v1/get_voice"}}"#
            ),
            &MapEnv::default(),
        )
        .expect("settings")
    }

    #[tokio::test]
    async fn fetches_all_voice_types_with_bearer_auth() {
        let seen = Seen::default();
        let settings = voice_server(sample(), seen.clone()).await;

        let catalog = fetch_voice_catalog(&Client::new(), &settings)
            .await
            .expect("catalog");

        assert_eq!(catalog.system_voice.len(), 3);
        let (headers, body) = seen.lock().expect("lock").clone().expect("request seen");
        assert_eq!(headers["authorization"], "Bearer secret");
        assert_eq!(body, json!({"voice_type": "all"}));
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let reply = json!({"base_resp": {"status_code": 1004, "status_msg": "auth failed"}});
        let settings = voice_server(reply, Seen::default()).await;

        let err = fetch_voice_catalog(&Client::new(), &settings)
            .await
            .unwrap_err();

        match err {
            VoiceListError::Api { code, message } => {
                assert_eq!(code, 1004);
                assert_eq!(message, "auth failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
