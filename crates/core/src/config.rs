use crate::tts::VoiceId;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_BASE_URL: &str = "https://api.minimaxi.com/v1/t2a_v2";
pub const DEFAULT_VOICES_URL: &str = "https://api.minimaxi.com/v1/get_voice";
pub const DEFAULT_MODEL: &str = "speech-02-hd";
pub const DEFAULT_VOICE: &str = "male-qn-qingse";
pub const DEFAULT_TEMP_DIR: &str = "temp_audio";
pub const DEFAULT_SAMPLE_RATE: u32 = 32_000;
pub const DEFAULT_BITRATE: u32 = 128_000;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const ENV_MINIMAX_API_KEY: &str = "MINIMAX_API_KEY";
pub const ENV_MINIMAX_GROUP_ID: &str = "MINIMAX_GROUP_ID";

const PLACEHOLDER_API_KEY: &str = "your_api_key_here";
const PLACEHOLDER_GROUP_ID: &str = "your_group_id_here";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

/// How the remote service hands back the synthesized audio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Audio bytes inline in the response, hex encoded.
    #[default]
    HexEncoded,
    /// A download link that needs a second GET.
    RemoteUrl,
}

impl AudioEncoding {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::HexEncoded => "hex",
            Self::RemoteUrl => "url",
        }
    }
}

impl FromStr for AudioEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::HexEncoded),
            "url" => Ok(Self::RemoteUrl),
            _ => Err(ConfigError::UnsupportedOutputFormat(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AcousticParams {
    pub speed: f32,
    pub vol: f32,
    pub pitch: f32,
    pub sample_rate: u32,
    pub bitrate: u32,
}

impl Default for AcousticParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            vol: 1.0,
            pitch: 0.0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

/// Speaker to voice assignment plus the acoustic settings shared by every line.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceConfig {
    pub voice_map: HashMap<String, VoiceId>,
    pub default_voice: VoiceId,
    pub acoustic: AcousticParams,
}

impl VoiceConfig {
    pub fn new(default_voice: VoiceId) -> Self {
        Self {
            voice_map: HashMap::new(),
            default_voice,
            acoustic: AcousticParams::default(),
        }
    }

    pub fn with_voice<S: Into<String>>(mut self, speaker: S, voice: VoiceId) -> Self {
        self.voice_map.insert(speaker.into(), voice);
        self
    }

    /// Voice for `speaker`, falling back to the default voice.
    pub fn resolve(&self, speaker: &str) -> &VoiceId {
        self.voice_map.get(speaker).unwrap_or(&self.default_voice)
    }

    pub fn is_mapped(&self, speaker: &str) -> bool {
        self.voice_map.contains_key(speaker)
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self::new(VoiceId::from(DEFAULT_VOICE))
    }
}

/// Validated settings, passed by value into every component.
#[derive(Clone, Debug)]
pub struct Settings {
    pub api_key: ApiKey,
    pub group_id: String,
    pub base_url: Url,
    pub voices_url: Url,
    pub model: String,
    pub encoding: AudioEncoding,
    pub voices: VoiceConfig,
    pub temp_dir: PathBuf,
    pub request_delay: Duration,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl Settings {
    /// True while the scaffolded placeholder credentials are still in place.
    pub fn has_placeholder_credentials(&self) -> bool {
        self.api_key.expose() == PLACEHOLDER_API_KEY || self.group_id == PLACEHOLDER_GROUP_ID
    }
}

/// On-disk shape of the config file. Every field is optional here; defaults
/// and required-field checks are applied by [`RawSettings::into_settings`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub api_key: Option<String>,
    pub group_id: Option<String>,
    pub base_url: Option<String>,
    pub voices_url: Option<String>,
    pub model: Option<String>,
    pub output_format: Option<String>,
    pub default_voice: Option<String>,
    pub speed: Option<f32>,
    pub vol: Option<f32>,
    pub pitch: Option<f32>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub voice_map: Option<HashMap<String, String>>,
    pub temp_dir: Option<PathBuf>,
    pub request_delay_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

impl RawSettings {
    pub fn into_settings(self, env: &impl Env) -> Result<Settings, ConfigError> {
        let api_key = resolve_optional_string(non_blank(self.api_key), ENV_MINIMAX_API_KEY, env)
            .ok_or(ConfigError::MissingField("api_key"))?;
        let api_key = ApiKey::new(api_key)?;
        let group_id =
            resolve_optional_string(non_blank(self.group_id), ENV_MINIMAX_GROUP_ID, env)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingField("group_id"))?;

        let base_url = parse_url("base_url", self.base_url.as_deref(), DEFAULT_BASE_URL)?;
        let voices_url = parse_url("voices_url", self.voices_url.as_deref(), DEFAULT_VOICES_URL)?;

        let encoding = match self.output_format.as_deref() {
            Some(v) => v.parse()?,
            None => AudioEncoding::default(),
        };

        let defaults = AcousticParams::default();
        let acoustic = AcousticParams {
            speed: self.speed.unwrap_or(defaults.speed),
            vol: self.vol.unwrap_or(defaults.vol),
            pitch: self.pitch.unwrap_or(defaults.pitch),
            sample_rate: self.sample_rate.unwrap_or(defaults.sample_rate),
            bitrate: self.bitrate.unwrap_or(defaults.bitrate),
        };

        let voices = VoiceConfig {
            voice_map: self
                .voice_map
                .unwrap_or_default()
                .into_iter()
                .map(|(speaker, voice)| (speaker, VoiceId(voice)))
                .collect(),
            default_voice: VoiceId(
                non_blank(self.default_voice).unwrap_or_else(|| DEFAULT_VOICE.to_owned()),
            ),
            acoustic,
        };

        let concurrency = self.concurrency.unwrap_or(1);
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        Ok(Settings {
            api_key,
            group_id,
            base_url,
            voices_url,
            model: non_blank(self.model).unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            encoding,
            voices,
            temp_dir: self
                .temp_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR)),
            request_delay: Duration::from_millis(
                self.request_delay_ms.unwrap_or(DEFAULT_REQUEST_DELAY_MS),
            ),
            concurrency,
            max_attempts,
            request_timeout: Duration::from_secs(
                self.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("invalid url in `{field}`: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported output_format `{0}` (expected \"hex\" or \"url\")")]
    UnsupportedOutputFormat(String),
    #[error("concurrency must be >= 1")]
    ZeroConcurrency,
    #[error("max_attempts must be >= 1")]
    ZeroAttempts,
    #[error("config file already exists: {0}")]
    AlreadyExists(PathBuf),
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Explicit value first, then the environment.
pub fn resolve_optional_string(
    explicit: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match explicit {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

/// Parses settings from JSON text. Credentials absent from the text are
/// looked up in `env`.
pub fn parse_config(content: &str, env: &impl Env) -> Result<Settings, ConfigError> {
    let raw: RawSettings = serde_json::from_str(content)?;
    raw.into_settings(env)
}

pub fn load_config(path: &Path, env: &impl Env) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    let settings = parse_config(&content, env)?;

    tracing::debug!(
        path = %path.display(),
        model = %settings.model,
        mapped_speakers = settings.voices.voice_map.len(),
        "config loaded"
    );
    Ok(settings)
}

/// Sample config with placeholder credentials and an example voice map.
pub fn sample_config() -> RawSettings {
    let voice_map = [
        ("主持人", "female-shaonv"),
        ("嘉宾A", "male-qn-qingse"),
        ("嘉宾B", "male-zh-yinse"),
    ]
    .into_iter()
    .map(|(speaker, voice)| (speaker.to_owned(), voice.to_owned()))
    .collect();
    let acoustic = AcousticParams::default();

    RawSettings {
        api_key: Some(PLACEHOLDER_API_KEY.to_owned()),
        group_id: Some(PLACEHOLDER_GROUP_ID.to_owned()),
        base_url: Some(DEFAULT_BASE_URL.to_owned()),
        voices_url: Some(DEFAULT_VOICES_URL.to_owned()),
        model: Some(DEFAULT_MODEL.to_owned()),
        output_format: Some(AudioEncoding::default().wire_name().to_owned()),
        default_voice: Some(DEFAULT_VOICE.to_owned()),
        speed: Some(acoustic.speed),
        vol: Some(acoustic.vol),
        pitch: Some(acoustic.pitch),
        sample_rate: Some(acoustic.sample_rate),
        bitrate: Some(acoustic.bitrate),
        voice_map: Some(voice_map),
        temp_dir: Some(PathBuf::from(DEFAULT_TEMP_DIR)),
        request_delay_ms: Some(DEFAULT_REQUEST_DELAY_MS),
        concurrency: Some(1),
        max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
    }
}

/// Writes [`sample_config`] to `path`. An existing file is left alone unless
/// `force` is set.
pub fn create_default_config(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(&sample_config())?;
    std::fs::write(path, json).map_err(io_err)?;

    tracing::info!(path = %path.display(), "wrote default config");
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_url(field: &'static str, value: Option<&str>, default: &str) -> Result<Url, ConfigError> {
    let raw = value.filter(|v| !v.trim().is_empty()).unwrap_or(default);
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { field, source })
}
