use crate::audio::{AssemblyError, AudioAssembler};
use crate::config::VoiceConfig;
use crate::dialogue::{extract_dialogues, DialogueLine, ParseError};
use crate::tts::{
    synthesize_stream, BatchPolicy, SpeechSynthesizer, SynthesisOutcome, TtsError,
};
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_TARGET: &str = "pipeline";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("failed to build speech client: {0}")]
    Client(#[from] TtsError),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a finished run produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub lines_parsed: usize,
    pub lines_synthesized: usize,
    /// Indices of lines with no audio in the output, ascending.
    pub failed: Vec<usize>,
    pub output_path: PathBuf,
}

/// Transcript in, one merged MP3 out.
pub struct Pipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    assembler: AudioAssembler,
    temp_dir: PathBuf,
    policy: BatchPolicy,
}

impl Pipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        assembler: AudioAssembler,
        temp_dir: impl Into<PathBuf>,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            synthesizer,
            assembler,
            temp_dir: temp_dir.into(),
            policy,
        }
    }

    /// MiniMax for speech, symphonia and ffmpeg for assembly.
    #[cfg(feature = "ffmpeg-sidecar")]
    pub fn from_settings(settings: &crate::config::Settings) -> Result<Self, PipelineError> {
        let client = crate::tts::MiniMaxClient::new(settings)?;
        Ok(Self::new(
            Arc::new(client),
            AudioAssembler::mp3(settings.voices.acoustic.bitrate),
            settings.temp_dir.clone(),
            BatchPolicy::from_settings(settings),
        ))
    }

    pub async fn run(
        &self,
        transcript: &str,
        voices: &VoiceConfig,
        output: &Path,
    ) -> Result<RunSummary, PipelineError> {
        let lines = extract_dialogues(transcript)?;
        let lines_parsed = lines.len();
        tracing::info!(target: LOG_TARGET, lines = lines_parsed, "parsed transcript");

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|source| PipelineError::Io {
                path: self.temp_dir.clone(),
                source,
            })?;

        // each clip is on disk before the next line is requested
        let results = synthesize_stream(self.synthesizer.as_ref(), lines, voices, &self.policy);
        let mut results = std::pin::pin!(results);

        let mut failed = Vec::new();
        let mut persisted = Vec::new();
        let mut clips: Vec<(usize, Bytes)> = Vec::new();
        while let Some(result) = results.next().await {
            let index = result.line.index;
            let SynthesisOutcome::Success(audio) = result.outcome else {
                failed.push(index);
                continue;
            };
            match self.persist(&result.line, &audio).await {
                Ok(path) => {
                    persisted.push(path);
                    clips.push((index, audio));
                }
                Err(e) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        index,
                        error = %e,
                        "failed to save clip, dropping line"
                    );
                    failed.push(index);
                }
            }
        }

        let audio: Vec<&Bytes> = clips.iter().map(|(_, audio)| audio).collect();
        let merged = self.assembler.merge(&audio, output).await;
        remove_transient(persisted.iter().map(PathBuf::as_path)).await;

        let merged = merged?;
        failed.extend(merged.skipped.iter().map(|&pos| clips[pos].0));
        failed.sort_unstable();
        let summary = RunSummary {
            lines_parsed,
            lines_synthesized: clips.len() - merged.skipped.len(),
            failed,
            output_path: output.to_path_buf(),
        };
        tracing::info!(
            target: LOG_TARGET,
            parsed = summary.lines_parsed,
            synthesized = summary.lines_synthesized,
            failed = summary.failed.len(),
            output = %summary.output_path.display(),
            "run complete"
        );
        Ok(summary)
    }

    fn clip_path(&self, index: usize) -> PathBuf {
        self.temp_dir.join(format!("dialogue_{index:04}.mp3"))
    }

    async fn persist(&self, line: &DialogueLine, audio: &Bytes) -> std::io::Result<PathBuf> {
        let path = self.clip_path(line.index);
        tokio::fs::write(&path, audio).await?;
        tracing::debug!(
            target: LOG_TARGET,
            index = line.index,
            path = %path.display(),
            "saved clip"
        );
        Ok(path)
    }
}

async fn remove_transient<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(
                target: LOG_TARGET,
                path = %path.display(),
                error = %e,
                "failed to remove temporary clip"
            );
        }
    }
}
