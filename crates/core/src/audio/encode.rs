use crate::audio::{AssemblyError, Mp3Encoder, PcmClip};
use bytes::Bytes;
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Encodes PCM to MP3 by piping f32le samples through an ffmpeg process.
#[derive(Clone, Debug)]
pub struct FfmpegMp3Encoder {
    bitrate: u32,
}

impl FfmpegMp3Encoder {
    pub fn new(bitrate: u32) -> Self {
        Self { bitrate }
    }

    fn ensure_ffmpeg_available(&self) -> Result<(), AssemblyError> {
        download::auto_download().map_err(|e| AssemblyError::EncoderUnavailable(e.to_string()))
    }

    fn args(&self, pcm: &PcmClip) -> Vec<String> {
        let sample_rate = pcm.sample_rate.to_string();
        let channels = pcm.channels.to_string();
        let bitrate = format!("{}k", (self.bitrate / 1000).max(8));
        [
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-f",
            "f32le",
            "-ar",
            sample_rate.as_str(),
            "-ac",
            channels.as_str(),
            "-i",
            "pipe:0",
            "-vn",
            "-b:a",
            bitrate.as_str(),
            "-f",
            "mp3",
            "pipe:1",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }

    async fn encode_with_ffmpeg(&self, pcm: PcmClip) -> Result<Bytes, AssemblyError> {
        let mut child = tokio::process::Command::new(ffmpeg_path())
            .args(self.args(&pcm))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| AssemblyError::Encode(e.to_string()))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            AssemblyError::Encode("ffmpeg stdin unavailable (pipe not created)".to_owned())
        })?;
        let mut stdout = child.stdout.take().ok_or_else(|| {
            AssemblyError::Encode("ffmpeg stdout unavailable (pipe not created)".to_owned())
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            AssemblyError::Encode("ffmpeg stderr unavailable (pipe not created)".to_owned())
        })?;

        let raw = pcm.to_f32le_bytes();
        let stdin_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(&raw).await?;
            stdin.shutdown().await?;
            Ok::<(), std::io::Error>(())
        });

        let stdout_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await?;
            Ok::<Vec<u8>, std::io::Error>(buf)
        });

        let stderr_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok::<Vec<u8>, std::io::Error>(buf)
        });

        let status = child
            .wait()
            .await
            .map_err(|e| AssemblyError::Encode(e.to_string()))?;

        stdin_task
            .await
            .map_err(|e| AssemblyError::Encode(e.to_string()))?
            .map_err(|e| AssemblyError::Encode(e.to_string()))?;

        let stdout_bytes = stdout_task
            .await
            .map_err(|e| AssemblyError::Encode(e.to_string()))?
            .map_err(|e| AssemblyError::Encode(e.to_string()))?;

        let stderr_bytes = stderr_task
            .await
            .map_err(|e| AssemblyError::Encode(e.to_string()))?
            .map_err(|e| AssemblyError::Encode(e.to_string()))?;

        if !status.success() {
            let stderr_s = String::from_utf8_lossy(&stderr_bytes).trim().to_owned();
            return Err(AssemblyError::Encode(format!(
                "exit_code={:?} stderr={stderr_s}",
                status.code()
            )));
        }
        if stdout_bytes.is_empty() {
            return Err(AssemblyError::Encode("ffmpeg produced no output".to_owned()));
        }

        Ok(Bytes::from(stdout_bytes))
    }
}

impl Mp3Encoder for FfmpegMp3Encoder {
    fn encode(&self, pcm: PcmClip) -> BoxFuture<'_, Result<Bytes, AssemblyError>> {
        async move {
            self.ensure_ffmpeg_available()?;
            self.encode_with_ffmpeg(pcm).await
        }
        .boxed()
    }
}
