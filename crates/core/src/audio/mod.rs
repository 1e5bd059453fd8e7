mod decode;
#[cfg(feature = "ffmpeg-sidecar")]
mod encode;
mod pcm;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use decode::{ClipDecoder, DecodeError, SymphoniaMp3Decoder};
#[cfg(feature = "ffmpeg-sidecar")]
pub use encode::FfmpegMp3Encoder;
pub use pcm::{duration_from_frames, frames_for_duration, ConvertError, PcmClip};

/// Silence appended after every clip, the last one included.
pub const CLIP_GAP: Duration = Duration::from_millis(300);

#[derive(thiserror::Error, Debug)]
pub enum AssemblyError {
    #[error("no audio clips to merge")]
    NoClipsToMerge,

    #[error("mp3 encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("mp3 encoding failed: {0}")]
    Encode(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
enum ClipError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Joined PCM plus the input positions that were left out.
#[derive(Clone, Debug)]
pub struct Concatenated {
    pub pcm: PcmClip,
    /// Positions in the input slice that could not be decoded, ascending.
    pub skipped: Vec<usize>,
}

/// Encoded output of a merge.
#[derive(Clone, Debug)]
pub struct Merged {
    pub audio: Bytes,
    pub skipped: Vec<usize>,
}

pub trait Mp3Encoder: Send + Sync {
    fn encode(&self, pcm: PcmClip) -> BoxFuture<'_, Result<Bytes, AssemblyError>>;
}

/// Concatenates MP3 clips with a silence gap after each one and re-encodes
/// the result.
#[derive(Clone)]
pub struct AudioAssembler {
    decoder: Arc<dyn ClipDecoder>,
    encoder: Arc<dyn Mp3Encoder>,
    gap: Duration,
}

impl AudioAssembler {
    pub fn new(decoder: Arc<dyn ClipDecoder>, encoder: Arc<dyn Mp3Encoder>) -> Self {
        Self {
            decoder,
            encoder,
            gap: CLIP_GAP,
        }
    }

    /// symphonia for decoding, ffmpeg at `bitrate` bits/s for encoding.
    #[cfg(feature = "ffmpeg-sidecar")]
    pub fn mp3(bitrate: u32) -> Self {
        Self::new(
            Arc::new(SymphoniaMp3Decoder),
            Arc::new(FfmpegMp3Encoder::new(bitrate)),
        )
    }

    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    pub fn gap(&self) -> Duration {
        self.gap
    }

    /// Decodes and joins `clips` in order. The output takes the format of the
    /// first clip that decodes; later clips are converted to match. A clip
    /// that cannot be decoded or converted is left out and reported in
    /// `skipped`. Fails only when no clip is usable.
    pub fn concat<B: AsRef<[u8]>>(&self, clips: &[B]) -> Result<Concatenated, AssemblyError> {
        let mut merged: Option<PcmClip> = None;
        let mut skipped = Vec::new();

        for (index, clip) in clips.iter().enumerate() {
            let target = merged.as_ref().map(|m| (m.sample_rate, m.channels));
            match self.prepare(clip.as_ref(), index, target) {
                Ok(decoded) => {
                    let out = merged.get_or_insert_with(|| {
                        PcmClip::empty(decoded.sample_rate, decoded.channels)
                    });
                    out.append(&decoded);
                    out.append(&PcmClip::silence(out.sample_rate, out.channels, self.gap));
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping clip that cannot be decoded");
                    skipped.push(index);
                }
            }
        }

        let pcm = merged.ok_or(AssemblyError::NoClipsToMerge)?;
        Ok(Concatenated { pcm, skipped })
    }

    fn prepare(
        &self,
        clip: &[u8],
        index: usize,
        target: Option<(u32, u16)>,
    ) -> Result<PcmClip, ClipError> {
        let decoded = self.decoder.decode(clip)?;
        let Some((rate, channels)) = target else {
            return Ok(decoded);
        };
        if decoded.sample_rate == rate && decoded.channels == channels {
            return Ok(decoded);
        }

        tracing::debug!(
            index,
            from_rate = decoded.sample_rate,
            from_channels = decoded.channels,
            to_rate = rate,
            to_channels = channels,
            "converting clip to output format"
        );
        Ok(decoded.converted(rate, channels)?)
    }

    pub async fn merge_to_bytes<B: AsRef<[u8]> + Sync>(
        &self,
        clips: &[B],
    ) -> Result<Merged, AssemblyError> {
        let Concatenated { pcm, skipped } = self.concat(clips)?;
        tracing::debug!(
            clips = clips.len() - skipped.len(),
            duration_ms = pcm.duration().as_millis() as u64,
            "encoding merged audio"
        );
        let audio = self.encoder.encode(pcm).await?;
        Ok(Merged { audio, skipped })
    }

    /// Merges `clips` into an MP3 at `output`, creating parent directories.
    pub async fn merge<B: AsRef<[u8]> + Sync>(
        &self,
        clips: &[B],
        output: &Path,
    ) -> Result<Merged, AssemblyError> {
        let merged = self.merge_to_bytes(clips).await?;

        let io_err = |source| AssemblyError::Io {
            path: output.to_path_buf(),
            source,
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(output, &merged.audio).await.map_err(io_err)?;

        tracing::info!(
            path = %output.display(),
            clips = clips.len() - merged.skipped.len(),
            bytes = merged.audio.len(),
            "wrote merged audio"
        );
        Ok(merged)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        let (assembler, _) = assembler();
        let clips: Vec<Bytes> = Vec::new();
        assert!(matches!(
            assembler.concat(&clips),
            Err(AssemblyError::NoClipsToMerge)
        ));
    }

    #[test]
    fn duration_is_clips_plus_one_gap_per_clip() {
        let (assembler, _) = assembler();
        let clips = vec![
            fake_clip(1_000, 1, 120, 10),
            fake_clip(1_000, 1, 250, 20),
            fake_clip(1_000, 1, 80, 30),
        ];

        let pcm = assembler.concat(&clips).expect("merged").pcm;

        let expected = Duration::from_millis(120 + 250 + 80) + CLIP_GAP * 3;
        assert_eq!(pcm.duration(), expected);
        assert_eq!(pcm.frames(), 450 + 900);
    }

    #[test]
    fn clips_keep_order_and_gap_follows_the_last_clip() {
        let (assembler, _) = assembler();
        let clips = vec![fake_clip(1_000, 1, 10, 255), fake_clip(1_000, 1, 10, 51)];

        let pcm = assembler.concat(&clips).expect("merged").pcm;

        let s = &pcm.samples;
        assert_eq!(s.len(), 10 + 300 + 10 + 300);
        assert!(s[..10].iter().all(|v| *v == 1.0));
        assert!(s[10..310].iter().all(|v| *v == 0.0));
        assert!(s[310..320].iter().all(|v| (*v - 0.2).abs() < 1e-6));
        assert!(s[320..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn mismatched_formats_are_converted_to_the_first_clip() {
        let (assembler, _) = assembler();
        let clips = vec![fake_clip(1_000, 1, 100, 10), fake_clip(2_000, 2, 200, 20)];

        let merged = assembler.concat(&clips).expect("merged");

        assert!(merged.skipped.is_empty());
        let pcm = merged.pcm;
        assert_eq!(pcm.sample_rate, 1_000);
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.frames(), 100 + 300 + 100 + 300);
    }

    #[test]
    fn undecodable_clip_is_skipped_and_reported() {
        let (assembler, _) = assembler();
        let clips = vec![
            fake_clip(1_000, 1, 10, 1),
            Bytes::from_static(b"xx"),
            fake_clip(1_000, 1, 20, 2),
        ];

        let merged = assembler.concat(&clips).expect("merged");

        assert_eq!(merged.skipped, vec![1]);
        assert_eq!(merged.pcm.frames(), 10 + 300 + 20 + 300);
    }

    #[test]
    fn format_follows_the_first_clip_that_decodes() {
        let (assembler, _) = assembler();
        let clips = vec![Bytes::from_static(b""), fake_clip(2_000, 2, 50, 3)];

        let merged = assembler.concat(&clips).expect("merged");

        assert_eq!(merged.skipped, vec![0]);
        assert_eq!((merged.pcm.sample_rate, merged.pcm.channels), (2_000, 2));
    }

    #[test]
    fn nothing_decodable_is_no_clips_to_merge() {
        let (assembler, _) = assembler();
        let clips = vec![Bytes::from_static(b"xx"), Bytes::from_static(b"yy")];
        assert!(matches!(
            assembler.concat(&clips),
            Err(AssemblyError::NoClipsToMerge)
        ));
    }

    #[tokio::test]
    async fn merge_writes_encoded_output_creating_directories() {
        let (assembler, encoder) = assembler();
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("out").join("episode.mp3");
        let clips = vec![fake_clip(1_000, 1, 100, 1), fake_clip(1_000, 1, 100, 2)];

        let merged = assembler.merge(&clips, &output).await.expect("merged");

        assert!(merged.skipped.is_empty());
        assert_eq!(merged.audio, Bytes::from_static(b"mp3:800"));
        let bytes = std::fs::read(&output).expect("output exists");
        assert_eq!(bytes, b"mp3:800");
        assert_eq!(encoder.last().expect("encoded").frames(), 800);
    }

    #[tokio::test]
    async fn merge_of_nothing_writes_nothing() {
        let (assembler, encoder) = assembler();
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("episode.mp3");
        let clips: Vec<Bytes> = Vec::new();

        let err = assembler.merge(&clips, &output).await.unwrap_err();

        assert!(matches!(err, AssemblyError::NoClipsToMerge));
        assert!(!output.exists());
        assert!(encoder.last().is_none());
    }
}
